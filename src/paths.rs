//! Repository-relative paths, the identity of every file the engine touches.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A normalised path relative to the repository root.  Equality is bytewise
/// on the normalised form, which makes it usable as a map key and as the
/// `path` field of dependency records.
///
/// The synthetic path `<stdin>` records stamped data that has no file behind
/// it; it never resolves to a filesystem location.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct RelPath(PathBuf);

impl RelPath {
    /// The synthetic dependency path used by `--stamp`.
    pub fn stdin() -> RelPath {
        RelPath(PathBuf::from("<stdin>"))
    }

    pub fn is_synthetic(&self) -> bool {
        self.0.as_os_str().to_string_lossy().starts_with('<')
    }

    /// Resolve a path the user gave us (relative to `base`, typically the
    /// process working directory) into a repository-relative path.
    /// Purely lexical; the file need not exist.
    pub fn from_arg(arg: &Path, base: &Path, root: &Path) -> anyhow::Result<RelPath> {
        let abs = if arg.is_absolute() {
            normalize(arg)
        } else {
            normalize(&base.join(arg))
        };
        let rel = pathdiff::diff_paths(&abs, root)
            .ok_or_else(|| anyhow::anyhow!("{}: cannot relativize against repository", abs.display()))?;
        if rel.components().next() == Some(Component::ParentDir) {
            anyhow::bail!("{}: outside the repository at {}", abs.display(), root.display());
        }
        Ok(RelPath(rel))
    }

    pub fn to_abs(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn file_name(&self) -> &str {
        self.0
            .file_name()
            .map(|n| n.to_str().unwrap_or(""))
            .unwrap_or("")
    }

    pub fn parent(&self) -> Option<RelPath> {
        self.0.parent().map(|p| RelPath(p.to_owned()))
    }

    pub fn join(&self, name: &str) -> RelPath {
        RelPath(self.0.join(name))
    }

    /// Encode for use as a single store path component or a single
    /// space-delimited trace line field.  Escapes `%`, `/`, space and
    /// control bytes as `%XX`.
    pub fn escaped(&self) -> String {
        escape(&self.0.to_string_lossy())
    }

    pub fn unescape(text: &str) -> anyhow::Result<RelPath> {
        Ok(RelPath(PathBuf::from(unescape(text)?)))
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

// Trace lines and already-relative names go through strings.
impl From<&str> for RelPath {
    fn from(s: &str) -> RelPath {
        RelPath(PathBuf::from(s))
    }
}

/// Lexically normalise a path: drop `.` components and resolve `..` against
/// preceding components.  Does not touch the disk.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape arbitrary text into a single space-free token (also used for the
/// probe protocol's path fields).
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for b in text.bytes() {
        match b {
            b'%' | b'/' | b' ' => out.push_str(&format!("%{:02x}", b)),
            b if b < 0x20 => out.push_str(&format!("%{:02x}", b)),
            b => out.push(b as char),
        }
    }
    out
}

pub fn unescape(text: &str) -> anyhow::Result<String> {
    let mut out = Vec::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .ok_or_else(|| anyhow::anyhow!("truncated escape in {:?}", text))?;
            let hex = std::str::from_utf8(hex)?;
            out.push(u8::from_str_radix(hex, 16)?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(String::from_utf8(out)?)
}
