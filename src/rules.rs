//! Dofile selection, following the redo naming convention: `<name>.do`
//! beside the target, then `default.<ext...>.do` in the target's directory
//! and each ancestor, longest extension first.  Deeper directories shadow
//! shallower ones.

use crate::paths::RelPath;
use std::path::Path;
use tracing::trace;

/// The winning dofile for a target, plus the strings handed to the rule
/// process per the invocation contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub dofile: RelPath,
    /// `$1`: the target name minus the extension the dofile matched,
    /// relative to the dofile's directory.
    pub basename: String,
    /// `$2`: the target path relative to the dofile's directory.
    pub target: String,
}

/// Walk the convention for `target`, checking the filesystem under `root`.
pub fn find_rule(root: &Path, target: &RelPath) -> Option<RuleMatch> {
    let name = target.file_name();
    if name.is_empty() {
        return None;
    }
    let target_dir = target.parent().unwrap_or_else(|| RelPath::from(""));

    // A dofile named after the target always wins.
    let specific = target_dir.join(&format!("{}.do", name));
    if specific.to_abs(root).is_file() {
        trace!("{}: rule {}", target, specific);
        return Some(rule_match(specific, target, ""));
    }

    // default.<ext...>.do, longest extension first, walking upward.
    let mut dir = Some(target_dir);
    while let Some(d) = dir {
        for ext in extensions(name) {
            let dofile = d.join(&format!("default{}.do", ext));
            if dofile.to_abs(root).is_file() {
                trace!("{}: rule {}", target, dofile);
                return Some(rule_match(dofile, target, ext));
            }
        }
        dir = if d.as_path().as_os_str().is_empty() {
            None
        } else {
            Some(d.parent().unwrap_or_else(|| RelPath::from("")))
        };
    }
    None
}

/// The candidate extensions for a name, longest first, ending with the
/// empty extension of a bare `default.do`.  For `chicken.a.b.c`:
/// `.a.b.c`, `.b.c`, `.c`, ``.
fn extensions(name: &str) -> impl Iterator<Item = &str> {
    name.char_indices()
        .filter(|&(_, c)| c == '.')
        .map(|(i, _)| &name[i..])
        .chain(std::iter::once(""))
}

fn rule_match(dofile: RelPath, target: &RelPath, ext: &str) -> RuleMatch {
    let dofile_dir = dofile.parent().unwrap_or_else(|| RelPath::from(""));
    let rel = pathdiff::diff_paths(target.as_path(), dofile_dir.as_path())
        .unwrap_or_else(|| target.as_path().to_owned());
    let rel = rel.to_string_lossy().into_owned();
    let basename = rel.strip_suffix(ext).unwrap_or(rel.as_str()).to_string();
    RuleMatch {
        dofile,
        basename,
        target: rel,
    }
}
