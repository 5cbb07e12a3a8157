//! On-disk persistence under the repository metadata area: a
//! content-addressed blob store and the trace store.  Both are append-only;
//! every insert is a write to a temp file followed by an atomic rename, so
//! concurrent inserts of the same key are benign and a crash never leaves a
//! partial entry behind.

use crate::error::BuildError;
use crate::hash::{Digest, Fingerprint};
use crate::paths::RelPath;
use crate::trace::Trace;
use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// `blobs/<digest[0:2]>/<digest[2:]>`, keyed by content.
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn open(redux_dir: &Path) -> anyhow::Result<BlobStore> {
        let dir = redux_dir.join("blobs");
        std::fs::create_dir_all(&dir)?;
        Ok(BlobStore { dir })
    }

    pub fn path_for(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        self.dir.join(&hex[..2]).join(&hex[2..])
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.path_for(digest).is_file()
    }

    /// Copy the file at `src` in as the blob for `digest`.  The caller has
    /// already hashed `src`; we trust it not to mutate the file meanwhile.
    pub fn insert_from(&self, digest: &Digest, src: &Path) -> anyhow::Result<()> {
        if self.contains(digest) {
            debug!("{}: contents already in the store", digest);
            return Ok(());
        }
        let dest = self.path_for(digest);
        std::fs::create_dir_all(dest.parent().unwrap())?;
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        std::fs::copy(src, tmp.path()).with_context(|| format!("store {}", src.display()))?;
        tmp.persist(&dest)
            .with_context(|| format!("commit blob {}", dest.display()))?;
        debug!("{:.8}: contents added to the store", digest.to_hex());
        Ok(())
    }

    /// Place the blob's contents at `dest`, going through a temp sibling so
    /// the target file appears atomically.
    pub fn materialize(&self, digest: &Digest, dest: &Path, tmp: &Path) -> anyhow::Result<()> {
        let src = self.path_for(digest);
        std::fs::copy(&src, tmp)
            .with_context(|| format!("restore {:.8} from store", digest.to_hex()))?;
        std::fs::rename(tmp, dest)?;
        debug!("{}: restored @{:.8}", dest.display(), digest.to_hex());
        Ok(())
    }
}

/// `traces/<escaped rule>/<escaped target>/<input fingerprint>`, one trace
/// per file.
pub struct TraceStore {
    dir: PathBuf,
}

impl TraceStore {
    pub fn open(redux_dir: &Path) -> anyhow::Result<TraceStore> {
        let dir = redux_dir.join("traces");
        std::fs::create_dir_all(&dir)?;
        Ok(TraceStore { dir })
    }

    fn pair_dir(&self, rule: &RelPath, target: &RelPath) -> PathBuf {
        self.dir.join(rule.escaped()).join(target.escaped())
    }

    /// Commit a trace.  The blob for its output digest must already be in
    /// the content store.
    pub fn insert(
        &self,
        rule: &RelPath,
        target: &RelPath,
        trace: &Trace,
    ) -> anyhow::Result<Fingerprint> {
        let fingerprint = trace.input_fingerprint();
        let dir = self.pair_dir(rule, target);
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(trace.to_file_text().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(fingerprint.to_hex()))
            .with_context(|| format!("commit trace for {}", target))?;
        debug!("{}: committed trace {:.8}", target, fingerprint.to_hex());
        Ok(fingerprint)
    }

    /// Candidate traces for a `(rule, target)` pair, newest first by mtime,
    /// tie-broken by fingerprint so the order is reproducible.
    pub fn candidates(&self, rule: &RelPath, target: &RelPath) -> Result<Vec<Trace>, BuildError> {
        let dir = self.pair_dir(rule, target);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BuildError::io(dir.display(), err)),
        };
        let mut found: Vec<(SystemTime, String, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| BuildError::io(dir.display(), err))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.parse::<Fingerprint>().is_err() {
                // Leftover temp file from a crashed writer.
                continue;
            }
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((mtime, name, entry.path()));
        }
        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let mut traces = Vec::with_capacity(found.len());
        for (_, _, path) in found {
            let text = std::fs::read_to_string(&path)
                .map_err(|err| BuildError::io(path.display(), err))?;
            traces.push(Trace::parse(&text, &path.display().to_string())?);
        }
        Ok(traces)
    }

    /// Whether any committed trace names this target as its output, under
    /// any rule.  Used to classify untracked files.
    pub fn is_known_output(&self, target: &RelPath) -> bool {
        let escaped = target.escaped();
        let Ok(rules) = std::fs::read_dir(&self.dir) else {
            return false;
        };
        for rule in rules.flatten() {
            let dir = rule.path().join(&escaped);
            if dir.is_dir() && std::fs::read_dir(&dir).map(|mut d| d.next().is_some()).unwrap_or(false)
            {
                return true;
            }
        }
        false
    }

    /// Every committed `(rule, target, trace)` triple.  Reporting only.
    pub fn all(&self) -> anyhow::Result<Vec<(RelPath, RelPath, Trace)>> {
        let mut out = Vec::new();
        let rules = match std::fs::read_dir(&self.dir) {
            Ok(rules) => rules,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(err) => return Err(err.into()),
        };
        for rule_entry in rules {
            let rule_entry = rule_entry?;
            let rule = RelPath::unescape(&rule_entry.file_name().to_string_lossy())?;
            for target_entry in std::fs::read_dir(rule_entry.path())? {
                let target_entry = target_entry?;
                let target = RelPath::unescape(&target_entry.file_name().to_string_lossy())?;
                for trace_entry in std::fs::read_dir(target_entry.path())? {
                    let path = trace_entry?.path();
                    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned())
                    else {
                        continue;
                    };
                    if name.parse::<Fingerprint>().is_err() {
                        continue;
                    }
                    let text = std::fs::read_to_string(&path)?;
                    let trace = Trace::parse(&text, &path.display().to_string())?;
                    out.push((rule.clone(), target.clone(), trace));
                }
            }
        }
        Ok(out)
    }
}
