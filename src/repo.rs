//! Version-control adapter: locates the repository and answers "is this
//! path a tracked source?".  Everything else about the backing VCS is
//! opaque to the engine.

use crate::paths::RelPath;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct Repo {
    inner: gix::ThreadSafeRepository,
    root: PathBuf,
    redux_dir: PathBuf,
}

impl Repo {
    /// Discover the repository enclosing the working directory and prepare
    /// the `.git/redux` metadata area.
    pub fn discover() -> anyhow::Result<Repo> {
        let inner = gix::discover(".")
            .context("redux must run inside a tracked repository")?
            .into_sync();
        let root = {
            let local = inner.to_thread_local();
            let worktree = local
                .worktree()
                .ok_or_else(|| anyhow::anyhow!("bare repositories are not supported"))?;
            worktree.base().canonicalize()?
        };
        let redux_dir = inner.git_dir().join("redux");
        std::fs::create_dir_all(&redux_dir)?;
        let redux_dir = redux_dir.canonicalize()?;
        debug!("repository root {}", root.display());
        Ok(Repo {
            inner,
            root,
            redux_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The metadata area holding the content store, trace store and probe
    /// socket.
    pub fn redux_dir(&self) -> &Path {
        &self.redux_dir
    }

    pub fn abs(&self, path: &RelPath) -> PathBuf {
        path.to_abs(&self.root)
    }

    /// Resolve a user-supplied path against the working directory into a
    /// repository-relative path.
    pub fn rel_from_arg(&self, arg: &Path) -> anyhow::Result<RelPath> {
        let cwd = std::env::current_dir()?;
        RelPath::from_arg(arg, &cwd, &self.root)
    }

    /// Whether the path is checked in.  An unreadable or absent index (for
    /// example a freshly initialised repository) tracks nothing.
    pub fn is_tracked(&self, path: &RelPath) -> bool {
        let repo = self.inner.to_thread_local();
        let Ok(index) = repo.index_or_load_from_head() else {
            return false;
        };
        let text = path.as_path().to_string_lossy();
        index
            .entry_index_by_path(gix::bstr::BStr::new(text.as_bytes()))
            .is_ok()
    }
}
