//! Failure kinds surfaced by the build engine.

use crate::hash::Digest;
use crate::paths::RelPath;

/// Everything `want` can fail with.  Variants are `Clone` so a memoised
/// failure can be handed to every waiter of an in-flight target.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("{0}: no rule to build it, and it is not a source file")]
    NoRule(RelPath),

    #[error("{target}: rule failed ({})", status_str(.code))]
    RuleFailed { target: RelPath, code: Option<i32> },

    #[error("dependency cycle: {}", chain_str(.0))]
    Cycle(Vec<RelPath>),

    #[error("{path}: corrupt trace: {msg}")]
    CorruptTrace { path: String, msg: String },

    #[error("{path}: {msg}")]
    Io { path: String, msg: String },

    #[error("interrupted")]
    Interrupted,
}

impl BuildError {
    pub fn io(path: impl std::fmt::Display, err: std::io::Error) -> BuildError {
        BuildError::Io {
            path: path.to_string(),
            msg: err.to_string(),
        }
    }
}

fn status_str(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "killed by signal".to_string(),
    }
}

fn chain_str(chain: &[RelPath]) -> String {
    chain
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type BuildResult = Result<Digest, BuildError>;
