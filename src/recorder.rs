//! Per-job dependency recording.  Appends one line to the job's working
//! tracefile per observation, keeps the running prefix fingerprint, and
//! answers the mid-job cutoff question: which committed traces still agree
//! with everything this run has observed so far?
//!
//! The first record of every trace is the dofile itself, seeded by the
//! executor before the rule starts.  Prefix matching skips it: the cutoff's
//! job is to prove equivalence of the *probed* observations, and a changed
//! dofile is exactly the case where the cache probe already missed.

use crate::hash::{Digest, Fingerprint};
use crate::paths::RelPath;
use crate::trace::{Dep, DepHasher, Trace, Volatility};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A committed trace whose probed records so far exactly match the current
/// run.  `tail_start` indexes the first dep the current run has not yet
/// observed; if everything from there still validates, the trace's output
/// is proven.
#[derive(Debug, Clone)]
pub struct PrefixHit {
    pub trace: Trace,
    pub tail_start: usize,
}

pub struct Recorder {
    path: PathBuf,
    state: Mutex<State>,
}

struct State {
    file: std::fs::File,
    deps: Vec<Dep>,
    volatility: Option<Volatility>,
    /// Running fingerprint of the probed records (everything after the seed).
    hasher: DepHasher,
    candidates: Vec<Trace>,
    /// `(probed record count, prefix fingerprint)` -> candidate indices.
    prefix_index: HashMap<(usize, Fingerprint), Vec<usize>>,
}

impl Recorder {
    /// Open a fresh working tracefile, seeded with the dofile observation.
    /// `candidates` are the committed traces for this `(rule, target)` in
    /// lookup order; they feed the cutoff prefix index.
    pub fn create(path: PathBuf, seed: Dep, candidates: Vec<Trace>) -> anyhow::Result<Recorder> {
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "{}", seed.to_line())?;

        let mut prefix_index: HashMap<(usize, Fingerprint), Vec<usize>> = HashMap::new();
        for (i, trace) in candidates.iter().enumerate() {
            // Every committed trace starts with its dofile record; anything
            // else is from an older layout and cannot be prefix-matched.
            if trace.deps.first().map(|d| &d.path) != Some(&seed.path) {
                continue;
            }
            let mut hasher = DepHasher::new();
            for (n, dep) in trace.deps[1..].iter().enumerate() {
                hasher.push(dep);
                prefix_index
                    .entry((n + 1, hasher.fingerprint()))
                    .or_default()
                    .push(i);
            }
        }

        Ok(Recorder {
            path,
            state: Mutex::new(State {
                file,
                deps: vec![seed],
                volatility: None,
                hasher: DepHasher::new(),
                candidates,
                prefix_index,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one probed dependency and return the committed traces whose
    /// probed prefix matches everything recorded so far, in lookup order.
    pub fn record_dep(&self, path: RelPath, digest: Digest) -> std::io::Result<Vec<PrefixHit>> {
        let mut state = self.state.lock().unwrap();
        let dep = Dep { path, digest };
        writeln!(state.file, "{}", dep.to_line())?;
        state.hasher.push(&dep);
        state.deps.push(dep);

        let probed = state.deps.len() - 1;
        let fingerprint = state.hasher.fingerprint();
        let mut hits = Vec::new();
        if let Some(indices) = state.prefix_index.get(&(probed, fingerprint)) {
            for &i in indices {
                let trace = &state.candidates[i];
                // The fingerprint already binds the contents; compare the
                // records anyway so a hash collision cannot kill a job.
                if trace.deps[1..1 + probed] == state.deps[1..] {
                    hits.push(PrefixHit {
                        trace: trace.clone(),
                        tail_start: 1 + probed,
                    });
                }
            }
        }
        Ok(hits)
    }

    /// Record a volatility marker.  Markers do not participate in prefix
    /// matching.
    pub fn record_volatility(&self, v: Volatility) -> std::io::Result<()> {
        let mut state = self.state.lock().unwrap();
        writeln!(state.file, "{}", v.to_line())?;
        state.volatility = Some(Volatility::merge(state.volatility, v));
        Ok(())
    }

    /// The records accumulated so far, for committing the final trace.
    pub fn snapshot(&self) -> (Vec<Dep>, Option<Volatility>) {
        let state = self.state.lock().unwrap();
        (state.deps.clone(), state.volatility)
    }
}
