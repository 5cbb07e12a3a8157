//! The build coordinator: owns the per-build context, routes target
//! requests through `want`, dedupes work within one build, validates cached
//! traces (recursively, through `want` itself) and launches rule jobs on a
//! miss.

use crate::error::{BuildError, BuildResult};
use crate::hash::Digest;
use crate::job::{self, JobHandle, SpawnCtx, Verdict};
use crate::jobserver::JobTokens;
use crate::paths::RelPath;
use crate::probe;
use crate::recorder::{PrefixHit, Recorder};
use crate::repo::Repo;
use crate::rules::{self, RuleMatch};
use crate::signal;
use crate::store::{BlobStore, TraceStore};
use crate::trace::{Dep, Trace};
use std::collections::{HashMap, HashSet};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::SystemTime;
use tracing::{debug, info, warn};

pub struct Coordinator {
    pub repo: Repo,
    pub blobs: BlobStore,
    pub traces: TraceStore,
    pub tokens: JobTokens,
    build_id: String,
    socket_path: PathBuf,
    driver: PathBuf,
    state: Mutex<BuildState>,
    resolved_cv: Condvar,
    jobs: Mutex<HashMap<u64, Arc<JobHandle>>>,
    next_job_id: AtomicU64,
}

/// The only shared mutable structure of a build: what is done, what is in
/// flight.  Guarded briefly; all real work happens outside the lock.
#[derive(Default)]
struct BuildState {
    resolved: HashMap<RelPath, BuildResult>,
    in_flight: HashSet<RelPath>,
}

impl Coordinator {
    pub fn new(repo: Repo, jobs: usize) -> anyhow::Result<Arc<Coordinator>> {
        let blobs = BlobStore::open(repo.redux_dir())?;
        let traces = TraceStore::open(repo.redux_dir())?;
        let tokens = JobTokens::init(jobs)?;
        let build_id = uuid::Uuid::new_v4().to_string();
        let socket_path = repo.redux_dir().join(format!("probe-{}.sock", build_id));
        let listener = UnixListener::bind(&socket_path)?;
        let driver = std::env::current_exe()?;
        debug!("build {} listening on {}", build_id, socket_path.display());

        let coord = Arc::new(Coordinator {
            repo,
            blobs,
            traces,
            tokens,
            build_id,
            socket_path,
            driver,
            state: Mutex::default(),
            resolved_cv: Condvar::new(),
            jobs: Mutex::default(),
            next_job_id: AtomicU64::new(1),
        });
        let server = coord.clone();
        std::thread::spawn(move || probe::serve(server, listener));
        Ok(coord)
    }

    pub fn job(&self, id: u64) -> Option<Arc<JobHandle>> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    /// Remove the probe socket.  The accept thread keeps the coordinator
    /// alive, so this cannot be left to Drop alone.
    pub fn shutdown(&self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }

    /// Ensure `target` is up to date and return its content digest.
    /// Idempotent within one build.  `stack` is the caller's ancestor chain,
    /// used for cycle detection; `force` skips the cache for this target
    /// only.
    pub fn want(&self, target: &RelPath, stack: &[RelPath], force: bool) -> BuildResult {
        if stack.contains(target) {
            let mut chain = stack.to_vec();
            chain.push(target.clone());
            return Err(BuildError::Cycle(chain));
        }

        {
            let mut state = self.state.lock().unwrap();
            loop {
                if let Some(result) = state.resolved.get(target) {
                    return result.clone();
                }
                if state.in_flight.contains(target) {
                    state = self.resolved_cv.wait(state).unwrap();
                    continue;
                }
                state.in_flight.insert(target.clone());
                break;
            }
        }

        let result = self.resolve(target, stack, force);
        if let Err(err) = &result {
            debug!("{}: {}", target, err);
        }

        let mut state = self.state.lock().unwrap();
        state.in_flight.remove(target);
        state.resolved.insert(target.clone(), result.clone());
        self.resolved_cv.notify_all();
        result
    }

    fn resolve(&self, target: &RelPath, stack: &[RelPath], force: bool) -> BuildResult {
        if signal::was_interrupted() {
            return Err(BuildError::Interrupted);
        }
        let abs = self.repo.abs(target);

        // Classify: tracked files are sources; untracked files we have never
        // produced are assumed to be sources too.
        let tracked = self.repo.is_tracked(target);
        if tracked || (abs.exists() && !self.traces.is_known_output(target)) {
            if !tracked {
                warn!(
                    "{}: untracked and never built here; assuming it is a source",
                    target
                );
            }
            let digest =
                Digest::of_file_or_missing(&abs).map_err(|err| BuildError::io(target, err))?;
            debug!("{}: source {:?}", target, digest);
            return Ok(digest);
        }

        let Some(rule) = rules::find_rule(self.repo.root(), target) else {
            return Err(BuildError::NoRule(target.clone()));
        };

        let mut chain = stack.to_vec();
        chain.push(target.clone());

        let candidates = if force {
            Vec::new()
        } else {
            self.traces.candidates(&rule.dofile, target)?
        };
        for trace in &candidates {
            if self.validate(trace, &chain) {
                info!("{}: cache hit", target);
                self.materialize(target, &trace.output)?;
                return Ok(trace.output);
            }
        }

        self.run_rule(target, rule, chain, candidates)
    }

    /// A trace matches current state iff every recorded dep's live digest
    /// (as the build engine resolves it, not as the disk happens to look)
    /// equals the recorded one, and volatility has not expired.
    fn validate(&self, trace: &Trace, stack: &[RelPath]) -> bool {
        if let Some(v) = trace.volatility {
            if !v.still_valid(SystemTime::now()) {
                return false;
            }
        }
        if !self.blobs.contains(&trace.output) {
            return false;
        }
        for dep in &trace.deps {
            if dep.path.is_synthetic() {
                return false;
            }
            match self.want(&dep.path, stack, false) {
                Ok(live) if live == dep.digest => {}
                _ => return false,
            }
        }
        true
    }

    /// The tail half of a mid-job cutoff proof: would the deps this run has
    /// not yet observed still produce the recorded digests?
    pub fn validate_tail(&self, trace: &Trace, tail_start: usize, stack: &[RelPath]) -> bool {
        if !self.blobs.contains(&trace.output) {
            return false;
        }
        for dep in &trace.deps[tail_start..] {
            if dep.path.is_synthetic() {
                return false;
            }
            match self.want(&dep.path, stack, false) {
                Ok(live) if live == dep.digest => {}
                _ => return false,
            }
        }
        true
    }

    /// Called by the probe layer after each recorded dep: if any committed
    /// trace is now proven, kill the job.
    pub fn consider_cutoff(&self, job: &JobHandle, hits: Vec<PrefixHit>) {
        for hit in hits {
            if self.validate_tail(&hit.trace, hit.tail_start, &job.ancestors) {
                job.kill_for_cache_hit(hit.trace);
                return;
            }
        }
    }

    /// Ensure the blob for `output` is materialised at the target path.
    fn materialize(&self, target: &RelPath, output: &Digest) -> Result<(), BuildError> {
        let abs = self.repo.abs(target);
        let current =
            Digest::of_file_or_missing(&abs).map_err(|err| BuildError::io(target, err))?;
        if current == *output {
            return Ok(());
        }
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent).map_err(|err| BuildError::io(target, err))?;
        }
        self.blobs
            .materialize(output, &abs, &job::tmp_path(&abs))
            .map_err(|err| BuildError::Io {
                path: target.to_string(),
                msg: format!("{:#}", err),
            })
    }

    fn run_rule(
        &self,
        target: &RelPath,
        rule: RuleMatch,
        chain: Vec<RelPath>,
        candidates: Vec<Trace>,
    ) -> BuildResult {
        // The dofile is input record zero; resolving it through want keeps
        // its digest consistent across the whole build.
        let rule_digest = self.want(&rule.dofile, &chain, false)?;

        let token = self
            .tokens
            .acquire()
            .map_err(|err| BuildError::Io {
                path: "jobserver".to_string(),
                msg: format!("{:#}", err),
            })?
            .ok_or(BuildError::Interrupted)?;
        if signal::was_interrupted() {
            return Err(BuildError::Interrupted);
        }

        let abs = self.repo.abs(target);
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent).map_err(|err| BuildError::io(target, err))?;
        }
        let seed = Dep {
            path: rule.dofile.clone(),
            digest: rule_digest,
        };
        let recorder = Recorder::create(job::tracefile_path(&abs), seed, candidates).map_err(
            |err| BuildError::Io {
                path: target.to_string(),
                msg: format!("{:#}", err),
            },
        )?;

        let id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(JobHandle::new(
            id,
            target.clone(),
            rule,
            chain,
            recorder,
            token,
        ));
        self.jobs.lock().unwrap().insert(id, handle.clone());
        let ctx = SpawnCtx {
            root: self.repo.root(),
            build_id: &self.build_id,
            socket: &self.socket_path,
            driver: &self.driver,
            tokens: &self.tokens,
        };
        let verdict = job::run(&ctx, &handle, &self.blobs, &self.traces);
        self.jobs.lock().unwrap().remove(&id);

        match verdict {
            Err(err) => Err(BuildError::Io {
                path: target.to_string(),
                msg: format!("{:#}", err),
            }),
            Ok(Verdict::Committed(digest)) => {
                info!("{}: built", target);
                Ok(digest)
            }
            Ok(Verdict::KilledForCacheHit(trace)) => {
                info!("{}: restored from cache after cutoff", target);
                self.materialize(target, &trace.output)?;
                Ok(trace.output)
            }
            Ok(Verdict::Failed(_)) if signal::was_interrupted() => Err(BuildError::Interrupted),
            Ok(Verdict::Failed(code)) => Err(BuildError::RuleFailed {
                target: target.clone(),
                code,
            }),
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
