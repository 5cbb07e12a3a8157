//! Runs one rule as a subprocess, enforcing the temp-file protocol.
//! Unaware of scheduling; the coordinator decides *whether* a rule runs,
//! this module handles spawn, supervision, kill and commit.

use crate::hash::Digest;
use crate::jobserver::{JobTokens, Token};
use crate::paths::RelPath;
use crate::recorder::Recorder;
use crate::rules::RuleMatch;
use crate::signal;
use crate::store::{BlobStore, TraceStore};
use crate::trace::Trace;
use anyhow::Context;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How long a terminated rule gets to exit before SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(2);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One rule execution, shared between the executor thread and the probe
/// handlers serving the rule's driver invocations.
pub struct JobHandle {
    pub id: u64,
    pub target: RelPath,
    pub rule: RuleMatch,
    /// The `want` ancestor chain this job's probes extend; ends with the
    /// job's own target.  This is what makes cycles through rule recursion
    /// detectable.
    pub ancestors: Vec<RelPath>,
    pub recorder: Recorder,
    token: Mutex<Option<Token>>,
    kill: AtomicBool,
    cutoff: Mutex<Option<Trace>>,
}

pub enum Verdict {
    Committed(Digest),
    KilledForCacheHit(Trace),
    Failed(Option<i32>),
}

impl JobHandle {
    pub fn new(
        id: u64,
        target: RelPath,
        rule: RuleMatch,
        ancestors: Vec<RelPath>,
        recorder: Recorder,
        token: Token,
    ) -> JobHandle {
        JobHandle {
            id,
            target,
            rule,
            ancestors,
            recorder,
            token: Mutex::new(Some(token)),
            kill: AtomicBool::new(false),
            cutoff: Mutex::new(None),
        }
    }

    /// A committed trace now provably describes this run; ask the executor
    /// to kill the rule.  First proof wins.
    pub fn kill_for_cache_hit(&self, trace: Trace) {
        let mut cutoff = self.cutoff.lock().unwrap();
        if cutoff.is_none() {
            info!("{}: mid-job cutoff, killing rule", self.target);
            *cutoff = Some(trace);
            self.kill.store(true, Ordering::SeqCst);
        }
    }

    /// Release the job's parallelism token while its probe blocks on a
    /// sub-build; without this, diamond graphs deadlock under low -j.
    pub fn take_token(&self) -> Option<Token> {
        self.token.lock().unwrap().take()
    }

    pub fn put_token(&self, token: Token) {
        *self.token.lock().unwrap() = Some(token);
    }
}

/// Everything a spawn needs from the surrounding build.
pub struct SpawnCtx<'a> {
    pub root: &'a Path,
    pub build_id: &'a str,
    pub socket: &'a Path,
    /// Absolute path of this driver binary, exported as `$REDUX`.
    pub driver: &'a Path,
    pub tokens: &'a JobTokens,
}

pub fn tmp_path(abs_target: &Path) -> PathBuf {
    dotted_sibling(abs_target, "tmp")
}

pub fn tracefile_path(abs_target: &Path) -> PathBuf {
    dotted_sibling(abs_target, "trace")
}

fn dotted_sibling(abs_target: &Path, suffix: &str) -> PathBuf {
    let name = abs_target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    abs_target.with_file_name(format!(".redux_{}.{}", name, suffix))
}

/// Run the rule to a verdict.  On anything but `Committed`, the temp file
/// and working tracefile are gone by the time this returns.
pub fn run(
    ctx: &SpawnCtx,
    job: &JobHandle,
    blobs: &BlobStore,
    traces: &TraceStore,
) -> anyhow::Result<Verdict> {
    let abs_target = job.target.to_abs(ctx.root);
    if let Some(parent) = abs_target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(&abs_target);

    let dofile_abs = job.rule.dofile.to_abs(ctx.root);
    let dofile_dir = dofile_abs.parent().unwrap_or(ctx.root).to_owned();
    let mut cmd = std::process::Command::new(&dofile_abs);
    cmd.current_dir(&dofile_dir)
        .arg(&job.rule.basename)
        .arg(&job.rule.target)
        .arg(&tmp)
        .env("REDUX_BUILD_ID", ctx.build_id)
        .env("REDUX_SOCKET", ctx.socket)
        .env("REDUX_JOB", job.id.to_string())
        .env("REDUX", ctx.driver);
    ctx.tokens.configure(&mut cmd);
    // Own process group, so killing the rule also reaches its helpers.
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }

    debug!("{}: running {}", job.target, job.rule.dofile);
    let mut child = cmd.spawn().with_context(|| {
        format!(
            "spawn {} in {}",
            dofile_abs.display(),
            dofile_dir.display()
        )
    })?;
    // Set the group from this side too, so a kill cannot race the child's
    // own setpgid.
    unsafe {
        libc::setpgid(child.id() as i32, child.id() as i32);
    }
    let status = supervise(job, &mut child)?;
    debug!("{}: rule finished: {}", job.target, status);

    if status.success() {
        return commit(job, blobs, traces, &tmp, &abs_target);
    }

    // Failure and cutoff both discard the partial output.
    let _ = std::fs::remove_file(&tmp);
    let _ = std::fs::remove_file(job.recorder.path());

    let cutoff = job.cutoff.lock().unwrap().take();
    if let Some(trace) = cutoff {
        if job.kill.load(Ordering::SeqCst) {
            return Ok(Verdict::KilledForCacheHit(trace));
        }
    }
    Ok(Verdict::Failed(status.code()))
}

fn supervise(job: &JobHandle, child: &mut std::process::Child) -> std::io::Result<std::process::ExitStatus> {
    let pid = child.id() as i32;
    let mut termed_at: Option<Instant> = None;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if job.kill.load(Ordering::SeqCst) || signal::was_interrupted() {
            match termed_at {
                None => {
                    kill_group(pid, libc::SIGTERM);
                    termed_at = Some(Instant::now());
                }
                Some(at) if at.elapsed() > KILL_GRACE => {
                    kill_group(pid, libc::SIGKILL);
                }
                Some(_) => {}
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn kill_group(pid: i32, sig: libc::c_int) {
    // Safety: signalling a process group we created.
    unsafe {
        if libc::kill(-pid, sig) != 0 {
            libc::kill(pid, sig);
        }
    }
}

fn commit(
    job: &JobHandle,
    blobs: &BlobStore,
    traces: &TraceStore,
    tmp: &Path,
    abs_target: &Path,
) -> anyhow::Result<Verdict> {
    let digest = match Digest::of_file(tmp) {
        Ok(digest) => digest,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let _ = std::fs::remove_file(job.recorder.path());
            anyhow::bail!("{}: rule exited successfully but wrote no output", job.target);
        }
        Err(err) => return Err(err.into()),
    };

    // Blob first: a trace must never reference contents that could be lost
    // to a crash.
    blobs.insert_from(&digest, tmp)?;
    std::fs::rename(tmp, abs_target)?;

    let (deps, volatility) = job.recorder.snapshot();
    let trace = Trace {
        deps,
        volatility,
        output: digest,
    };
    traces.insert(&job.rule.dofile, &job.target, &trace)?;
    let _ = std::fs::remove_file(job.recorder.path());
    Ok(Verdict::Committed(digest))
}
