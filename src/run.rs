//! Command-line entry point: flag parsing, logging setup, and dispatch
//! between the root build mode, the reporting commands, and the child mode
//! used when a running rule re-invokes the driver.

use crate::hash::Digest;
use crate::probe::ProbeClient;
use crate::repo::Repo;
use crate::signal;
use crate::work::Coordinator;
use crate::{depfile, report};
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(argh::FromArgs)]
/// redux, a redo-style build tool with constructive traces
struct Opts {
    /// parallelism [default uses system thread count]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// rebuild the named targets even if a cached result matches
    #[argh(switch)]
    force: bool,

    /// mark the calling job as rebuilding on every build
    #[argh(switch)]
    always: bool,

    /// mark the calling job as cacheable for DURATION (e.g. "10m")
    #[argh(option)]
    after: Option<String>,

    /// hash stdin into the calling job's trace and mark it volatile
    #[argh(switch)]
    stamp: bool,

    /// record every dependency listed in a make-style depfile
    #[argh(option)]
    depfile: Option<String>,

    /// print the dofile that would build each target
    #[argh(switch)]
    whichdo: bool,

    /// list every recorded source path
    #[argh(switch)]
    sources: bool,

    /// list every traced output path
    #[argh(switch)]
    outputs: bool,

    /// show the build tree that produced each target
    #[argh(switch)]
    howdid: bool,

    /// remove traced outputs, keeping their contents in the store
    #[argh(switch)]
    clean: bool,

    /// targets to bring up to date
    #[argh(positional)]
    targets: Vec<String>,
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1)
}

pub fn run() -> anyhow::Result<i32> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    let opts: Opts = argh::from_env();

    // A rule's driver invocation talks to its parent build instead of
    // running one of its own.
    if let (Ok(socket), Ok(job)) = (std::env::var("REDUX_SOCKET"), std::env::var("REDUX_JOB")) {
        return run_child(opts, Path::new(&socket), &job);
    }
    if opts.always || opts.after.is_some() || opts.stamp || opts.depfile.is_some() {
        anyhow::bail!("--always/--after/--stamp/--depfile are only valid inside a running rule");
    }

    let repo = Repo::discover()?;
    if opts.whichdo || opts.sources || opts.outputs || opts.howdid || opts.clean {
        return run_report(&opts, repo);
    }

    if opts.targets.is_empty() {
        anyhow::bail!("no targets specified");
    }
    signal::register_sigint();
    let jobs = opts.jobs.unwrap_or_else(default_parallelism).max(1);
    let coord = Coordinator::new(repo, jobs)?;

    let force = opts.force;
    let mut threads = Vec::new();
    for target in &opts.targets {
        let rel = coord.repo.rel_from_arg(Path::new(target))?;
        let coord = coord.clone();
        let thread_rel = rel.clone();
        threads.push((
            rel,
            std::thread::spawn(move || coord.want(&thread_rel, &[], force)),
        ));
    }

    let mut failed = false;
    for (rel, thread) in threads {
        match thread.join().unwrap() {
            Ok(digest) if digest.is_missing() => {
                eprintln!("redux: {}: does not exist", rel);
                failed = true;
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("redux: {}", err);
                failed = true;
            }
        }
    }
    coord.shutdown();
    Ok(if failed { 1 } else { 0 })
}

fn run_report(opts: &Opts, repo: Repo) -> anyhow::Result<i32> {
    let blobs = crate::store::BlobStore::open(repo.redux_dir())?;
    let traces = crate::store::TraceStore::open(repo.redux_dir())?;
    if opts.whichdo {
        report::whichdo(&repo, &opts.targets)
    } else if opts.sources {
        report::sources(&traces)
    } else if opts.outputs {
        report::outputs(&traces)
    } else if opts.howdid {
        report::howdid(&repo, &traces, &opts.targets)
    } else {
        report::clean(&repo, &blobs, &traces)
    }
}

fn run_child(opts: Opts, socket: &Path, job: &str) -> anyhow::Result<i32> {
    if opts.whichdo || opts.sources || opts.outputs || opts.howdid || opts.clean {
        anyhow::bail!("reporting commands are not valid inside a running rule");
    }
    let mut probe = ProbeClient::connect(socket, job)?;
    let cwd = std::env::current_dir()?;

    if opts.always {
        probe.always()?;
    }
    if let Some(spec) = &opts.after {
        let duration = humantime::parse_duration(spec)
            .with_context(|| format!("parse duration {:?}", spec))?;
        probe.after(duration)?;
    }
    if opts.stamp {
        let digest = Digest::of_reader(&mut std::io::stdin().lock())?;
        probe.stamp(&digest)?;
    }

    let mut failed = false;
    let mut want = |probe: &mut ProbeClient, path: &str, force: bool| -> anyhow::Result<()> {
        let abs = absolutize(&cwd, Path::new(path));
        match probe.want(&abs, force)? {
            Ok(_) => {}
            Err(msg) => {
                eprintln!("redux: {}", msg);
                failed = true;
            }
        }
        Ok(())
    };

    if let Some(path) = &opts.depfile {
        for dep in depfile::read_deps(Path::new(path))? {
            want(&mut probe, &dep, false)?;
        }
    }
    for target in &opts.targets {
        want(&mut probe, target, opts.force)?;
    }
    Ok(if failed { 1 } else { 0 })
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        cwd.join(path)
    }
}
