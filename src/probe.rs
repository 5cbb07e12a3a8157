//! The dependency-probe protocol.  A running rule re-invokes the driver;
//! that child process connects to the coordinator over a per-build unix
//! socket, issues `want` requests, and relays volatility markers.  One
//! request is served at a time per connection, which keeps each job's
//! tracefile appends in rule-observed order.

use crate::hash::Digest;
use crate::job::JobHandle;
use crate::paths::RelPath;
use crate::trace::Volatility;
use crate::work::Coordinator;
use anyhow::Context;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

pub fn serve(coord: Arc<Coordinator>, listener: UnixListener) {
    for stream in listener.incoming() {
        let Ok(stream) = stream else {
            return;
        };
        let coord = coord.clone();
        std::thread::spawn(move || {
            if let Err(err) = handle_conn(coord, stream) {
                debug!("probe connection: {:#}", err);
            }
        });
    }
}

fn handle_conn(coord: Arc<Coordinator>, stream: UnixStream) -> anyhow::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    let mut hello = String::new();
    reader.read_line(&mut hello)?;
    let id: u64 = hello
        .trim_end()
        .strip_prefix("hello ")
        .context("expected hello")?
        .parse()?;
    let job = coord
        .job(id)
        .with_context(|| format!("no running job {}", id))?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let reply = handle_request(&coord, &job, line.trim_end());
        // A single line back; the requester may already be dead if a cutoff
        // fired, in which case the write error ends the connection.
        writeln!(writer, "{}", reply.replace('\n', " "))?;
    }
}

fn handle_request(coord: &Coordinator, job: &JobHandle, request: &str) -> String {
    match try_handle(coord, job, request) {
        Ok(reply) => reply,
        Err(err) => format!("err {:#}", err),
    }
}

fn try_handle(coord: &Coordinator, job: &JobHandle, request: &str) -> anyhow::Result<String> {
    let (word, rest) = request.split_once(' ').unwrap_or((request, ""));
    match word {
        "want" | "want-force" => {
            let abs = crate::paths::unescape(rest)?;
            let target =
                RelPath::from_arg(Path::new(&abs), coord.repo.root(), coord.repo.root())?;

            // Give our token back while the sub-build may block, and take
            // one again before returning to the rule.
            let released = job.take_token();
            let result = coord.want(&target, &job.ancestors, word == "want-force");
            if released.is_some() {
                if let Ok(Some(token)) = coord.tokens.acquire() {
                    job.put_token(token);
                }
            }

            match result {
                Ok(digest) => {
                    let hits = job.recorder.record_dep(target, digest)?;
                    coord.consider_cutoff(job, hits);
                    if digest.is_missing() {
                        Ok("ok-missing".to_string())
                    } else {
                        Ok(format!("ok {}", digest.to_hex()))
                    }
                }
                Err(err) => Ok(format!("err {}", err)),
            }
        }
        "always" => {
            job.recorder.record_volatility(Volatility::Always)?;
            Ok("ok".to_string())
        }
        "after" => {
            let duration = Duration::from_secs(rest.parse()?);
            job.recorder.record_volatility(Volatility::After {
                duration,
                since: wallclock_now(),
            })?;
            Ok("ok".to_string())
        }
        "stamp" => {
            let digest: Digest = rest.parse()?;
            let hits = job.recorder.record_dep(RelPath::stdin(), digest)?;
            coord.consider_cutoff(job, hits);
            job.recorder.record_volatility(Volatility::Always)?;
            Ok("ok".to_string())
        }
        _ => anyhow::bail!("unknown request {:?}", word),
    }
}

/// Now, truncated to whole seconds so the recorded wallclock survives its
/// RFC 3339 round trip unchanged.
fn wallclock_now() -> SystemTime {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

/// The child-mode driver's side of the protocol.
pub struct ProbeClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl ProbeClient {
    pub fn connect(socket: &Path, job_id: &str) -> anyhow::Result<ProbeClient> {
        let stream = UnixStream::connect(socket)
            .with_context(|| format!("connect to coordinator at {}", socket.display()))?;
        let mut client = ProbeClient {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        };
        client.send(&format!("hello {}", job_id))?;
        Ok(client)
    }

    fn send(&mut self, line: &str) -> anyhow::Result<()> {
        writeln!(self.writer, "{}", line)?;
        Ok(())
    }

    fn request(&mut self, line: &str) -> anyhow::Result<String> {
        self.send(line)?;
        let mut reply = String::new();
        if self.reader.read_line(&mut reply)? == 0 {
            // The coordinator killed our job mid-probe.
            anyhow::bail!("build coordinator closed the connection");
        }
        Ok(reply.trim_end().to_string())
    }

    /// Mark `path` (absolute) as a dependency of the calling job, building
    /// it if needed.  `Ok(MISSING)` reports an observed non-existence.
    pub fn want(&mut self, abs: &Path, force: bool) -> anyhow::Result<Result<Digest, String>> {
        let escaped = crate::paths::escape(&abs.to_string_lossy());
        let verb = if force { "want-force" } else { "want" };
        let reply = self.request(&format!("{} {}", verb, escaped))?;
        if let Some(hex) = reply.strip_prefix("ok ") {
            Ok(Ok(hex.parse()?))
        } else if reply == "ok-missing" {
            Ok(Ok(Digest::MISSING))
        } else if let Some(msg) = reply.strip_prefix("err ") {
            Ok(Err(msg.to_string()))
        } else {
            anyhow::bail!("unexpected reply {:?}", reply)
        }
    }

    pub fn always(&mut self) -> anyhow::Result<()> {
        self.expect_ok("always")
    }

    pub fn after(&mut self, duration: Duration) -> anyhow::Result<()> {
        self.expect_ok(&format!("after {}", duration.as_secs()))
    }

    pub fn stamp(&mut self, digest: &Digest) -> anyhow::Result<()> {
        self.expect_ok(&format!("stamp {}", digest.to_hex()))
    }

    fn expect_ok(&mut self, line: &str) -> anyhow::Result<()> {
        let reply = self.request(line)?;
        if reply != "ok" {
            anyhow::bail!("{}", reply.strip_prefix("err ").unwrap_or(&reply));
        }
        Ok(())
    }
}
