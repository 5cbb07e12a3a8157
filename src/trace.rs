//! Build traces: the ordered dependency observations of one rule execution,
//! an optional volatility marker, and the digest of the produced output.

use crate::error::BuildError;
use crate::hash::{Digest, Fingerprint};
use crate::paths::RelPath;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// One observed input: the file at `path` had content `digest` when the rule
/// asked for it.  `Digest::MISSING` records an observed non-existence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dep {
    pub path: RelPath,
    pub digest: Digest,
}

/// Attached to a trace by `--always`, `--after` or `--stamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
    /// Rebuild on every build.
    Always,
    /// Cached result is valid for `duration` from `since`.
    After { duration: Duration, since: SystemTime },
}

impl Volatility {
    /// Whether a cache probe may still use a trace carrying this marker.
    pub fn still_valid(&self, now: SystemTime) -> bool {
        match self {
            Volatility::Always => false,
            Volatility::After { duration, since } => match now.duration_since(*since) {
                Ok(age) => age < *duration,
                // A wallclock earlier than the recording counts as valid.
                Err(_) => true,
            },
        }
    }

    /// `Always` shadows `After`; two `After`s keep the earlier expiry.
    pub(crate) fn merge(this: Option<Volatility>, other: Volatility) -> Volatility {
        match (this, other) {
            (None, v) => v,
            (Some(Volatility::Always), _) | (_, Volatility::Always) => Volatility::Always,
            (
                Some(Volatility::After { duration, since }),
                Volatility::After {
                    duration: d2,
                    since: s2,
                },
            ) => {
                if since + duration <= s2 + d2 {
                    Volatility::After { duration, since }
                } else {
                    Volatility::After {
                        duration: d2,
                        since: s2,
                    }
                }
            }
        }
    }
}

/// One line of the line-based trace file format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceLine {
    Dep { path: RelPath, digest: Digest },
    DepMissing { path: RelPath },
    VolatileAlways,
    VolatileAfter { duration: Duration, since: SystemTime },
    Output { digest: Digest },
}

impl fmt::Display for TraceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceLine::Dep { path, digest } => {
                write!(f, "dep {} {}", path.escaped(), digest.to_hex())
            }
            TraceLine::DepMissing { path } => write!(f, "dep-missing {}", path.escaped()),
            TraceLine::VolatileAlways => write!(f, "volatile-always"),
            TraceLine::VolatileAfter { duration, since } => write!(
                f,
                "volatile-after {} {}",
                duration.as_secs(),
                humantime::format_rfc3339_seconds(*since)
            ),
            TraceLine::Output { digest } => write!(f, "output {}", digest.to_hex()),
        }
    }
}

impl FromStr for TraceLine {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        Ok(match word {
            "dep" => {
                let (path, digest) = rest
                    .split_once(' ')
                    .ok_or_else(|| anyhow::anyhow!("dep line needs a path and a digest"))?;
                TraceLine::Dep {
                    path: RelPath::unescape(path)?,
                    digest: digest.parse()?,
                }
            }
            "dep-missing" => TraceLine::DepMissing {
                path: RelPath::unescape(rest)?,
            },
            "volatile-always" => TraceLine::VolatileAlways,
            "volatile-after" => {
                let (secs, stamp) = rest
                    .split_once(' ')
                    .ok_or_else(|| anyhow::anyhow!("volatile-after needs seconds and a wallclock"))?;
                TraceLine::VolatileAfter {
                    duration: Duration::from_secs(secs.parse()?),
                    since: humantime::parse_rfc3339(stamp)?,
                }
            }
            "output" => TraceLine::Output {
                digest: rest.parse()?,
            },
            _ => anyhow::bail!("unknown trace line {:?}", word),
        })
    }
}

/// A committed trace.  Immutable once read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub deps: Vec<Dep>,
    pub volatility: Option<Volatility>,
    pub output: Digest,
}

impl Trace {
    /// Parse a stored trace.  `origin` only labels errors.
    pub fn parse(text: &str, origin: &str) -> Result<Trace, BuildError> {
        let corrupt = |msg: String| BuildError::CorruptTrace {
            path: origin.to_string(),
            msg,
        };
        let mut deps = Vec::new();
        let mut volatility = None;
        let mut output = None;
        for line in text.lines() {
            let line = line.parse().map_err(|err: anyhow::Error| corrupt(err.to_string()))?;
            if output.is_some() {
                return Err(corrupt("records after the output line".to_string()));
            }
            match line {
                TraceLine::Dep { path, digest } => deps.push(Dep { path, digest }),
                TraceLine::DepMissing { path } => deps.push(Dep {
                    path,
                    digest: Digest::MISSING,
                }),
                TraceLine::VolatileAlways => {
                    volatility = Some(Volatility::merge(volatility, Volatility::Always))
                }
                TraceLine::VolatileAfter { duration, since } => {
                    volatility = Some(Volatility::merge(
                        volatility,
                        Volatility::After { duration, since },
                    ))
                }
                TraceLine::Output { digest } => output = Some(digest),
            }
        }
        let output = output.ok_or_else(|| corrupt("no output line".to_string()))?;
        Ok(Trace {
            deps,
            volatility,
            output,
        })
    }

    /// The serialised file form: one line per record, output last.
    pub fn to_file_text(&self) -> String {
        let mut out = String::new();
        for dep in &self.deps {
            out.push_str(&dep.to_line().to_string());
            out.push('\n');
        }
        if let Some(v) = self.volatility {
            out.push_str(&v.to_line().to_string());
            out.push('\n');
        }
        out.push_str(
            &TraceLine::Output {
                digest: self.output,
            }
            .to_string(),
        );
        out.push('\n');
        out
    }

    /// The identity of this trace: a hash over the ordered dep records and
    /// the volatility record.  The output digest is excluded.
    pub fn input_fingerprint(&self) -> Fingerprint {
        let mut hasher = DepHasher::new();
        for dep in &self.deps {
            hasher.push(dep);
        }
        if let Some(v) = self.volatility {
            hasher.push_volatility(&v);
        }
        hasher.fingerprint()
    }
}

impl Dep {
    pub fn to_line(&self) -> TraceLine {
        if self.digest.is_missing() {
            TraceLine::DepMissing {
                path: self.path.clone(),
            }
        } else {
            TraceLine::Dep {
                path: self.path.clone(),
                digest: self.digest,
            }
        }
    }
}

impl Volatility {
    pub fn to_line(&self) -> TraceLine {
        match *self {
            Volatility::Always => TraceLine::VolatileAlways,
            Volatility::After { duration, since } => TraceLine::VolatileAfter { duration, since },
        }
    }
}

const UNIT_SEPARATOR: u8 = 0x1f;

/// Incrementally fingerprints an ordered record sequence.  Cloned per record
/// by the recorder to read off the prefix fingerprint after each append.
#[derive(Clone)]
pub struct DepHasher {
    inner: blake3::Hasher,
}

impl DepHasher {
    pub fn new() -> DepHasher {
        DepHasher {
            inner: blake3::Hasher::new(),
        }
    }

    pub fn push(&mut self, dep: &Dep) {
        self.inner.update(dep.path.escaped().as_bytes());
        self.inner.update(&[UNIT_SEPARATOR]);
        self.inner.update(dep.digest.as_bytes());
        self.inner.update(&[UNIT_SEPARATOR]);
    }

    pub fn push_volatility(&mut self, v: &Volatility) {
        self.inner.update(v.to_line().to_string().as_bytes());
        self.inner.update(&[UNIT_SEPARATOR]);
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_bytes(*self.inner.finalize().as_bytes())
    }
}
