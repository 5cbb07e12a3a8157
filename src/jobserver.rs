//! Make-compatible jobserver: a pipe of single-byte tokens caps how many
//! rule processes run at once, across redux and any make/cargo invoked by a
//! rule.  The root invocation counts as one job, so it creates N-1 tokens
//! and keeps one "implicit" slot of its own.

use crate::signal;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

pub struct JobTokens {
    client: jobserver::Client,
    implicit: Arc<Mutex<bool>>,
}

/// Held while a rule process runs.  Dropping returns the token to the pool.
pub struct Token {
    kind: TokenKind,
}

enum TokenKind {
    Implicit(Arc<Mutex<bool>>),
    Pipe(jobserver::Acquired),
}

impl Drop for Token {
    fn drop(&mut self) {
        if let TokenKind::Implicit(slot) = &self.kind {
            *slot.lock().unwrap() = true;
        }
        // A pipe token writes itself back when the Acquired drops.
    }
}

impl JobTokens {
    /// Join an inherited jobserver if one is in the environment, otherwise
    /// create one sized for `jobs` parallel rules.
    pub fn init(jobs: usize) -> anyhow::Result<JobTokens> {
        // Safety: we only read inherited descriptors, per the crate contract.
        let client = match unsafe { jobserver::Client::from_env() } {
            Some(client) => {
                debug!("joined inherited jobserver");
                client
            }
            None => jobserver::Client::new(jobs.saturating_sub(1))?,
        };
        Ok(JobTokens {
            client,
            implicit: Arc::new(Mutex::new(true)),
        })
    }

    /// Take a token, blocking until one is free.  Returns `None` if the
    /// build was interrupted while waiting.
    pub fn acquire(&self) -> anyhow::Result<Option<Token>> {
        loop {
            {
                let mut free = self.implicit.lock().unwrap();
                if *free {
                    *free = false;
                    return Ok(Some(Token {
                        kind: TokenKind::Implicit(self.implicit.clone()),
                    }));
                }
            }
            if let Some(acquired) = self.client.try_acquire()? {
                return Ok(Some(Token {
                    kind: TokenKind::Pipe(acquired),
                }));
            }
            if signal::was_interrupted() {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Hand the pipe to a child so external tools cooperate.
    pub fn configure(&self, cmd: &mut std::process::Command) {
        self.client.configure(cmd);
    }
}
