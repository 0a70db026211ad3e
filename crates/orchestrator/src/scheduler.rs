#![forbid(unsafe_code)]

//! Named one-shot jobs that outlive the call which scheduled them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Unique name of the job that ends an allow window.
pub const AUTO_BLOCK_JOB: &str = "firewall_auto_block";

/// Prefix of the per-package jobs that fire when a temporary unblock expires.
pub const UNBLOCK_EXPIRY_PREFIX: &str = "temporary_unblock:";

pub fn unblock_expiry_job(package: &str) -> String {
    format!("{UNBLOCK_EXPIRY_PREFIX}{package}")
}

pub trait JobScheduler: Send + Sync {
    /// Schedule `name` to fire after `delay`, replacing a pending job of the
    /// same name.
    fn schedule_once(&self, name: &str, delay: Duration);

    /// Idempotent; unknown names are ignored.
    fn cancel(&self, name: &str);
}

struct Pending {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Jobs {
    generation: u64,
    pending: HashMap<String, Pending>,
}

/// Runs jobs as tokio timers and reports each firing by name on a channel.
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct TokioScheduler {
    jobs: Arc<Mutex<Jobs>>,
    fired: flume::Sender<String>,
}

impl TokioScheduler {
    pub fn new() -> (Self, flume::Receiver<String>) {
        let (fired, rx) = flume::unbounded();
        (
            Self {
                jobs: Arc::default(),
                fired,
            },
            rx,
        )
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.jobs.lock().pending.contains_key(name)
    }
}

impl JobScheduler for TokioScheduler {
    fn schedule_once(&self, name: &str, delay: Duration) {
        let mut jobs = self.jobs.lock();
        if let Some(previous) = jobs.pending.get(name) {
            trace!(job = name, "replacing pending job");
            previous.token.cancel();
        }

        jobs.generation += 1;
        let generation = jobs.generation;
        let token = CancellationToken::new();
        jobs.pending.insert(
            name.to_owned(),
            Pending {
                generation,
                token: token.clone(),
            },
        );
        drop(jobs);

        debug!(job = name, ?delay, "job scheduled");
        let name = name.to_owned();
        let jobs = Arc::clone(&self.jobs);
        let fired = self.fired.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    {
                        let mut jobs = jobs.lock();
                        if jobs.pending.get(&name).is_some_and(|p| p.generation == generation) {
                            jobs.pending.remove(&name);
                        }
                    }
                    debug!(job = %name, "job fired");
                    let _ = fired.send(name);
                }
            }
        });
    }

    fn cancel(&self, name: &str) {
        if let Some(pending) = self.jobs.lock().pending.remove(name) {
            pending.token.cancel();
            debug!(job = name, "job cancelled");
        }
    }
}
