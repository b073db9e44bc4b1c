//! Dispatch workers: claim due entries, hand them to a transport, report the
//! outcome back to the queue.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use postroom_core::{Clock, SystemClock};
use postroom_queue::{MailQueue, QueueEntry, QueueError, Repository};

use crate::config::DispatchConfig;
use crate::transport::Transport;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("failed to spawn dispatch worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("configured max send attempts {configured} does not match queue policy {queue}")]
    PolicyMismatch { configured: u32, queue: u32 },
    #[error("dispatch workers panicked: {}", .workers.join(", "))]
    WorkersPanicked { workers: Vec<String> },
}

/// Delivery counters, cumulative over the dispatcher's life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatchStats {
    pub claimed: u64,
    pub sent: u64,
    pub retried: u64,
    pub failed: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Sent => self.sent += 1,
            Outcome::Retried => self.retried += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    fn merge(&mut self, other: &DispatchStats) {
        self.claimed += other.claimed;
        self.sent += other.sent;
        self.retried += other.retried;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Sent,
    Retried,
    Failed,
}

/// Handle to running dispatch workers.
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: Vec<mpsc::Sender<()>>,
    workers: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<DispatchStats>>,
}

impl DispatcherHandle {
    /// Stop every worker after its current batch and wait for it.
    ///
    /// Workers that died from a panic are logged and reported by name once
    /// all the others have stopped.
    pub fn shutdown(self) -> Result<(), DispatchError> {
        for tx in &self.shutdown {
            let _ = tx.send(());
        }

        let mut panicked = Vec::new();
        for worker in self.workers {
            let name = worker.thread().name().unwrap_or("dispatch-worker").to_string();
            if let Err(panic) = worker.join() {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!(worker = %name, panic = %reason, "dispatch worker panicked");
                panicked.push(name);
            }
        }

        if panicked.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::WorkersPanicked { workers: panicked })
        }
    }

    pub fn stats(&self) -> DispatchStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drives a [`MailQueue`] against a [`Transport`].
pub struct Dispatcher<R, T, C = SystemClock> {
    queue: Arc<MailQueue<R, C>>,
    transport: T,
    stats: Arc<Mutex<DispatchStats>>,
}

impl<R, T, C> Dispatcher<R, T, C>
where
    R: Repository,
    T: Transport,
    C: Clock,
{
    pub fn new(queue: Arc<MailQueue<R, C>>, transport: T) -> Self {
        Self {
            queue,
            transport,
            stats: Arc::new(Mutex::new(DispatchStats::default())),
        }
    }

    pub fn queue(&self) -> &MailQueue<R, C> {
        &self.queue
    }

    pub fn stats(&self) -> DispatchStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim up to `limit` due entries and deliver them one by one.
    ///
    /// Returns the counters of this batch only. Per-entry storage failures
    /// are logged and the entry is unlocked for a later pass; only a failed
    /// claim aborts the batch.
    pub fn run_once(&self, limit: usize) -> Result<DispatchStats, QueueError> {
        let now = self.queue.clock().now();
        let claimed = self.queue.claim_due(now, limit)?;

        let mut batch = DispatchStats {
            claimed: claimed.len() as u64,
            ..DispatchStats::default()
        };
        for mut entry in claimed {
            match self.deliver(&mut entry) {
                Ok(outcome) => batch.record(outcome),
                Err(e) => {
                    error!(
                        entry_id = %entry.id,
                        rid = %entry.rid,
                        error = %e,
                        "failed to record delivery"
                    );
                    if let Err(e) = self.queue.unlock(&mut entry) {
                        error!(entry_id = %entry.id, error = %e, "failed to unlock entry");
                    }
                }
            }
        }

        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .merge(&batch);
        Ok(batch)
    }

    fn deliver(&self, entry: &mut QueueEntry) -> Result<Outcome, QueueError> {
        debug!(
            entry_id = %entry.id,
            rid = %entry.rid,
            campaign_id = %entry.campaign_id,
            attempt = entry.send_attempt,
            "sending"
        );

        let cause = match self.transport.send(&entry.message()) {
            Ok(()) => {
                self.queue.success(entry)?;
                return Ok(Outcome::Sent);
            }
            Err(cause) => cause,
        };

        if cause.is_transient() {
            match self.queue.backoff(entry, &cause) {
                Ok(()) => return Ok(Outcome::Retried),
                Err(QueueError::MaxAttemptsExceeded { attempts, max }) => {
                    warn!(entry_id = %entry.id, attempts, max, "retry budget spent");
                }
                Err(e) => return Err(e),
            }
        }

        self.queue.error(entry, &cause)?;
        Ok(Outcome::Failed)
    }
}

impl<R, T, C> Dispatcher<R, T, C>
where
    R: Repository + 'static,
    T: Transport + 'static,
    C: Clock + 'static,
{
    /// Release every stale lock, then run `config.workers` threads until
    /// [`DispatcherHandle::shutdown`].
    ///
    /// Fails with [`DispatchError::PolicyMismatch`] before touching the queue
    /// when `config.max_send_attempts` disagrees with the queue's policy.
    /// Must be the only dispatcher over its repository: releasing locks
    /// while another one runs would hand its claimed entries out twice.
    pub fn start(self, config: DispatchConfig) -> Result<DispatcherHandle, DispatchError> {
        let policy = self.queue.policy();
        if config.backoff_policy() != policy {
            return Err(DispatchError::PolicyMismatch {
                configured: config.max_send_attempts,
                queue: policy.max_attempts,
            });
        }

        let released = self.queue.release_all_locks()?;
        info!(
            dispatcher = %config.name,
            workers = config.workers,
            released,
            "dispatcher starting"
        );

        let stats = Arc::clone(&self.stats);
        let dispatcher = Arc::new(self);
        let mut shutdown = Vec::with_capacity(config.workers);
        let mut workers = Vec::with_capacity(config.workers);

        for i in 0..config.workers {
            let (tx, rx) = mpsc::channel::<()>();
            let dispatcher = Arc::clone(&dispatcher);
            let config = config.clone();
            let name = format!("{}-{i}", config.name);

            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&dispatcher, &config, &name, rx));
            match spawned {
                Ok(join) => {
                    shutdown.push(tx);
                    workers.push(join);
                }
                Err(e) => {
                    let partial = DispatcherHandle {
                        shutdown,
                        workers,
                        stats,
                    };
                    if let Err(stop) = partial.shutdown() {
                        error!(error = %stop, "failed to stop workers after spawn failure");
                    }
                    return Err(DispatchError::Spawn(e));
                }
            }
        }

        Ok(DispatcherHandle {
            shutdown,
            workers,
            stats,
        })
    }
}

fn worker_loop<R, T, C>(
    dispatcher: &Dispatcher<R, T, C>,
    config: &DispatchConfig,
    name: &str,
    shutdown_rx: mpsc::Receiver<()>,
) where
    R: Repository,
    T: Transport,
    C: Clock,
{
    info!(worker = %name, "dispatch worker started");

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        let idle = match dispatcher.run_once(config.batch_size) {
            Ok(batch) => {
                if batch.claimed > 0 {
                    debug!(
                        worker = %name,
                        claimed = batch.claimed,
                        sent = batch.sent,
                        retried = batch.retried,
                        failed = batch.failed,
                        "batch done"
                    );
                }
                batch.claimed == 0
            }
            Err(e) => {
                error!(worker = %name, error = %e, "failed to claim due entries");
                true
            }
        };

        if idle {
            match shutdown_rx.recv_timeout(config.poll_interval) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => {}
            }
        }
    }

    info!(worker = %name, "dispatch worker stopped");
}
