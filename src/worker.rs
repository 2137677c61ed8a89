//! Message Worker
//!
//! Host loop around [`MessageProcessor`]: peek, process, idle when the queue
//! is empty, back off when a cycle fails, stop on shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::WorkerSettings;
use crate::processor::{MessageProcessor, Outcome, ProcessError};

/// Configuration for the message worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent processing tasks
    pub concurrency: usize,
    /// Sleep after finding the queue empty
    pub idle_delay: Duration,
    /// Sleep after a failed cycle
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            idle_delay: Duration::from_secs(10),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            concurrency: settings.concurrency.max(1),
            idle_delay: Duration::from_millis(settings.idle_delay_ms),
            error_backoff: Duration::from_millis(settings.error_backoff_ms),
        }
    }
}

// ============================================================
// SHUTDOWN SIGNALING
// ============================================================

/// Shutdown signal for graceful worker termination
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every sleeping task
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless shutdown arrives first.
    ///
    /// Returns `true` if shutdown was requested.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent request is not missed
        notified.as_mut().enable();

        if self.is_shutdown_requested() {
            return true;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_shutdown_requested(),
            _ = notified => true,
        }
    }
}

// ============================================================
// STATISTICS
// ============================================================

#[derive(Debug, Default)]
pub struct WorkerStats {
    pub processed: AtomicU64,
    pub completed: AtomicU64,
    pub rescheduled: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub abandoned: AtomicU64,
    /// Cycles that failed before a settlement was issued
    pub errors: AtomicU64,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &Outcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Outcome::Completed => &self.completed,
            Outcome::Rescheduled { .. } => &self.rescheduled,
            Outcome::DeadLettered { .. } => &self.dead_lettered,
            Outcome::Abandoned => &self.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            rescheduled: self.rescheduled.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of stats (for reporting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub processed: u64,
    pub completed: u64,
    pub rescheduled: u64,
    pub dead_lettered: u64,
    pub abandoned: u64,
    pub errors: u64,
}

impl std::fmt::Display for WorkerStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Worker Stats: processed={} (completed={}, rescheduled={}, dead_lettered={}, abandoned={}), errors={}",
            self.processed,
            self.completed,
            self.rescheduled,
            self.dead_lettered,
            self.abandoned,
            self.errors
        )
    }
}

// ============================================================
// WORKER
// ============================================================

/// Message Worker
///
/// Cheap to clone; every clone shares the processor, shutdown signal and stats.
#[derive(Clone)]
pub struct MessageWorker {
    processor: Arc<MessageProcessor>,
    config: WorkerConfig,
    shutdown: Arc<ShutdownSignal>,
    stats: Arc<WorkerStats>,
}

impl MessageWorker {
    pub fn new(processor: Arc<MessageProcessor>, config: WorkerConfig) -> Self {
        Self {
            processor,
            config,
            shutdown: Arc::new(ShutdownSignal::new()),
            stats: Arc::new(WorkerStats::new()),
        }
    }

    pub fn with_defaults(processor: Arc<MessageProcessor>) -> Self {
        Self::new(processor, WorkerConfig::default())
    }

    pub fn shutdown_handle(&self) -> Arc<ShutdownSignal> {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Run `concurrency` processing tasks until shutdown is requested
    pub async fn run(&self) {
        info!(
            concurrency = self.config.concurrency,
            idle_delay_ms = self.config.idle_delay.as_millis() as u64,
            error_backoff_ms = self.config.error_backoff.as_millis() as u64,
            mode = ?self.processor.policy().transient,
            "Starting message worker"
        );

        let mut tasks = JoinSet::new();
        for task_id in 0..self.config.concurrency.max(1) {
            let worker = self.clone();
            tasks.spawn(async move { worker.run_task(task_id).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task panicked");
            }
        }

        info!("{}", self.stats.snapshot());
    }

    async fn run_task(&self, task_id: usize) {
        debug!(task_id, "Worker task started");

        while !self.shutdown.is_shutdown_requested() {
            let pause = match self.poll_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => self.config.idle_delay,
                Err(e) => {
                    self.stats.incr_errors();
                    error!(task_id, code = e.code(), error = %e, "Worker cycle failed");
                    self.config.error_backoff
                }
            };

            if self.shutdown.sleep(pause).await {
                break;
            }
        }

        debug!(task_id, "Worker task stopped");
    }

    /// Peek and process a single message.
    ///
    /// `Ok(None)` when the queue had nothing available.
    pub async fn poll_once(&self) -> Result<Option<Outcome>, ProcessError> {
        let Some(message) = self.processor.queue().peek().await? else {
            return Ok(None);
        };

        let outcome = self.processor.process(&message).await?;
        self.stats.record(&outcome);
        Ok(Some(outcome))
    }

    /// Process messages until the queue has nothing available
    pub async fn drain(&self) -> Result<usize, ProcessError> {
        let mut processed = 0;
        while self.poll_once().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }
}
