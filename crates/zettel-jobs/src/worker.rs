//! Bounded worker pool for background embedding recompute.
//!
//! A save enqueues `(owner, card)` without waiting; N worker tasks drain the
//! queue, retry transient failures with linear backoff and record a visible
//! status per card. Stored embeddings lag a save by at most
//! [`EmbedWorkerConfig::staleness_bound`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use zettel_core::defaults::{
    EMBED_MAX_RETRIES, EMBED_MAX_RETRIES_LIMIT, EMBED_QUEUE_CAPACITY, EMBED_RETRY_BACKOFF_MS,
    EMBED_STATUS_TTL_SECS, EMBED_TIMEOUT_SECS, EMBED_WORKERS, EVENT_BUS_CAPACITY,
};
use zettel_core::{EmbeddingScheduler, Error, Result};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Configuration for the embedding worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedWorkerConfig {
    /// Number of concurrent worker tasks.
    pub workers: usize,
    /// Capacity of the job queue.
    pub queue_capacity: usize,
    /// Retries after the first failed attempt, at most `EMBED_MAX_RETRIES_LIMIT`.
    pub max_retries: u32,
    /// Backoff step; retry `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// Upper bound on a single attempt.
    pub job_timeout: Duration,
    /// How long a `Succeeded` status is kept.
    pub status_ttl: Duration,
    /// Whether scheduling queues work at all.
    pub enabled: bool,
}

impl Default for EmbedWorkerConfig {
    fn default() -> Self {
        Self {
            workers: EMBED_WORKERS,
            queue_capacity: EMBED_QUEUE_CAPACITY,
            max_retries: EMBED_MAX_RETRIES,
            retry_backoff: Duration::from_millis(EMBED_RETRY_BACKOFF_MS),
            job_timeout: Duration::from_secs(EMBED_TIMEOUT_SECS),
            status_ttl: Duration::from_secs(EMBED_STATUS_TTL_SECS),
            enabled: true,
        }
    }
}

impl EmbedWorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `ZETTEL_EMBED_ENABLED` | `true` | Enable/disable embedding recompute |
    /// | `ZETTEL_EMBED_WORKERS` | `2` | Concurrent workers |
    /// | `ZETTEL_EMBED_QUEUE` | `256` | Queue capacity |
    /// | `ZETTEL_EMBED_MAX_RETRIES` | `3` | Retries after the first attempt (max 100) |
    /// | `ZETTEL_EMBED_RETRY_BACKOFF_MS` | `2000` | Linear backoff step |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = std::env::var("ZETTEL_EMBED_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let workers = std::env::var("ZETTEL_EMBED_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.workers)
            .max(1);

        let queue_capacity = std::env::var("ZETTEL_EMBED_QUEUE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.queue_capacity)
            .max(1);

        let max_retries = std::env::var("ZETTEL_EMBED_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults.max_retries)
            .min(EMBED_MAX_RETRIES_LIMIT);

        let retry_backoff = std::env::var("ZETTEL_EMBED_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_backoff);

        Self {
            workers,
            queue_capacity,
            max_retries,
            retry_backoff,
            enabled,
            ..defaults
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.min(EMBED_MAX_RETRIES_LIMIT);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_status_ttl(mut self, ttl: Duration) -> Self {
        self.status_ttl = ttl;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Worst-case delay between a save and its embeddings being stored.
    ///
    /// Queue wait (every job ahead finishing within one timeout, spread over
    /// the workers) plus `max_retries + 1` timed-out attempts plus the linear
    /// backoff between them. Saturates instead of overflowing when fields are
    /// set directly to extreme values.
    pub fn staleness_bound(&self) -> Duration {
        let workers = u32::try_from(self.workers.max(1)).unwrap_or(u32::MAX);
        let capacity = u32::try_from(self.queue_capacity).unwrap_or(u32::MAX);
        let queued_rounds = capacity.div_ceil(workers);
        let attempts = self.max_retries.saturating_add(1);
        // Exact in u64 for any u32 retry count.
        let retries = u64::from(self.max_retries);
        let backoff_steps =
            u32::try_from(retries * (retries + 1) / 2).unwrap_or(u32::MAX);

        self.job_timeout
            .saturating_mul(queued_rounds)
            .saturating_add(self.job_timeout.saturating_mul(attempts))
            .saturating_add(self.retry_backoff.saturating_mul(backoff_steps))
    }
}

/// Visible state of the latest recompute for a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EmbedStatus {
    Queued,
    Running { attempt: u32 },
    Succeeded { at: DateTime<Utc> },
    Failed { attempts: u32, error: String },
}

/// Event emitted by the worker pool.
#[derive(Debug, Clone)]
pub enum EmbedEvent {
    /// A worker task started.
    WorkerStarted { worker: usize },
    /// A worker task stopped after the queue closed.
    WorkerStopped { worker: usize },
    /// A card was queued.
    JobQueued { owner_id: Uuid, card_pk: Uuid },
    /// An attempt started.
    JobStarted { card_pk: Uuid, attempt: u32 },
    /// An attempt failed and will be retried.
    JobRetrying {
        card_pk: Uuid,
        attempt: u32,
        error: String,
        backoff_ms: u64,
    },
    /// Embeddings stored.
    JobCompleted { card_pk: Uuid, chunk_count: usize },
    /// The job gave up.
    JobFailed {
        card_pk: Uuid,
        attempts: u32,
        error: String,
    },
}

#[derive(Debug, Clone, Copy)]
struct EmbedJob {
    owner_id: Uuid,
    card_pk: Uuid,
}

/// Drop `Succeeded` entries older than `ttl`, keeping `keep`.
///
/// Queued, running and failed entries stay until overwritten.
fn prune_succeeded(statuses: &mut HashMap<Uuid, EmbedStatus>, keep: Uuid, ttl: Duration) {
    let Some(cutoff) = chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
    else {
        return;
    };
    let before = statuses.len();
    statuses.retain(|card_pk, status| match status {
        EmbedStatus::Succeeded { at } => *card_pk == keep || *at >= cutoff,
        _ => true,
    });
    let pruned = before - statuses.len();
    if pruned > 0 {
        debug!(pruned, remaining = statuses.len(), "Pruned expired embed statuses");
    }
}

/// State shared between the pool handle and its worker tasks.
struct Shared {
    config: EmbedWorkerConfig,
    handler: Arc<dyn JobHandler>,
    statuses: RwLock<HashMap<Uuid, EmbedStatus>>,
    event_tx: broadcast::Sender<EmbedEvent>,
}

impl Shared {
    fn set_status(&self, card_pk: Uuid, status: EmbedStatus) {
        let succeeded = matches!(status, EmbedStatus::Succeeded { .. });
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        statuses.insert(card_pk, status);
        if succeeded {
            prune_succeeded(&mut statuses, card_pk, self.config.status_ttl);
        }
    }

    fn status(&self, card_pk: Uuid) -> Option<EmbedStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&card_pk)
            .cloned()
    }

    fn emit(&self, event: EmbedEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Run one job to a terminal status.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "embed_worker", op = "process", card_pk = %job.card_pk))]
    async fn process(&self, job: EmbedJob) {
        let start = Instant::now();
        let max_attempts = self.config.max_retries.saturating_add(1);

        for attempt in 1..=max_attempts {
            self.set_status(job.card_pk, EmbedStatus::Running { attempt });
            self.emit(EmbedEvent::JobStarted {
                card_pk: job.card_pk,
                attempt,
            });

            let ctx = JobContext {
                owner_id: job.owner_id,
                card_pk: job.card_pk,
                attempt,
            };
            let result =
                match tokio::time::timeout(self.config.job_timeout, self.handler.execute(ctx))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => JobResult::Retry(format!(
                        "attempt exceeded timeout of {}ms",
                        self.config.job_timeout.as_millis()
                    )),
                };

            match result {
                JobResult::Success(chunk_count) => {
                    self.set_status(job.card_pk, EmbedStatus::Succeeded { at: Utc::now() });
                    info!(
                        attempt,
                        chunk_count,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Embedding job completed"
                    );
                    self.emit(EmbedEvent::JobCompleted {
                        card_pk: job.card_pk,
                        chunk_count,
                    });
                    return;
                }
                JobResult::Failed(error) => {
                    self.fail(job.card_pk, attempt, error);
                    return;
                }
                JobResult::Retry(error) if attempt < max_attempts => {
                    let backoff = self.config.retry_backoff.saturating_mul(attempt);
                    let backoff_ms = backoff.as_millis() as u64;
                    warn!(attempt, %error, backoff_ms, "Embedding job failed, retrying");
                    self.emit(EmbedEvent::JobRetrying {
                        card_pk: job.card_pk,
                        attempt,
                        error,
                        backoff_ms,
                    });
                    sleep(backoff).await;
                }
                JobResult::Retry(error) => {
                    self.fail(job.card_pk, attempt, error);
                    return;
                }
            }
        }
    }

    fn fail(&self, card_pk: Uuid, attempts: u32, error: String) {
        error!(%card_pk, attempts, %error, "Embedding job failed");
        self.set_status(
            card_pk,
            EmbedStatus::Failed {
                attempts,
                error: error.clone(),
            },
        );
        self.emit(EmbedEvent::JobFailed {
            card_pk,
            attempts,
            error,
        });
    }
}

/// Pool of embedding workers fed by a bounded queue.
///
/// Implements [`EmbeddingScheduler`], so it can be handed to the engine as
/// the post-save hook.
pub struct EmbedWorkerPool {
    shared: Arc<Shared>,
    queue_tx: Mutex<Option<mpsc::Sender<EmbedJob>>>,
    queue_rx: Mutex<Option<mpsc::Receiver<EmbedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EmbedWorkerPool {
    /// Create a pool without starting its workers.
    ///
    /// Jobs scheduled before [`start`](Self::start) wait in the queue.
    pub fn new(config: EmbedWorkerConfig, handler: Arc<dyn JobHandler>) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                handler,
                statuses: RwLock::new(HashMap::new()),
                event_tx,
            }),
            queue_tx: Mutex::new(Some(queue_tx)),
            queue_rx: Mutex::new(Some(queue_rx)),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Create a pool and start its workers. Requires a Tokio runtime.
    pub fn spawn(config: EmbedWorkerConfig, handler: Arc<dyn JobHandler>) -> Self {
        let pool = Self::new(config, handler);
        pool.start();
        pool
    }

    /// Spawn the worker tasks. Calling it again has no effect.
    pub fn start(&self) {
        let Some(queue_rx) = lock(&self.queue_rx).take() else {
            return;
        };
        let config = &self.shared.config;
        if !config.enabled {
            info!(
                subsystem = "jobs",
                component = "embed_worker",
                "Embedding worker pool is disabled, not starting"
            );
            return;
        }

        info!(
            subsystem = "jobs",
            component = "embed_worker",
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            max_retries = config.max_retries,
            staleness_bound_ms = config.staleness_bound().as_millis() as u64,
            "Embedding worker pool started"
        );

        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let mut workers = lock(&self.workers);
        for worker in 0..config.workers.max(1) {
            let shared = self.shared.clone();
            let queue_rx = queue_rx.clone();
            workers.push(tokio::spawn(async move {
                shared.emit(EmbedEvent::WorkerStarted { worker });
                loop {
                    let next = queue_rx.lock().await.recv().await;
                    let Some(job) = next else {
                        break;
                    };
                    shared.process(job).await;
                }
                debug!(worker, "Embedding worker stopped");
                shared.emit(EmbedEvent::WorkerStopped { worker });
            }));
        }
    }

    /// Queue a recompute without waiting.
    ///
    /// A card that is already queued is not queued twice. A full or closed
    /// queue is an `Error::Job`; a full queue also marks the card `Failed`.
    pub fn submit(&self, owner_id: Uuid, card_pk: Uuid) -> Result<()> {
        if !self.shared.config.enabled {
            return Ok(());
        }
        if self.shared.status(card_pk) == Some(EmbedStatus::Queued) {
            debug!(%card_pk, "Embedding job already queued");
            return Ok(());
        }

        let guard = lock(&self.queue_tx);
        let Some(queue_tx) = guard.as_ref() else {
            return Err(Error::Job("embedding queue is shut down".to_string()));
        };

        // Set before sending: a worker may start the job immediately.
        self.shared.set_status(card_pk, EmbedStatus::Queued);
        match queue_tx.try_send(EmbedJob { owner_id, card_pk }) {
            Ok(()) => {
                self.shared
                    .emit(EmbedEvent::JobQueued { owner_id, card_pk });
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let error = "queue full".to_string();
                warn!(%card_pk, "Embedding queue full, job dropped");
                self.shared.set_status(
                    card_pk,
                    EmbedStatus::Failed {
                        attempts: 0,
                        error: error.clone(),
                    },
                );
                self.shared.emit(EmbedEvent::JobFailed {
                    card_pk,
                    attempts: 0,
                    error,
                });
                Err(Error::Job("embedding queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.set_status(
                    card_pk,
                    EmbedStatus::Failed {
                        attempts: 0,
                        error: "queue closed".to_string(),
                    },
                );
                Err(Error::Job("embedding queue is shut down".to_string()))
            }
        }
    }

    /// Latest status of a card's recompute.
    ///
    /// `None` if the card was never scheduled, or if it succeeded longer ago
    /// than `status_ttl`.
    pub fn status(&self, card_pk: Uuid) -> Option<EmbedStatus> {
        self.shared.status(card_pk)
    }

    /// Subscribe to pool events.
    pub fn events(&self) -> broadcast::Receiver<EmbedEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn config(&self) -> &EmbedWorkerConfig {
        &self.shared.config
    }

    /// See [`EmbedWorkerConfig::staleness_bound`].
    pub fn staleness_bound(&self) -> Duration {
        self.shared.config.staleness_bound()
    }

    /// Close the queue and wait until queued and in-flight jobs finish.
    pub async fn shutdown(&self) {
        lock(&self.queue_tx).take();
        let workers = std::mem::take(&mut *lock(&self.workers));
        for handle in workers {
            if let Err(e) = handle.await {
                error!(
                    subsystem = "jobs",
                    component = "embed_worker",
                    error = ?e,
                    "Embedding worker panicked"
                );
            }
        }
        info!(
            subsystem = "jobs",
            component = "embed_worker",
            "Embedding worker pool stopped"
        );
    }
}

impl EmbeddingScheduler for EmbedWorkerPool {
    fn schedule(&self, owner_id: Uuid, card_pk: Uuid) -> Result<()> {
        self.submit(owner_id, card_pk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Handler replaying a fixed script, then succeeding.
    struct ScriptedHandler {
        script: Mutex<Vec<JobResult>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl ScriptedHandler {
        fn new(script: Vec<JobResult>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        async fn execute(&self, _ctx: JobContext) -> JobResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            let mut script = lock(&self.script);
            if script.is_empty() {
                JobResult::Success(1)
            } else {
                script.remove(0)
            }
        }
    }

    fn fast_config() -> EmbedWorkerConfig {
        EmbedWorkerConfig::default()
            .with_workers(1)
            .with_retry_backoff(Duration::from_millis(1))
            .with_job_timeout(Duration::from_secs(5))
    }

    async fn wait_terminal(events: &mut broadcast::Receiver<EmbedEvent>) -> EmbedEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(event @ EmbedEvent::JobCompleted { .. })
                    | Ok(event @ EmbedEvent::JobFailed { .. }) => return event,
                    Ok(_) => continue,
                    Err(e) => panic!("event channel error: {:?}", e),
                }
            }
        })
        .await
        .expect("job did not finish in time")
    }

    #[test]
    fn test_config_default() {
        let config = EmbedWorkerConfig::default();
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff, Duration::from_millis(2000));
        assert!(config.enabled);
    }

    #[test]
    fn test_config_builders_clamp() {
        let config = EmbedWorkerConfig::default()
            .with_workers(0)
            .with_queue_capacity(0);
        assert_eq!(config.workers, 1);
        assert_eq!(config.queue_capacity, 1);
    }

    #[test]
    fn test_staleness_bound() {
        let config = EmbedWorkerConfig::default()
            .with_workers(2)
            .with_queue_capacity(4)
            .with_max_retries(2)
            .with_retry_backoff(Duration::from_secs(1))
            .with_job_timeout(Duration::from_secs(10));
        // queue: 2 rounds * 10s, attempts: 3 * 10s, backoff: 1s + 2s
        assert_eq!(config.staleness_bound(), Duration::from_secs(53));
    }

    #[test]
    fn test_staleness_bound_large_retry_count() {
        let config = EmbedWorkerConfig::default()
            .with_workers(2)
            .with_queue_capacity(256)
            .with_max_retries(100_000)
            .with_retry_backoff(Duration::from_secs(2))
            .with_job_timeout(Duration::from_secs(60));
        assert_eq!(config.max_retries, EMBED_MAX_RETRIES_LIMIT);
        // queue: 128 * 60s, attempts: 101 * 60s, backoff: 2s * 5050
        assert_eq!(config.staleness_bound(), Duration::from_secs(7680 + 6060 + 10100));
    }

    #[test]
    fn test_staleness_bound_saturates_on_extreme_fields() {
        let max = u64::from(u32::MAX);
        let config = EmbedWorkerConfig {
            workers: 1,
            queue_capacity: usize::MAX,
            max_retries: u32::MAX,
            retry_backoff: Duration::from_secs(2),
            job_timeout: Duration::from_secs(30),
            ..EmbedWorkerConfig::default()
        };
        // Every factor clamps to u32::MAX instead of wrapping.
        assert_eq!(config.staleness_bound(), Duration::from_secs((30 + 30 + 2) * max));

        let config = EmbedWorkerConfig {
            max_retries: 3,
            job_timeout: Duration::from_secs(60),
            ..config
        };
        assert_eq!(
            config.staleness_bound(),
            Duration::from_secs(60 * max + 60 * 4 + 2 * 6)
        );
    }

    #[test]
    fn test_prune_keeps_recent_and_unfinished() {
        let (old, recent, failed, current) =
            (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        let long_ago = Utc::now() - chrono::Duration::hours(2);
        let mut statuses = HashMap::from([
            (old, EmbedStatus::Succeeded { at: long_ago }),
            (recent, EmbedStatus::Succeeded { at: Utc::now() }),
            (
                failed,
                EmbedStatus::Failed {
                    attempts: 4,
                    error: "down".into(),
                },
            ),
            (current, EmbedStatus::Succeeded { at: long_ago }),
        ]);

        prune_succeeded(&mut statuses, current, Duration::from_secs(3600));

        assert!(!statuses.contains_key(&old));
        assert!(statuses.contains_key(&recent));
        assert!(statuses.contains_key(&failed));
        assert!(statuses.contains_key(&current));
    }

    #[tokio::test]
    async fn test_succeeded_status_expires() {
        let handler = ScriptedHandler::new(vec![]);
        let config = fast_config().with_status_ttl(Duration::ZERO);
        let pool = EmbedWorkerPool::spawn(config, handler);
        let mut events = pool.events();
        let (first, second) = (Uuid::now_v7(), Uuid::now_v7());

        pool.schedule(Uuid::now_v7(), first).unwrap();
        wait_terminal(&mut events).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        pool.schedule(Uuid::now_v7(), second).unwrap();
        wait_terminal(&mut events).await;

        assert_eq!(pool.status(first), None);
        assert!(matches!(
            pool.status(second),
            Some(EmbedStatus::Succeeded { .. })
        ));
        pool.shutdown().await;
    }

    #[test]
    fn test_status_serialization() {
        let status = EmbedStatus::Running { attempt: 2 };
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"state":"running","attempt":2}"#);
    }

    #[tokio::test]
    async fn test_job_succeeds() {
        let handler = ScriptedHandler::new(vec![]);
        let pool = EmbedWorkerPool::spawn(fast_config(), handler.clone());
        let mut events = pool.events();
        let card = Uuid::now_v7();

        pool.schedule(Uuid::now_v7(), card).unwrap();
        let event = wait_terminal(&mut events).await;
        assert!(matches!(event, EmbedEvent::JobCompleted { card_pk, .. } if card_pk == card));
        assert!(matches!(
            pool.status(card),
            Some(EmbedStatus::Succeeded { .. })
        ));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let handler = ScriptedHandler::new(vec![
            JobResult::Retry("busy".into()),
            JobResult::Retry("busy".into()),
        ]);
        let pool = EmbedWorkerPool::spawn(fast_config(), handler.clone());
        let mut events = pool.events();

        pool.schedule(Uuid::now_v7(), Uuid::now_v7()).unwrap();
        let event = wait_terminal(&mut events).await;
        assert!(matches!(event, EmbedEvent::JobCompleted { .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let handler = ScriptedHandler::new(vec![
            JobResult::Retry("down".into()),
            JobResult::Retry("down".into()),
            JobResult::Retry("down".into()),
        ]);
        let pool = EmbedWorkerPool::spawn(fast_config().with_max_retries(1), handler.clone());
        let mut events = pool.events();
        let card = Uuid::now_v7();

        pool.schedule(Uuid::now_v7(), card).unwrap();
        wait_terminal(&mut events).await;
        assert_eq!(
            pool.status(card),
            Some(EmbedStatus::Failed {
                attempts: 2,
                error: "down".to_string()
            })
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let handler = ScriptedHandler::new(vec![JobResult::Failed("gone".into())]);
        let pool = EmbedWorkerPool::spawn(fast_config(), handler.clone());
        let mut events = pool.events();

        pool.schedule(Uuid::now_v7(), Uuid::now_v7()).unwrap();
        let event = wait_terminal(&mut events).await;
        assert!(matches!(event, EmbedEvent::JobFailed { attempts: 1, .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_attempt_times_out_and_retries() {
        let handler = ScriptedHandler::slow(Duration::from_millis(200));
        let config = fast_config()
            .with_max_retries(1)
            .with_job_timeout(Duration::from_millis(20));
        let pool = EmbedWorkerPool::spawn(config, handler.clone());
        let mut events = pool.events();

        pool.schedule(Uuid::now_v7(), Uuid::now_v7()).unwrap();
        let event = wait_terminal(&mut events).await;
        assert!(matches!(event, EmbedEvent::JobFailed { attempts: 2, .. }));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let handler = ScriptedHandler::new(vec![]);
        let pool = EmbedWorkerPool::new(fast_config().with_queue_capacity(1), handler);
        let (first, second) = (Uuid::now_v7(), Uuid::now_v7());

        pool.schedule(Uuid::now_v7(), first).unwrap();
        // Same card again is coalesced, not a second queue slot.
        pool.schedule(Uuid::now_v7(), first).unwrap();

        let err = pool.schedule(Uuid::now_v7(), second).unwrap_err();
        assert!(matches!(err, Error::Job(_)));
        assert_eq!(pool.status(first), Some(EmbedStatus::Queued));
        assert!(matches!(
            pool.status(second),
            Some(EmbedStatus::Failed { attempts: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_jobs_queued_before_start_run_after_start() {
        let handler = ScriptedHandler::new(vec![]);
        let pool = EmbedWorkerPool::new(fast_config(), handler.clone());
        let mut events = pool.events();

        pool.schedule(Uuid::now_v7(), Uuid::now_v7()).unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        pool.start();
        wait_terminal(&mut events).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_jobs() {
        let handler = ScriptedHandler::slow(Duration::from_millis(30));
        let pool = EmbedWorkerPool::spawn(fast_config().with_workers(2), handler.clone());
        let cards: Vec<Uuid> = (0..3).map(|_| Uuid::now_v7()).collect();
        for card in &cards {
            pool.schedule(Uuid::now_v7(), *card).unwrap();
        }

        pool.shutdown().await;
        for card in &cards {
            assert!(matches!(
                pool.status(*card),
                Some(EmbedStatus::Succeeded { .. })
            ));
        }

        let err = pool.schedule(Uuid::now_v7(), Uuid::now_v7()).unwrap_err();
        assert!(matches!(err, Error::Job(_)));
    }

    #[tokio::test]
    async fn test_disabled_pool_ignores_schedule() {
        let handler = ScriptedHandler::new(vec![]);
        let pool = EmbedWorkerPool::spawn(fast_config().with_enabled(false), handler.clone());
        let card = Uuid::now_v7();

        pool.schedule(Uuid::now_v7(), card).unwrap();
        assert!(pool.status(card).is_none());
        pool.shutdown().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }
}
