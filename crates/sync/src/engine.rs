//! Background drain loop over the durable sync queue.
//!
//! Each cycle: watchdog sweep, retention prune, peek a batch (the queue
//! guarantees one item per entity key), claim it, dispatch concurrently,
//! settle every item according to the push outcome. All queue writes are
//! single transactions, so a crash or shutdown mid-cycle leaves items either
//! untouched or in `syncing` for the next watchdog sweep to reclaim.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use comanda_core::sync::{
    backoff_delay, idempotency_key, with_jitter, RetryClass, SyncQueueItem, SyncQueueStore,
    DEFAULT_MAX_ATTEMPTS,
};
use comanda_core::Result;

use crate::client::{SyncEndpoint, SyncPushOutcome, SyncPushRequest};
use crate::connectivity::{AlwaysOnline, ConnectivitySignal};
use crate::error::SyncApiError;

/// Poll delay while the previous cycle still found work.
const SHORT_POLL: Duration = Duration::from_secs(2);
/// Poll stretch factor while the connectivity hint says offline.
const OFFLINE_POLL_FACTOR: u32 = 4;

/// Engine tuning. Defaults are design values; hosts may override.
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Items claimed per drain cycle.
    pub batch_size: i64,
    /// Dispatch ceiling before an item is dead-lettered.
    pub max_attempts: i32,
    /// First retry delay; doubles per attempt.
    pub base_backoff: Duration,
    /// Ceiling on the retry delay.
    pub max_backoff: Duration,
    /// Concurrent pushes per cycle. Safe because a batch never carries two
    /// items for the same entity key.
    pub dispatch_concurrency: usize,
    /// Watchdog threshold for items stuck in `syncing`.
    pub syncing_timeout: Duration,
    /// Age after which settled `synced` rows are pruned.
    pub synced_retention_days: i64,
    /// Idle delay between drain cycles.
    pub poll_interval: Duration,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(300),
            dispatch_concurrency: 4,
            syncing_timeout: Duration::from_secs(120),
            synced_retention_days: 7,
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// What one drain cycle did, for logging and observability surfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainCycleReport {
    pub dispatched: usize,
    pub synced: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub reset_by_watchdog: usize,
    pub pruned: usize,
    pub duration_ms: u64,
}

enum DispatchOutcome {
    Synced,
    Conflict,
    Failed,
}

pub struct SyncEngine {
    queue: Arc<dyn SyncQueueStore>,
    endpoint: Arc<dyn SyncEndpoint>,
    connectivity: Arc<dyn ConnectivitySignal>,
    config: SyncEngineConfig,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<dyn SyncQueueStore>,
        endpoint: Arc<dyn SyncEndpoint>,
        config: SyncEngineConfig,
    ) -> Self {
        Self {
            queue,
            endpoint,
            connectivity: Arc::new(AlwaysOnline),
            config,
        }
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn ConnectivitySignal>) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// One full drain cycle. Safe to call concurrently with entity writes;
    /// the queue's claim semantics keep entity keys single-writer.
    pub async fn run_drain_cycle(&self) -> Result<DrainCycleReport> {
        let started = Instant::now();
        let mut report = DrainCycleReport::default();

        report.reset_by_watchdog = self
            .queue
            .reset_stuck_syncing(
                self.config.syncing_timeout.as_secs() as i64,
                self.config.max_attempts,
            )
            .await?;
        if report.reset_by_watchdog > 0 {
            warn!(
                "[SyncEngine] Watchdog reset {} stuck item(s)",
                report.reset_by_watchdog
            );
        }

        report.pruned = self
            .queue
            .prune_synced(self.config.synced_retention_days)
            .await?;

        let batch = self
            .queue
            .peek_batch(self.config.batch_size, self.config.max_attempts)?;
        let ids: Vec<i64> = batch.iter().map(|item| item.id).collect();
        let claimed = self.queue.mark_syncing(ids).await?;
        report.dispatched = claimed.len();

        let outcomes = stream::iter(claimed.into_iter().map(|item| self.dispatch_one(item)))
            .buffer_unordered(self.config.dispatch_concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        for outcome in outcomes {
            match outcome? {
                DispatchOutcome::Synced => report.synced += 1,
                DispatchOutcome::Conflict => report.conflicts += 1,
                DispatchOutcome::Failed => report.failed += 1,
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        if report.dispatched > 0 {
            debug!(
                "[SyncEngine] Cycle: {} dispatched, {} synced, {} conflicts, {} failed ({}ms)",
                report.dispatched,
                report.synced,
                report.conflicts,
                report.failed,
                report.duration_ms
            );
        }
        Ok(report)
    }

    /// Push one claimed item and settle it.
    async fn dispatch_one(&self, item: SyncQueueItem) -> Result<DispatchOutcome> {
        let payload: serde_json::Value = match serde_json::from_str(&item.payload) {
            Ok(value) => value,
            // Only our own writer produces payloads; an unreadable one is a
            // local defect that retrying cannot fix.
            Err(err) => {
                self.queue
                    .mark_failed(
                        item.id,
                        format!("Unreadable payload snapshot: {}", err),
                        Some("bad_payload".to_string()),
                        None,
                    )
                    .await?;
                return Ok(DispatchOutcome::Failed);
            }
        };

        let request = SyncPushRequest {
            entity_type: item.entity_type,
            entity_id: item.entity_id.clone(),
            operation: item.operation,
            payload,
            idempotency_key: idempotency_key(item.entity_type, &item.entity_id, item.id),
        };

        match self.endpoint.push(request).await {
            Ok(SyncPushOutcome::Applied) | Ok(SyncPushOutcome::AlreadyApplied) => {
                self.queue.mark_synced(vec![item.id]).await?;
                Ok(DispatchOutcome::Synced)
            }
            Ok(SyncPushOutcome::Rejected { reason }) => {
                self.queue.mark_conflict(item.id, reason).await?;
                Ok(DispatchOutcome::Conflict)
            }
            Err(err) => self.settle_push_error(&item, err).await,
        }
    }

    async fn settle_push_error(
        &self,
        item: &SyncQueueItem,
        err: SyncApiError,
    ) -> Result<DispatchOutcome> {
        let code = error_code(&err);
        match err.retry_class() {
            RetryClass::Conflict => {
                self.queue.mark_conflict(item.id, err.to_string()).await?;
                Ok(DispatchOutcome::Conflict)
            }
            RetryClass::Permanent => {
                warn!(
                    "[SyncEngine] Item {} failed permanently: {}",
                    item.id, err
                );
                self.queue
                    .mark_failed(item.id, err.to_string(), Some(code), None)
                    .await?;
                Ok(DispatchOutcome::Failed)
            }
            RetryClass::Transient => {
                // attempt_count already reflects this dispatch.
                let next_retry_at = if item.attempt_count < self.config.max_attempts {
                    let delay = with_jitter(backoff_delay(
                        item.attempt_count,
                        self.config.base_backoff,
                        self.config.max_backoff,
                    ));
                    let at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                    Some(at.to_rfc3339())
                } else {
                    warn!(
                        "[SyncEngine] Item {} exhausted {} attempts; dead-lettering",
                        item.id, item.attempt_count
                    );
                    None
                };
                self.queue
                    .mark_failed(item.id, err.to_string(), Some(code), next_retry_at)
                    .await?;
                Ok(DispatchOutcome::Failed)
            }
        }
    }

    /// Start the background loop. The engine dispatches even while the
    /// connectivity hint says offline if asked to; the hint only stretches
    /// the poll interval.
    pub fn spawn(self: Arc<Self>) -> SyncEngineHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!("[SyncEngine] Started");
            loop {
                let delay = if !self.connectivity.is_online() {
                    debug!("[SyncEngine] Offline; stretching poll interval");
                    self.config.poll_interval * OFFLINE_POLL_FACTOR
                } else {
                    match self.run_drain_cycle().await {
                        Ok(report) if report.dispatched > 0 => SHORT_POLL,
                        Ok(_) => self.config.poll_interval,
                        Err(err) => {
                            error!("[SyncEngine] Drain cycle failed: {}", err);
                            self.config.poll_interval
                        }
                    }
                };

                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            info!("[SyncEngine] Stopped");
        });

        SyncEngineHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

fn error_code(err: &SyncApiError) -> String {
    match err.status_code() {
        Some(status) => status.to_string(),
        None => match err {
            SyncApiError::Http(_) => "transport".to_string(),
            SyncApiError::Json(_) => "bad_payload".to_string(),
            _ => "invalid_request".to_string(),
        },
    }
}

/// Handle to a running engine. Dropping it without calling `shutdown`
/// detaches the loop.
pub struct SyncEngineHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncEngineHandle {
    /// Stop the loop between cycles and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
