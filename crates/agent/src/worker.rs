use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use farmhand_core::config::{AppConfig, WorkerConfig};
use farmhand_core::domain::message::{NackOutcome, QueuedMessage, SenderKey};
use farmhand_db::repositories::{
    MessageQueue, MetricsSink, ReclaimedMessage, RepositoryError, SqlInventoryStore,
    SqlMessageQueue, SqlMetricsSink, SqlPendingActionRepository, SqlSessionRepository,
};
use farmhand_db::DbPool;

use crate::notify::{notifier_from_config, Notifier, NotifyError};
use crate::replies::DROPPED_APOLOGY;
use crate::runtime::{ConversationRuntime, MessageHandler};

/// Longest lease honoured; larger configured values are clamped to it.
const MAX_INFLIGHT_LEASE_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub interval: Duration,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub inflight_lease: chrono::Duration,
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        let lease_secs = i64::try_from(config.inflight_lease_secs)
            .unwrap_or(MAX_INFLIGHT_LEASE_SECS)
            .min(MAX_INFLIGHT_LEASE_SECS);
        Self {
            interval: Duration::from_millis(config.interval_ms),
            batch_size: config.batch_size.max(1),
            max_concurrency: config.max_concurrency.max(1),
            inflight_lease: chrono::Duration::seconds(lease_secs),
        }
    }
}

/// Counters for one polling pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub reclaimed: usize,
    pub popped: usize,
    pub acked: usize,
    pub requeued: usize,
    pub dropped: usize,
    /// Ack, nack or metric writes that failed after the message was handled.
    pub queue_errors: usize,
}

impl BatchReport {
    pub fn is_idle(&self) -> bool {
        self.reclaimed == 0 && self.popped == 0
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.reclaimed += other.reclaimed;
        self.popped += other.popped;
        self.acked += other.acked;
        self.requeued += other.requeued;
        self.dropped += other.dropped;
        self.queue_errors += other.queue_errors;
    }
}

/// Polls the queue and feeds messages to the handler, one sender at a time.
#[derive(Clone)]
pub struct QueueWorker {
    queue: Arc<dyn MessageQueue>,
    metrics: Arc<dyn MetricsSink>,
    handler: Arc<dyn MessageHandler>,
    notifier: Arc<dyn Notifier>,
    settings: WorkerSettings,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        metrics: Arc<dyn MetricsSink>,
        handler: Arc<dyn MessageHandler>,
        notifier: Arc<dyn Notifier>,
        settings: WorkerSettings,
    ) -> Self {
        Self { queue, metrics, handler, notifier, settings }
    }

    /// Wires the worker and its conversation runtime to the SQL repositories.
    pub fn sql_backed(pool: &DbPool, config: &AppConfig) -> Result<Self, NotifyError> {
        let notifier = notifier_from_config(&config.notifier)?;
        let runtime = ConversationRuntime::new(
            Arc::new(SqlSessionRepository::new(pool.clone())),
            Arc::new(SqlPendingActionRepository::new(pool.clone())),
            Arc::new(SqlInventoryStore::new(pool.clone())),
            Arc::clone(&notifier),
        );
        Ok(Self::new(
            Arc::new(SqlMessageQueue::new(pool.clone())),
            Arc::new(SqlMetricsSink::new(pool.clone())),
            Arc::new(runtime),
            notifier,
            WorkerSettings::from(&config.worker),
        ))
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            event_name = "worker.started",
            interval_ms = self.settings.interval.as_millis() as u64,
            batch_size = self.settings.batch_size,
            max_concurrency = self.settings.max_concurrency,
            "queue worker started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(event_name = "worker.stopped", "shutdown requested, stopping queue worker");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_batch().await {
                        Ok(report) if report.is_idle() => {}
                        Ok(report) => info!(
                            event_name = "worker.batch_completed",
                            reclaimed = report.reclaimed,
                            popped = report.popped,
                            acked = report.acked,
                            requeued = report.requeued,
                            dropped = report.dropped,
                            queue_errors = report.queue_errors,
                            "batch completed"
                        ),
                        Err(error) => error!(
                            event_name = "worker.batch_failed",
                            error = %error,
                            "queue unavailable, batch skipped"
                        ),
                    }
                }
            }
        }
    }

    /// Runs batches back to back until one finds nothing to do, or `max_batches` ran.
    pub async fn drain(&self, max_batches: usize) -> Result<BatchReport, RepositoryError> {
        let mut total = BatchReport::default();
        for _ in 0..max_batches {
            let report = self.run_batch().await?;
            if report.is_idle() {
                break;
            }
            total.merge(report);
        }
        Ok(total)
    }

    pub async fn run_batch(&self) -> Result<BatchReport, RepositoryError> {
        let mut report = BatchReport::default();

        let claimed_before = Utc::now() - self.settings.inflight_lease;
        for reclaimed in self.queue.reclaim_stale(claimed_before).await? {
            report.reclaimed += 1;
            self.after_failure(&reclaimed.message, reclaimed.outcome, &mut report).await;
            log_reclaimed(&reclaimed);
        }

        let mut popped = Vec::with_capacity(self.settings.batch_size);
        while popped.len() < self.settings.batch_size {
            match self.queue.pop_to_inflight().await? {
                Some(message) => popped.push(message),
                None => break,
            }
        }
        report.popped = popped.len();
        if popped.is_empty() {
            return Ok(report);
        }

        let groups = group_by_sender(popped);
        if self.settings.max_concurrency <= 1 || groups.len() == 1 {
            for group in groups {
                report.merge(self.process_group(group).await);
            }
            return Ok(report);
        }

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let mut tasks = JoinSet::new();
        for group in groups {
            let worker = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return BatchReport::default();
                };
                worker.process_group(group).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(group_report) => report.merge(group_report),
                Err(join_error) => {
                    // The group's messages stay in flight until the lease reclaims them.
                    error!(
                        event_name = "worker.group_panicked",
                        error = %join_error,
                        "sender group task failed"
                    );
                    report.queue_errors += 1;
                }
            }
        }
        Ok(report)
    }

    async fn process_group(&self, group: Vec<QueuedMessage>) -> BatchReport {
        let mut report = BatchReport::default();
        for message in group {
            self.process_one(message, &mut report).await;
        }
        report
    }

    async fn process_one(&self, message: QueuedMessage, report: &mut BatchReport) {
        let started = Instant::now();
        match self.handler.handle(&message).await {
            Ok(turn) => {
                if let Err(error) = self.queue.ack(&message.id).await {
                    error!(
                        event_name = "worker.ack_failed",
                        correlation_id = %message.id,
                        sender_key = %message.sender_key,
                        error = %error,
                        "handled message could not be acked"
                    );
                    report.queue_errors += 1;
                    return;
                }
                report.acked += 1;

                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                if let Err(error) = self.metrics.record_processed(Utc::now(), elapsed_ms).await {
                    warn!(
                        event_name = "worker.metrics_failed",
                        correlation_id = %message.id,
                        error = %error,
                        "processed counter not recorded"
                    );
                    report.queue_errors += 1;
                }
                debug!(
                    event_name = "worker.message_processed",
                    correlation_id = %message.id,
                    sender_key = %message.sender_key,
                    command = turn.command.unwrap_or("-"),
                    elapsed_ms,
                    "message processed"
                );
            }
            Err(failure) => {
                if failure.is_transient() {
                    warn!(
                        event_name = "worker.message_failed",
                        correlation_id = %message.id,
                        sender_key = %message.sender_key,
                        attempts = message.attempts,
                        error = %failure,
                        "message failed, nacking"
                    );
                } else {
                    error!(
                        event_name = "worker.message_failed",
                        correlation_id = %message.id,
                        sender_key = %message.sender_key,
                        attempts = message.attempts,
                        error = %failure,
                        "message failed unexpectedly, nacking"
                    );
                }

                match self.queue.nack(&message.id).await {
                    Ok(outcome) => self.after_failure(&message, outcome, report).await,
                    Err(error) => {
                        error!(
                            event_name = "worker.nack_failed",
                            correlation_id = %message.id,
                            error = %error,
                            "failed message could not be nacked"
                        );
                        report.queue_errors += 1;
                    }
                }
            }
        }
    }

    async fn after_failure(
        &self,
        message: &QueuedMessage,
        outcome: NackOutcome,
        report: &mut BatchReport,
    ) {
        match outcome {
            NackOutcome::Requeued { .. } => {
                report.requeued += 1;
                if let Err(error) = self.metrics.record_retry(Utc::now()).await {
                    warn!(
                        event_name = "worker.metrics_failed",
                        correlation_id = %message.id,
                        error = %error,
                        "retry counter not recorded"
                    );
                    report.queue_errors += 1;
                }
            }
            NackOutcome::Dropped { attempts } => {
                report.dropped += 1;
                error!(
                    event_name = "worker.message_dropped",
                    correlation_id = %message.id,
                    sender_key = %message.sender_key,
                    attempts,
                    "message dropped after final attempt"
                );
                self.apologize(&message.sender_key).await;
            }
        }
    }

    async fn apologize(&self, recipient: &SenderKey) {
        if let Err(error) = self.notifier.send_text(recipient, DROPPED_APOLOGY).await {
            warn!(
                event_name = "worker.apology_failed",
                sender_key = %recipient,
                error = %error,
                "apology for dropped message not delivered"
            );
        }
    }
}

fn log_reclaimed(reclaimed: &ReclaimedMessage) {
    warn!(
        event_name = "worker.message_reclaimed",
        correlation_id = %reclaimed.message.id,
        sender_key = %reclaimed.message.sender_key,
        dropped = reclaimed.outcome.is_dropped(),
        "stale in-flight message reclaimed"
    );
}

/// Splits a batch into per-sender runs, keeping arrival order inside and across groups.
fn group_by_sender(messages: Vec<QueuedMessage>) -> Vec<Vec<QueuedMessage>> {
    let mut index: HashMap<SenderKey, usize> = HashMap::new();
    let mut groups: Vec<Vec<QueuedMessage>> = Vec::new();
    for message in messages {
        match index.get(&message.sender_key) {
            Some(&slot) => groups[slot].push(message),
            None => {
                index.insert(message.sender_key.clone(), groups.len());
                groups.push(vec![message]);
            }
        }
    }
    groups
}
