//! Checkpointed batch driver shared by every pipeline stage.
//!
//! The orchestrator walks items in ascending id order and visits each one at
//! most once per run. Whether an item is attempted is decided from its status
//! in the catalog, so a resumed run neither repeats finished work nor skips
//! anything that was left half done. Progress is persisted every
//! `checkpoint_interval` visited items.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::catalog::{Catalog, ItemUpdate};
use crate::checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
use crate::models::{Item, ItemStatus, Platform};
use crate::ratelimit::{Destination, RateLimiter};
use crate::Result;

pub mod progress;
pub mod retry;

pub use progress::{BarMonitor, ProgressMonitor, ProgressSnapshot, RunEvent, SkipReason, TracingMonitor};
pub use retry::{RetryDecision, RetryPolicy};

/// Per-run switches
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Attempt at most this many items
    pub limit: Option<usize>,
    /// Return failed items to the state they failed from and try again
    pub retry_failed: bool,
    /// Re-fetch items previously classified as having no video
    pub recheck_unmatched: bool,
}

/// What a successful stage run writes back
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub update: ItemUpdate,
    pub needs_review: bool,
}

impl StageOutput {
    pub fn advance(update: ItemUpdate) -> Self {
        Self {
            update,
            needs_review: false,
        }
    }

    pub fn review(update: ItemUpdate) -> Self {
        Self {
            update,
            needs_review: true,
        }
    }
}

/// One step of the pipeline, driven item by item
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rate limiter bucket charged once per attempt; `None` when the stage
    /// paces its own outbound calls
    fn destination(&self) -> Option<Destination>;

    /// The stage's postcondition already holds for `item`
    fn is_satisfied(&self, item: &Item) -> bool;

    /// `item` is at the status this stage consumes
    fn accepts(&self, item: &Item) -> bool;

    async fn run(&self, item: &Item) -> Result<StageOutput>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded { status: ItemStatus },
    NeedsReview,
    Failed { attempts: u32, reason: String },
    Skipped { reason: SkipReason },
    /// Cancelled while waiting to retry; left for the next run
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub item_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Everything one stage run decided
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stage: String,
    pub session_id: Uuid,
    pub outcomes: Vec<ItemOutcome>,
    pub snapshot: ProgressSnapshot,
    pub events: Vec<RunEvent>,
    /// Last checkpoint written, totals include earlier sessions
    pub checkpoint: Checkpoint,
    pub cancelled: bool,
}

impl RunReport {
    pub fn outcome(&self, item_id: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.item_id == item_id)
            .map(|o| &o.outcome)
    }
}

enum Plan {
    Skip(SkipReason),
    Run { reset_failed: bool },
}

struct RunState<'a> {
    store: FileCheckpointStore,
    checkpoint: Checkpoint,
    snapshot: ProgressSnapshot,
    events: Vec<RunEvent>,
    outcomes: Vec<ItemOutcome>,
    monitor: &'a dyn ProgressMonitor,
    interval: usize,
    since_save: usize,
    cancelled: bool,
}

impl RunState<'_> {
    fn record(&mut self, event: RunEvent) {
        self.monitor.on_event(&event);
        self.events.push(event);
    }

    fn conclude(&mut self, item_id: &str, outcome: Outcome, platform: Option<Platform>) {
        let event = match &outcome {
            Outcome::Succeeded { status } => {
                self.snapshot.processed += 1;
                self.snapshot.succeeded += 1;
                self.checkpoint.processed_count += 1;
                self.checkpoint.success_count += 1;
                if let Some(platform) = platform {
                    *self.snapshot.by_platform.entry(platform.to_string()).or_default() += 1;
                    *self
                        .checkpoint
                        .per_platform_counts
                        .entry(platform.to_string())
                        .or_default() += 1;
                }
                RunEvent::Succeeded {
                    item_id: item_id.to_string(),
                    status: *status,
                }
            }
            Outcome::NeedsReview => {
                self.snapshot.processed += 1;
                self.snapshot.needs_review += 1;
                self.checkpoint.processed_count += 1;
                self.checkpoint.review_count += 1;
                RunEvent::NeedsReview {
                    item_id: item_id.to_string(),
                }
            }
            Outcome::Failed { attempts, reason } => {
                self.snapshot.processed += 1;
                self.snapshot.failed += 1;
                self.checkpoint.processed_count += 1;
                self.checkpoint.failure_count += 1;
                RunEvent::Failed {
                    item_id: item_id.to_string(),
                    attempts: *attempts,
                    reason: reason.clone(),
                }
            }
            Outcome::Skipped { reason } => {
                self.snapshot.skipped += 1;
                RunEvent::Skipped {
                    item_id: item_id.to_string(),
                    reason: *reason,
                }
            }
            Outcome::Interrupted => {
                self.outcomes.push(ItemOutcome {
                    item_id: item_id.to_string(),
                    outcome,
                });
                return;
            }
        };
        self.record(event);
        self.outcomes.push(ItemOutcome {
            item_id: item_id.to_string(),
            outcome,
        });
    }

    /// Move the cursor past `item_id`; true when a checkpoint is due
    fn advance(&mut self, item_id: &str) -> bool {
        self.snapshot.cursor = Some(item_id.to_string());
        self.since_save += 1;
        self.since_save >= self.interval
    }

    fn save(&mut self) -> Result<()> {
        self.checkpoint.cursor = self.snapshot.cursor.clone();
        self.checkpoint.timestamp = Utc::now();
        self.store.save(&self.checkpoint)?;
        self.since_save = 0;
        let cursor = self.checkpoint.cursor.clone();
        self.record(RunEvent::Checkpointed { cursor });
        Ok(())
    }

    fn into_report(self, session_id: Uuid) -> RunReport {
        RunReport {
            stage: self.snapshot.stage.clone(),
            session_id,
            outcomes: self.outcomes,
            snapshot: self.snapshot,
            events: self.events,
            checkpoint: self.checkpoint,
            cancelled: self.cancelled,
        }
    }
}

/// Drives a [`Stage`] over the catalog with retries and checkpoints
pub struct BatchOrchestrator {
    catalog: Arc<dyn Catalog>,
    limiter: RateLimiter,
    policy: RetryPolicy,
    checkpoint_dir: PathBuf,
    checkpoint_interval: usize,
    monitor: Arc<dyn ProgressMonitor>,
    cancel: CancellationToken,
}

impl BatchOrchestrator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        limiter: RateLimiter,
        policy: RetryPolicy,
        checkpoint_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            limiter,
            policy,
            checkpoint_dir: checkpoint_dir.into(),
            checkpoint_interval: 5,
            monitor: Arc::new(TracingMonitor),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ProgressMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn checkpoint_store(&self, stage: &str) -> FileCheckpointStore {
        FileCheckpointStore::for_stage(&self.checkpoint_dir, stage)
    }

    /// Run `stage` over the whole catalog
    pub async fn run_stage(&self, stage: &dyn Stage, options: &RunOptions) -> Result<RunReport> {
        let items = self.catalog.items()?;
        self.process(items, stage, options).await
    }

    pub async fn process(&self, mut items: Vec<Item>, stage: &dyn Stage, options: &RunOptions) -> Result<RunReport> {
        items.sort_by(|a, b| a.id.cmp(&b.id));

        let session_id = Uuid::new_v4();
        let store = self.checkpoint_store(stage.name());
        let previous = match store.load() {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!("Ignoring unreadable checkpoint for {}: {}", stage.name(), e);
                None
            }
        };

        let mut checkpoint = Checkpoint::new(stage.name(), session_id);
        let mut state = RunState {
            store,
            checkpoint: checkpoint.clone(),
            snapshot: ProgressSnapshot {
                stage: stage.name().to_string(),
                ..Default::default()
            },
            events: Vec::new(),
            outcomes: Vec::new(),
            monitor: self.monitor.as_ref(),
            interval: self.checkpoint_interval,
            since_save: 0,
            cancelled: false,
        };

        if let Some(previous) = previous {
            tracing::info!(
                "Resuming stage {} (previous session {} stopped at {:?})",
                stage.name(),
                previous.session_id,
                previous.cursor
            );
            checkpoint.processed_count = previous.processed_count;
            checkpoint.success_count = previous.success_count;
            checkpoint.failure_count = previous.failure_count;
            checkpoint.review_count = previous.review_count;
            checkpoint.per_platform_counts = previous.per_platform_counts;
            state.checkpoint = checkpoint;
            state.record(RunEvent::Resumed {
                previous_cursor: previous.cursor,
            });
        }

        self.monitor.on_start(stage.name(), items.len());

        match self.run_items(&items, stage, options, &mut state).await {
            Ok(()) => {
                state.save()?;
                self.monitor.on_finish(&state.snapshot);
                Ok(state.into_report(session_id))
            }
            Err(e) => {
                tracing::error!("Stage {} aborted: {}", stage.name(), e);
                if let Err(save_error) = state.save() {
                    tracing::warn!("Could not save checkpoint after abort: {}", save_error);
                }
                Err(e)
            }
        }
    }

    async fn run_items(
        &self,
        items: &[Item],
        stage: &dyn Stage,
        options: &RunOptions,
        state: &mut RunState<'_>,
    ) -> Result<()> {
        let mut attempted = 0usize;

        for item in items {
            if self.cancel.is_cancelled() {
                tracing::info!("Cancellation requested, stopping before {}", item.id);
                state.cancelled = true;
                let cursor = state.snapshot.cursor.clone();
                state.record(RunEvent::Cancelled { cursor });
                return Ok(());
            }

            match Self::plan(stage, item, options) {
                Plan::Skip(reason) => {
                    tracing::debug!("{} {}: skipped ({:?})", stage.name(), item.id, reason);
                    state.conclude(&item.id, Outcome::Skipped { reason }, None);
                }
                Plan::Run { reset_failed } => {
                    if options.limit.is_some_and(|limit| attempted >= limit) {
                        tracing::info!("Reached limit of {} items", attempted);
                        return Ok(());
                    }
                    attempted += 1;

                    let item = if reset_failed {
                        let reset = self.catalog.reset_failed(&item.id)?;
                        state.record(RunEvent::RetryReset {
                            item_id: reset.id.clone(),
                            status: reset.status,
                        });
                        reset
                    } else {
                        item.clone()
                    };

                    let (outcome, platform) = self.attempt(&item, stage, state).await?;
                    if outcome == Outcome::Interrupted {
                        state.cancelled = true;
                        state.conclude(&item.id, outcome, None);
                        let cursor = state.snapshot.cursor.clone();
                        state.record(RunEvent::Cancelled { cursor });
                        return Ok(());
                    }
                    state.conclude(&item.id, outcome, platform);
                }
            }

            if state.advance(&item.id) {
                state.save()?;
                self.monitor.on_snapshot(&state.snapshot);
            }
        }

        Ok(())
    }

    fn plan(stage: &dyn Stage, item: &Item, options: &RunOptions) -> Plan {
        let mut view = item.clone();
        let reset_failed = item.status == ItemStatus::Failed;
        if reset_failed {
            if !options.retry_failed {
                return Plan::Skip(SkipReason::Failed);
            }
            view.status = item.failed_from.unwrap_or(ItemStatus::Unresolved);
        }

        if stage.is_satisfied(&view) {
            return Plan::Skip(SkipReason::AlreadyDone);
        }
        if view.needs_review() && !options.recheck_unmatched {
            return Plan::Skip(SkipReason::NeedsReview);
        }
        if !stage.accepts(&view) {
            return Plan::Skip(SkipReason::NotReady);
        }
        Plan::Run { reset_failed }
    }

    fn release_attempts(&self, item: &Item) {
        if let Err(e) = self.catalog.apply(&item.id, &ItemUpdate::attempts(0)) {
            tracing::warn!("Could not reset attempt count of {}: {}", item.id, e);
        }
    }

    /// Attempt one item until it succeeds, fails for good, or the run ends
    async fn attempt(
        &self,
        item: &Item,
        stage: &dyn Stage,
        state: &mut RunState<'_>,
    ) -> Result<(Outcome, Option<Platform>)> {
        let mut attempt = item.attempt_count;

        loop {
            attempt += 1;
            // Persisted up front so a crash mid-item still counts the attempt
            self.catalog.apply(&item.id, &ItemUpdate::attempts(attempt))?;
            state.record(RunEvent::Attempt {
                item_id: item.id.clone(),
                attempt,
            });

            if let Some(destination) = stage.destination() {
                self.limiter.acquire(destination).await;
            }

            let error = match stage.run(item).await {
                Ok(output) => {
                    let mut update = output.update;
                    update.attempt_count = Some(0);
                    update.clear_failure = true;
                    let stored = self.catalog.apply(&item.id, &update)?;

                    if output.needs_review {
                        tracing::info!("{} {}: no video found, flagged for review", stage.name(), item.id);
                        return Ok((Outcome::NeedsReview, stored.platform));
                    }
                    tracing::info!("{} {}: {}", stage.name(), item.id, stored.status);
                    return Ok((Outcome::Succeeded { status: stored.status }, stored.platform));
                }
                Err(e) => e,
            };

            if error.is_fatal() {
                // The cause is global, so the item keeps its full retry budget
                self.release_attempts(item);
                state.record(RunEvent::Aborted {
                    item_id: item.id.clone(),
                    error: error.to_string(),
                });
                return Err(error);
            }

            match self.policy.decide(attempt, &error) {
                RetryDecision::Retry { delay, .. } => {
                    tracing::warn!(
                        "{} {}: attempt {} failed: {}; retrying in {:?}",
                        stage.name(),
                        item.id,
                        attempt,
                        error,
                        delay
                    );
                    state.record(RunEvent::Retrying {
                        item_id: item.id.clone(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: error.to_string(),
                    });
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            self.release_attempts(item);
                            return Ok((Outcome::Interrupted, None));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::GiveUp => {
                    let reason = error.to_string();
                    tracing::warn!("{} {}: failed after {} attempts: {}", stage.name(), item.id, attempt, reason);
                    self.catalog
                        .apply(&item.id, &ItemUpdate::failed(item.status, reason.clone(), attempt))?;
                    return Ok((Outcome::Failed { attempts: attempt, reason }, None));
                }
            }
        }
    }
}
