use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::models::ItemStatus;

/// Running totals of one stage run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub stage: String,
    /// Items actually attempted
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub needs_review: u64,
    pub skipped: u64,
    pub by_platform: BTreeMap<String, u64>,
    pub cursor: Option<String>,
}

/// Why an item was not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The stage's postcondition already holds
    AlreadyDone,
    /// The item is not at the status this stage consumes
    NotReady,
    /// Failed earlier and the run was not started with retries
    Failed,
    /// Classified as having no video
    NeedsReview,
}

/// One orchestrator decision, in the order it was made
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Resumed { previous_cursor: Option<String> },
    Skipped { item_id: String, reason: SkipReason },
    RetryReset { item_id: String, status: ItemStatus },
    Attempt { item_id: String, attempt: u32 },
    Retrying { item_id: String, attempt: u32, delay_ms: u64, error: String },
    Succeeded { item_id: String, status: ItemStatus },
    NeedsReview { item_id: String },
    Failed { item_id: String, attempts: u32, reason: String },
    Checkpointed { cursor: Option<String> },
    Aborted { item_id: String, error: String },
    Cancelled { cursor: Option<String> },
}

/// Receives progress while a stage runs
pub trait ProgressMonitor: Send + Sync {
    fn on_start(&self, _stage: &str, _total: usize) {}

    fn on_event(&self, _event: &RunEvent) {}

    fn on_snapshot(&self, snapshot: &ProgressSnapshot);

    fn on_finish(&self, snapshot: &ProgressSnapshot) {
        self.on_snapshot(snapshot);
    }
}

/// Writes one log line per snapshot
pub struct TracingMonitor;

impl ProgressMonitor for TracingMonitor {
    fn on_start(&self, stage: &str, total: usize) {
        tracing::info!("Stage {}: {} items in catalog", stage, total);
    }

    fn on_snapshot(&self, snapshot: &ProgressSnapshot) {
        tracing::info!(
            stage = %snapshot.stage,
            cursor = ?snapshot.cursor,
            "processed={} succeeded={} failed={} review={} skipped={}",
            snapshot.processed,
            snapshot.succeeded,
            snapshot.failed,
            snapshot.needs_review,
            snapshot.skipped
        );
    }
}

/// Terminal progress bar
pub struct BarMonitor {
    bar: ProgressBar,
}

impl BarMonitor {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }
}

impl Default for BarMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressMonitor for BarMonitor {
    fn on_start(&self, stage: &str, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_message(format!("{}...", stage));
    }

    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::Skipped { .. }
            | RunEvent::Succeeded { .. }
            | RunEvent::NeedsReview { .. }
            | RunEvent::Failed { .. } => self.bar.inc(1),
            RunEvent::Attempt { item_id, attempt } if *attempt > 1 => {
                self.bar.set_message(format!("{} (attempt {})", item_id, attempt))
            }
            RunEvent::Attempt { item_id, .. } => self.bar.set_message(item_id.clone()),
            _ => {}
        }
    }

    fn on_snapshot(&self, snapshot: &ProgressSnapshot) {
        self.bar.set_message(format!(
            "{} ok, {} failed, {} review",
            snapshot.succeeded, snapshot.failed, snapshot.needs_review
        ));
    }

    fn on_finish(&self, snapshot: &ProgressSnapshot) {
        self.bar.finish_with_message(format!(
            "{} done: {} ok, {} failed, {} review, {} skipped",
            snapshot.stage, snapshot.succeeded, snapshot.failed, snapshot.needs_review, snapshot.skipped
        ));
    }
}
