//! Build status aggregator.
//!
//! `BuildStatus` is never stored. It is derived from the facts persisted on a
//! build, its compare bucket and its diffs every time it is read and every
//! time a build event fires.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::models::{BuildStats, BuildStatus, BuildType, JobSignal, ValidationStatus};

/// Default time a build may wait for its next batch.
pub const DEFAULT_EXPIRATION_TIMEOUT: Duration = Duration::from_secs(2 * 3600);

/// Inputs of the aggregation for one build.
#[derive(Debug, Clone)]
pub struct BuildSignals {
    pub job_signal: Option<JobSignal>,
    pub batch_count: Option<i32>,
    pub total_batch: Option<i32>,
    pub bucket_complete: bool,
    /// Set once the build's diffs are classified and persisted.
    pub concluded: bool,
    pub last_batch_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub build_type: BuildType,
    pub stats: BuildStats,
    pub validation: Option<ValidationStatus>,
}

impl BuildSignals {
    /// Number of batches the build waits for. A missing total means one batch.
    pub fn effective_total(&self) -> i32 {
        self.total_batch.unwrap_or(1).max(1)
    }

    pub fn received(&self) -> i32 {
        self.batch_count.unwrap_or(0)
    }

    /// Whether the batch timeout elapsed while batches are still missing.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.received() >= self.effective_total() {
            return false;
        }
        let since = self.last_batch_at.unwrap_or(self.created_at);
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now - since > timeout,
            Err(_) => false,
        }
    }
}

/// Derive the status of a build. The first matching rule wins.
pub fn aggregate(signals: &BuildSignals, now: DateTime<Utc>, timeout: Duration) -> BuildStatus {
    match signals.job_signal {
        Some(JobSignal::Aborted) => return BuildStatus::Aborted,
        Some(JobSignal::Error) => return BuildStatus::Error,
        None => {}
    }

    if signals.is_expired(now, timeout) {
        return BuildStatus::Expired;
    }

    let received = signals.received();
    if received == 0 {
        return BuildStatus::Pending;
    }
    if received < signals.effective_total() {
        return BuildStatus::Progress;
    }
    if !signals.bucket_complete {
        return BuildStatus::Pending;
    }
    if !signals.concluded {
        return BuildStatus::Progress;
    }

    let conclusion = if signals.build_type != BuildType::Orphan && signals.stats.has_differences() {
        BuildStatus::DiffDetected
    } else {
        BuildStatus::Stable
    };

    match signals.validation {
        Some(ValidationStatus::Accepted) => BuildStatus::Accepted,
        Some(ValidationStatus::Rejected) => BuildStatus::Rejected,
        Some(ValidationStatus::Unknown) | None => conclusion,
    }
}
