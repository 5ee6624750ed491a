//! Screenshot diff domain models and DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity::screenshot_diff;

/// Outcome of comparing one screenshot name between the base and compare buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum ScreenshotDiffStatus {
    /// Present only in the compare bucket.
    Added,
    /// Present in both buckets, pixel diff non-empty.
    Changed,
    /// Present only in the base bucket.
    Removed,
    /// Present in both buckets, pixel diff empty.
    Unchanged,
    /// The diff primitive could not complete (corrupt image, missing file).
    Failure,
}

impl ScreenshotDiffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Changed => "changed",
            Self::Removed => "removed",
            Self::Unchanged => "unchanged",
            Self::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(Self::Added),
            "changed" => Some(Self::Changed),
            "removed" => Some(Self::Removed),
            "unchanged" => Some(Self::Unchanged),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }

    /// Whether this outcome makes a build conclude `diffDetected`.
    pub fn is_difference(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl std::fmt::Display for ScreenshotDiffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Human review verdict on a build's diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum ValidationStatus {
    Accepted,
    Rejected,
    Unknown,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Reduce per-diff verdicts to the verdict of the whole build.
    ///
    /// A single rejection wins over acceptances; `unknown` never overrides.
    pub fn for_build<I>(statuses: I) -> Option<Self>
    where
        I: IntoIterator<Item = Option<Self>>,
    {
        let mut verdict = None;
        for status in statuses.into_iter().flatten() {
            match status {
                Self::Rejected => return Some(Self::Rejected),
                Self::Accepted => verdict = Some(Self::Accepted),
                Self::Unknown => {}
            }
        }
        verdict
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-status diff counts for one build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BuildStats {
    pub total: u64,
    pub added: u64,
    pub changed: u64,
    pub removed: u64,
    pub unchanged: u64,
    pub failure: u64,
}

impl BuildStats {
    /// Count statuses.
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = ScreenshotDiffStatus>,
    {
        let mut stats = Self::default();
        for status in statuses {
            stats.record(status);
        }
        stats
    }

    pub fn record(&mut self, status: ScreenshotDiffStatus) {
        self.total += 1;
        match status {
            ScreenshotDiffStatus::Added => self.added += 1,
            ScreenshotDiffStatus::Changed => self.changed += 1,
            ScreenshotDiffStatus::Removed => self.removed += 1,
            ScreenshotDiffStatus::Unchanged => self.unchanged += 1,
            ScreenshotDiffStatus::Failure => self.failure += 1,
        }
    }

    /// True when at least one diff is added, changed, removed or failed.
    pub fn has_differences(&self) -> bool {
        self.added + self.changed + self.removed + self.failure > 0
    }
}

/// Screenshot diff read model.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotDiffResponse {
    pub id: Uuid,
    pub build_id: Uuid,
    pub name: String,
    pub status: ScreenshotDiffStatus,
    pub flaky_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_screenshot_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_screenshot_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<ValidationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<screenshot_diff::Model> for ScreenshotDiffResponse {
    fn from(model: screenshot_diff::Model) -> Self {
        Self {
            id: model.id,
            build_id: model.build_id,
            status: ScreenshotDiffStatus::parse(&model.status)
                .unwrap_or(ScreenshotDiffStatus::Failure),
            name: model.name,
            flaky_detected: model.flaky_detected,
            group: model.group,
            base_screenshot_id: model.base_screenshot_id,
            compare_screenshot_id: model.compare_screenshot_id,
            validation_status: model
                .validation_status
                .as_deref()
                .and_then(ValidationStatus::parse),
            test_id: model.test_id,
            created_at: model.created_at,
        }
    }
}

/// Request body for `setValidationStatus`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetValidationStatusRequest {
    pub validation_status: ValidationStatus,
}

/// Response of `setValidationStatus`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetValidationStatusResponse {
    pub build_id: Uuid,
    pub validation_status: ValidationStatus,
    pub status: super::BuildStatus,
    pub updated_diffs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_count_each_status() {
        let stats = BuildStats::from_statuses([
            ScreenshotDiffStatus::Unchanged,
            ScreenshotDiffStatus::Changed,
            ScreenshotDiffStatus::Unchanged,
        ]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.changed, 1);
        assert_eq!(stats.unchanged, 2);
        assert!(stats.has_differences());
    }

    #[test]
    fn test_all_unchanged_has_no_differences() {
        let stats = BuildStats::from_statuses([ScreenshotDiffStatus::Unchanged; 4]);
        assert!(!stats.has_differences());
        assert!(!BuildStats::default().has_differences());
    }

    #[test]
    fn test_build_validation_rejection_wins() {
        let verdict = ValidationStatus::for_build([
            Some(ValidationStatus::Accepted),
            None,
            Some(ValidationStatus::Rejected),
        ]);
        assert_eq!(verdict, Some(ValidationStatus::Rejected));
    }

    #[test]
    fn test_build_validation_unknown_is_not_a_verdict() {
        assert_eq!(
            ValidationStatus::for_build([Some(ValidationStatus::Unknown), None]),
            None
        );
        assert_eq!(
            ValidationStatus::for_build([Some(ValidationStatus::Accepted)]),
            Some(ValidationStatus::Accepted)
        );
    }

    #[test]
    fn test_status_serializes_as_graphql_enum() {
        let json = serde_json::to_string(&ScreenshotDiffStatus::Unchanged).unwrap();
        assert_eq!(json, "\"unchanged\"");
        assert_eq!(
            ScreenshotDiffStatus::parse("failure"),
            Some(ScreenshotDiffStatus::Failure)
        );
        assert_eq!(ScreenshotDiffStatus::parse("retryFailure"), None);
    }
}
