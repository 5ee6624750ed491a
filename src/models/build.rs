//! Build domain models and DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{BuildStats, ScreenshotUpload};
use crate::entity::build;

/// Build name used when the uploader does not provide one.
pub const DEFAULT_BUILD_NAME: &str = "default";

/// Kind of build, relative to the project's reference branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum BuildType {
    /// Build on the reference branch.
    Reference,
    /// Build compared against the reference branch.
    Check,
    /// No baseline bucket exists to compare against.
    Orphan,
}

impl BuildType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Check => "check",
            Self::Orphan => "orphan",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reference" => Some(Self::Reference),
            "check" => Some(Self::Check),
            "orphan" => Some(Self::Orphan),
            _ => None,
        }
    }

    /// Type of a new build before pairing decides whether it is an orphan.
    pub fn for_branch(branch: &str, reference_branch: &str) -> Self {
        if branch == reference_branch {
            Self::Reference
        } else {
            Self::Check
        }
    }
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal signal sent by the external CI job runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum JobSignal {
    Aborted,
    Error,
}

impl JobSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aborted => "aborted",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aborted" => Some(Self::Aborted),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build status exposed to clients. Always derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum BuildStatus {
    /// No batch received yet, or the compare bucket is not complete.
    Pending,
    /// Some but not all batches received.
    Progress,
    /// The job runner reported an error.
    Error,
    /// Batches stopped arriving before the build was complete.
    Expired,
    /// The job runner aborted the build.
    Aborted,
    /// At least one screenshot is added, changed, removed or failed.
    DiffDetected,
    /// Every screenshot is unchanged.
    Stable,
    /// A reviewer accepted the changes.
    Accepted,
    /// A reviewer rejected the changes.
    Rejected,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Progress => "progress",
            Self::Error => "error",
            Self::Expired => "expired",
            Self::Aborted => "aborted",
            Self::DiffDetected => "diffDetected",
            Self::Stable => "stable",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    /// Statuses that can no longer change within the same build.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Expired | Self::Aborted)
    }

    /// Statuses reached once the diff conclusion exists.
    pub fn is_concluded(&self) -> bool {
        matches!(
            self,
            Self::DiffDetected | Self::Stable | Self::Accepted | Self::Rejected
        )
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request to create a build.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBuildRequest {
    pub branch: String,
    pub commit: String,
    /// Build name, used to separate parallel suites of one project.
    #[serde(default)]
    pub name: Option<String>,
    /// Number of batches the uploader will send (defaults to a single batch).
    #[serde(default)]
    pub total_batch: Option<i32>,
    #[serde(default)]
    pub pr_number: Option<i32>,
    #[serde(default)]
    pub pr_head_commit: Option<String>,
}

/// Request carrying one upload batch.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadBatchRequest {
    pub screenshots: Vec<ScreenshotUpload>,
    /// Total screenshots the build uploaded, checked when this batch
    /// completes the build. Ignored on earlier batches.
    #[serde(default)]
    pub screenshot_count: Option<i32>,
}

/// Response after a batch has been applied.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadBatchResponse {
    pub build_id: Uuid,
    pub batch_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_batch: Option<i32>,
    /// Screenshots attached by this batch (re-uploads are not counted).
    pub attached: u64,
    /// True once the last batch landed and diffs were classified.
    pub finalized: bool,
    pub status: BuildStatus,
}

/// Request from the job runner.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobSignalRequest {
    pub signal: JobSignal,
}

/// Build read model.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub number: i32,
    pub name: String,
    pub branch: String,
    pub commit: String,
    #[serde(rename = "type")]
    pub build_type: BuildType,
    pub status: BuildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<BuildStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_batch: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_head_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_bucket_id: Option<Uuid>,
    pub compare_bucket_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BuildResponse {
    pub fn from_model(model: build::Model, status: BuildStatus, stats: Option<BuildStats>) -> Self {
        Self {
            id: model.id,
            project_id: model.project_id,
            number: model.number,
            build_type: BuildType::parse(&model.build_type).unwrap_or(BuildType::Check),
            name: model.name,
            branch: model.branch,
            commit: model.commit,
            status,
            stats,
            batch_count: model.batch_count,
            total_batch: model.total_batch,
            pr_number: model.pr_number,
            pr_head_commit: model.pr_head_commit,
            base_bucket_id: model.base_bucket_id,
            compare_bucket_id: model.compare_bucket_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Query parameters for `project.builds(after, first, buildName)`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListBuildsParams {
    pub after: Option<u64>,
    pub first: Option<u64>,
    pub build_name: Option<String>,
}
