//! Screenshot bucket domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entity::{screenshot, screenshot_bucket};

/// Screenshots captured for one (branch, commit) of a project build name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotBucket {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub branch: String,
    pub commit: String,
    pub created_at: DateTime<Utc>,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_count: Option<i32>,
}

impl From<screenshot_bucket::Model> for ScreenshotBucket {
    fn from(model: screenshot_bucket::Model) -> Self {
        Self {
            id: model.id,
            project_id: model.project_id,
            name: model.name,
            branch: model.branch,
            commit: model.commit,
            created_at: model.created_at,
            complete: model.complete,
            screenshot_count: model.screenshot_count,
        }
    }
}

/// Where an uploaded screenshot landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketRef {
    pub bucket_id: Uuid,
    pub screenshot_id: Uuid,
    /// False when an identical screenshot was already attached.
    pub attached: bool,
}

/// One screenshot in an upload batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotUpload {
    /// Screenshot name, the identity used for pairing.
    pub name: String,
    /// SHA-256 of the image file, hex encoded.
    pub checksum: String,
    #[serde(default)]
    pub group: Option<String>,
}

/// Screenshot as seen by the diff classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotRef {
    pub id: Uuid,
    pub name: String,
    pub checksum: String,
    pub group: Option<String>,
}

impl From<screenshot::Model> for ScreenshotRef {
    fn from(model: screenshot::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            checksum: model.checksum,
            group: model.group,
        }
    }
}
