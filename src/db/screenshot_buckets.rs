//! Database queries for screenshot buckets and their screenshots.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::entity::screenshot::{self, Entity as Screenshot};
use crate::entity::screenshot_bucket::{self as bucket, Entity as Bucket};
use crate::error::{AppError, AppResult};
use crate::models::{BucketRef, BuildType, ScreenshotBucket, ScreenshotRef, ScreenshotUpload};
use crate::services::bucket_store::{Append, Completion, resolve_append, resolve_completion};
use crate::services::pairing::select_base;

use super::DbPool;

/// Baseline candidates fetched per pairing query.
const BASE_CANDIDATES: u64 = 8;

/// Key of the buckets a build may write to.
#[derive(Debug, Clone, Copy)]
pub struct BucketKey<'a> {
    pub project_id: Uuid,
    pub name: &'a str,
    pub branch: &'a str,
    pub commit: &'a str,
}

/// Lock a bucket row for the rest of the transaction.
pub(crate) async fn lock_bucket(
    txn: &DatabaseTransaction,
    bucket_id: Uuid,
) -> AppResult<bucket::Model> {
    Bucket::find_by_id(bucket_id)
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to lock screenshot bucket: {}", e)))?
        .ok_or_else(|| AppError::NotFound(format!("Screenshot bucket {}", bucket_id)))
}

/// Create the compare bucket of a new build. Every build gets its own bucket,
/// so a CI re-run of the same commit never writes into an earlier run's bucket.
pub(crate) async fn create_bucket(
    txn: &DatabaseTransaction,
    key: BucketKey<'_>,
) -> AppResult<bucket::Model> {
    let now = Utc::now();
    bucket::ActiveModel {
        id: Set(Uuid::now_v7()),
        project_id: Set(key.project_id),
        name: Set(key.name.to_string()),
        branch: Set(key.branch.to_string()),
        commit: Set(key.commit.to_string()),
        complete: Set(false),
        screenshot_count: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(txn)
    .await
    .map_err(|e| AppError::Database(format!("Failed to insert screenshot bucket: {}", e)))
}

/// Attach screenshots to a locked bucket.
///
/// Identical re-uploads return the existing screenshot with `attached = false`.
pub(crate) async fn append_screenshots(
    txn: &DatabaseTransaction,
    bucket: &bucket::Model,
    uploads: &[ScreenshotUpload],
) -> AppResult<Vec<BucketRef>> {
    let domain = ScreenshotBucket::from(bucket.clone());
    let names: Vec<&str> = uploads.iter().map(|u| u.name.as_str()).collect();

    let existing: Vec<screenshot::Model> = Screenshot::find()
        .filter(screenshot::Column::ScreenshotBucketId.eq(bucket.id))
        .filter(screenshot::Column::Name.is_in(names))
        .all(txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to load screenshots: {}", e)))?;

    let mut refs = Vec::with_capacity(uploads.len());
    let mut inserted: Vec<screenshot::Model> = Vec::new();
    let now = Utc::now();

    for upload in uploads {
        let current = existing
            .iter()
            .chain(inserted.iter())
            .find(|s| s.name == upload.name)
            .map(|s| (s.id, s.checksum.as_str()));

        match resolve_append(&domain, &upload.name, &upload.checksum, current)? {
            Append::AlreadyAttached(screenshot_id) => refs.push(BucketRef {
                bucket_id: bucket.id,
                screenshot_id,
                attached: false,
            }),
            Append::Insert => {
                let model = screenshot::ActiveModel {
                    id: Set(Uuid::now_v7()),
                    screenshot_bucket_id: Set(bucket.id),
                    name: Set(upload.name.clone()),
                    checksum: Set(upload.checksum.to_ascii_lowercase()),
                    group: Set(upload.group.clone()),
                    created_at: Set(now),
                }
                .insert(txn)
                .await
                .map_err(|e| AppError::Database(format!("Failed to insert screenshot: {}", e)))?;

                refs.push(BucketRef {
                    bucket_id: bucket.id,
                    screenshot_id: model.id,
                    attached: true,
                });
                inserted.push(model);
            }
        }
    }

    Ok(refs)
}

/// Complete a locked bucket with `expected` screenshots.
pub(crate) async fn complete_bucket(
    txn: &DatabaseTransaction,
    bucket: bucket::Model,
    expected: i32,
) -> AppResult<bucket::Model> {
    let attached = Screenshot::find()
        .filter(screenshot::Column::ScreenshotBucketId.eq(bucket.id))
        .count(txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to count screenshots: {}", e)))?;

    match resolve_completion(&ScreenshotBucket::from(bucket.clone()), attached, expected)? {
        Completion::Unchanged => Ok(bucket),
        Completion::Complete { screenshot_count } => {
            let mut active: bucket::ActiveModel = bucket.into();
            active.complete = Set(true);
            active.screenshot_count = Set(Some(screenshot_count));
            active.updated_at = Set(Utc::now());

            active
                .update(txn)
                .await
                .map_err(|e| AppError::Database(format!("Failed to complete bucket: {}", e)))
        }
    }
}

/// Number of screenshots attached to a bucket.
pub(crate) async fn count_screenshots(txn: &DatabaseTransaction, bucket_id: Uuid) -> AppResult<u64> {
    Screenshot::find()
        .filter(screenshot::Column::ScreenshotBucketId.eq(bucket_id))
        .count(txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to count screenshots: {}", e)))
}

impl DbPool {
    /// Get a bucket by ID.
    pub async fn get_bucket(&self, id: Uuid) -> AppResult<Option<ScreenshotBucket>> {
        let result = Bucket::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get screenshot bucket: {}", e)))?;

        Ok(result.map(Into::into))
    }

    /// All screenshots of a bucket, ordered by name.
    pub async fn list_screenshots(&self, bucket_id: Uuid) -> AppResult<Vec<ScreenshotRef>> {
        let result = Screenshot::find()
            .filter(screenshot::Column::ScreenshotBucketId.eq(bucket_id))
            .order_by_asc(screenshot::Column::Name)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list screenshots: {}", e)))?;

        Ok(result.into_iter().map(Into::into).collect())
    }

    /// Resolve the base bucket of `compare` on `reference_branch`.
    pub async fn resolve_base(
        &self,
        compare: &ScreenshotBucket,
        reference_branch: &str,
        build_type: BuildType,
    ) -> AppResult<Option<ScreenshotBucket>> {
        if build_type == BuildType::Orphan {
            return Ok(None);
        }

        let candidates: Vec<ScreenshotBucket> = Bucket::find()
            .filter(bucket::Column::ProjectId.eq(compare.project_id))
            .filter(bucket::Column::Name.eq(compare.name.as_str()))
            .filter(bucket::Column::Branch.eq(reference_branch))
            .filter(bucket::Column::Complete.eq(true))
            .filter(bucket::Column::CreatedAt.lte(compare.created_at))
            .filter(bucket::Column::Id.ne(compare.id))
            .order_by_desc(bucket::Column::CreatedAt)
            .order_by_desc(bucket::Column::Id)
            .limit(BASE_CANDIDATES)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to query base buckets: {}", e)))?
            .into_iter()
            .map(Into::into)
            .collect();

        Ok(select_base(compare, reference_branch, build_type, &candidates).cloned())
    }
}
