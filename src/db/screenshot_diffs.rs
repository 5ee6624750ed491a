//! Database queries for screenshot diffs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::entity::screenshot::{self, Entity as Screenshot};
use crate::entity::screenshot_diff::{self as diff, ActiveModel, Entity as ScreenshotDiff};
use crate::error::{AppError, AppResult};
use crate::models::{BuildStats, ScreenshotDiffStatus, ValidationStatus};
use crate::services::diff_classifier::{ClassifiedDiff, PriorDiff};

use super::DbPool;

/// Persist one classified diff.
pub(crate) async fn insert_diff(
    txn: &DatabaseTransaction,
    build_id: Uuid,
    test_id: Option<Uuid>,
    classified: &ClassifiedDiff,
    now: DateTime<Utc>,
) -> AppResult<diff::Model> {
    ActiveModel {
        id: Set(Uuid::now_v7()),
        build_id: Set(build_id),
        test_id: Set(test_id),
        name: Set(classified.name.clone()),
        status: Set(classified.status.as_str().to_string()),
        flaky_detected: Set(classified.flaky_detected),
        group: Set(classified.group.clone()),
        base_screenshot_id: Set(classified.base_screenshot_id),
        compare_screenshot_id: Set(classified.compare_screenshot_id),
        validation_status: Set(None),
        created_at: Set(now),
    }
    .insert(txn)
    .await
    .map_err(|e| AppError::Database(format!("Failed to insert screenshot diff: {}", e)))
}

/// Set the validation status of every diff of a build.
pub(crate) async fn set_validation_status(
    txn: &DatabaseTransaction,
    build_id: Uuid,
    status: ValidationStatus,
) -> AppResult<u64> {
    let result = ScreenshotDiff::update_many()
        .col_expr(
            diff::Column::ValidationStatus,
            Expr::value(status.as_str()),
        )
        .filter(diff::Column::BuildId.eq(build_id))
        .exec(txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to set validation status: {}", e)))?;

    Ok(result.rows_affected)
}

impl DbPool {
    /// All diffs of a build, ordered by name.
    pub async fn get_diffs_by_build(&self, build_id: Uuid) -> AppResult<Vec<diff::Model>> {
        let result = ScreenshotDiff::find()
            .filter(diff::Column::BuildId.eq(build_id))
            .order_by_asc(diff::Column::Name)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get screenshot diffs: {}", e)))?;

        Ok(result)
    }

    /// Status counts and the reduced validation verdict of a build.
    pub async fn diff_summary(
        &self,
        build_id: Uuid,
    ) -> AppResult<(BuildStats, Option<ValidationStatus>)> {
        let rows: Vec<(String, Option<String>)> = ScreenshotDiff::find()
            .select_only()
            .column(diff::Column::Status)
            .column(diff::Column::ValidationStatus)
            .filter(diff::Column::BuildId.eq(build_id))
            .into_tuple()
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to summarize diffs: {}", e)))?;

        let stats =
            BuildStats::from_statuses(rows.iter().filter_map(|(s, _)| ScreenshotDiffStatus::parse(s)));
        let validation = ValidationStatus::for_build(
            rows.iter()
                .map(|(_, v)| v.as_deref().and_then(ValidationStatus::parse)),
        );

        Ok((stats, validation))
    }

    /// Diffs of `build_id` keyed by name, with the checksum of their base
    /// screenshot, as input to flaky detection.
    pub async fn prior_diffs(&self, build_id: Uuid) -> AppResult<HashMap<String, PriorDiff>> {
        let diffs = self.get_diffs_by_build(build_id).await?;

        let base_ids: Vec<Uuid> = diffs.iter().filter_map(|d| d.base_screenshot_id).collect();
        let checksums: HashMap<Uuid, String> = if base_ids.is_empty() {
            HashMap::new()
        } else {
            Screenshot::find()
                .filter(screenshot::Column::Id.is_in(base_ids))
                .all(self.connection())
                .await
                .map_err(|e| AppError::Database(format!("Failed to load base screenshots: {}", e)))?
                .into_iter()
                .map(|s| (s.id, s.checksum))
                .collect()
        };

        Ok(diffs
            .into_iter()
            .filter_map(|d| {
                let status = ScreenshotDiffStatus::parse(&d.status)?;
                let base_checksum = d
                    .base_screenshot_id
                    .and_then(|id| checksums.get(&id).cloned());
                Some((
                    d.name,
                    PriorDiff {
                        status,
                        base_checksum,
                        created_at: d.created_at,
                    },
                ))
            })
            .collect())
    }
}
