//! Database queries for builds.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::entity::build::{self, ActiveModel, Entity as Build};
use crate::entity::project::{self, Entity as Project};
use crate::error::{AppError, AppResult};
use crate::models::{BuildType, CreateBuildRequest, DEFAULT_BUILD_NAME, JobSignal, PageWindow};

use super::DbPool;
use super::screenshot_buckets::{BucketKey, create_bucket};

/// Lock a build row for the rest of the transaction.
pub(crate) async fn lock_build(txn: &DatabaseTransaction, build_id: Uuid) -> AppResult<build::Model> {
    Build::find_by_id(build_id)
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to lock build: {}", e)))?
        .ok_or_else(|| AppError::NotFound(format!("Build {}", build_id)))
}

/// Count one more received batch.
pub(crate) async fn record_batch(
    txn: &DatabaseTransaction,
    build: build::Model,
    now: DateTime<Utc>,
) -> AppResult<build::Model> {
    let batch_count = build.batch_count.unwrap_or(0) + 1;

    let mut active: ActiveModel = build.into();
    active.batch_count = Set(Some(batch_count));
    active.last_batch_at = Set(Some(now));
    active.updated_at = Set(now);

    active
        .update(txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to record batch: {}", e)))
}

/// Store the pairing outcome once diffs are classified.
pub(crate) async fn conclude_build(
    txn: &DatabaseTransaction,
    build: build::Model,
    base_bucket_id: Option<Uuid>,
    build_type: BuildType,
    now: DateTime<Utc>,
) -> AppResult<build::Model> {
    let mut active: ActiveModel = build.into();
    active.base_bucket_id = Set(base_bucket_id);
    active.build_type = Set(build_type.as_str().to_string());
    active.concluded_at = Set(Some(now));
    active.updated_at = Set(now);

    active
        .update(txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to conclude build: {}", e)))
}

impl DbPool {
    /// Insert a new build with the next number of its project.
    ///
    /// The project row is locked so concurrent creations get distinct,
    /// strictly increasing numbers.
    pub async fn insert_build(
        &self,
        project_id: Uuid,
        req: &CreateBuildRequest,
    ) -> AppResult<build::Model> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let project: project::Model = Project::find_by_id(project_id)
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(format!("Failed to lock project: {}", e)))?
            .ok_or_else(|| AppError::NotFound(format!("Project {}", project_id)))?;

        let last = Build::find()
            .filter(build::Column::ProjectId.eq(project_id))
            .order_by_desc(build::Column::Number)
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(format!("Failed to get last build number: {}", e)))?;
        let number = last.map_or(1, |b| b.number + 1);

        let name = req.name.as_deref().unwrap_or(DEFAULT_BUILD_NAME);
        let bucket = create_bucket(
            &txn,
            BucketKey {
                project_id,
                name,
                branch: &req.branch,
                commit: &req.commit,
            },
        )
        .await?;

        let now = Utc::now();
        let model = ActiveModel {
            id: Set(Uuid::now_v7()),
            project_id: Set(project_id),
            number: Set(number),
            name: Set(name.to_string()),
            branch: Set(req.branch.clone()),
            commit: Set(req.commit.clone()),
            build_type: Set(BuildType::for_branch(&req.branch, &project.reference_branch)
                .as_str()
                .to_string()),
            base_bucket_id: Set(None),
            compare_bucket_id: Set(bucket.id),
            batch_count: Set(Some(0)),
            total_batch: Set(req.total_batch),
            pr_number: Set(req.pr_number),
            pr_head_commit: Set(req.pr_head_commit.clone()),
            job_signal: Set(None),
            last_batch_at: Set(None),
            concluded_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let result = model
            .insert(&txn)
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert build: {}", e)))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit transaction: {}", e)))?;

        Ok(result)
    }

    /// Get a build by ID.
    pub async fn get_build(&self, id: Uuid) -> AppResult<Option<build::Model>> {
        let result = Build::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get build: {}", e)))?;

        Ok(result)
    }

    /// Get a build by ID or fail with `NotFound`.
    pub async fn require_build(&self, id: Uuid) -> AppResult<build::Model> {
        self.get_build(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Build {}", id)))
    }

    /// Get a build by its project number.
    pub async fn get_build_by_number(
        &self,
        project_id: Uuid,
        number: i32,
    ) -> AppResult<Option<build::Model>> {
        let result = Build::find()
            .filter(build::Column::ProjectId.eq(project_id))
            .filter(build::Column::Number.eq(number))
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get build by number: {}", e)))?;

        Ok(result)
    }

    /// List builds of a project, newest first.
    pub async fn list_builds(
        &self,
        project_id: Uuid,
        build_name: Option<&str>,
        window: PageWindow,
    ) -> AppResult<(Vec<build::Model>, u64)> {
        let mut select = Build::find().filter(build::Column::ProjectId.eq(project_id));

        if let Some(name) = build_name {
            select = select.filter(build::Column::Name.eq(name));
        }

        let total = select
            .clone()
            .count(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to count builds: {}", e)))?;

        let builds = select
            .order_by_desc(build::Column::Number)
            .offset(window.offset)
            .limit(window.limit)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list builds: {}", e)))?;

        Ok((builds, total))
    }

    /// Record a terminal signal from the job runner.
    ///
    /// Repeating the same signal is a no-op; a different one is a conflict.
    pub async fn set_job_signal(&self, build_id: Uuid, signal: JobSignal) -> AppResult<build::Model> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let build = lock_build(&txn, build_id).await?;

        let result = match build.job_signal.as_deref().and_then(JobSignal::parse) {
            Some(existing) if existing == signal => build,
            Some(existing) => {
                return Err(AppError::Conflict(format!(
                    "Build {} was already signalled {}",
                    build_id, existing
                )));
            }
            None => {
                let mut active: ActiveModel = build.into();
                active.job_signal = Set(Some(signal.as_str().to_string()));
                active.updated_at = Set(Utc::now());
                active
                    .update(&txn)
                    .await
                    .map_err(|e| AppError::Database(format!("Failed to set job signal: {}", e)))?
            }
        };

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit transaction: {}", e)))?;

        Ok(result)
    }

    /// The concluded build that ran before `build` on the same branch.
    pub async fn previous_build(&self, build: &build::Model) -> AppResult<Option<build::Model>> {
        let result = Build::find()
            .filter(build::Column::ProjectId.eq(build.project_id))
            .filter(build::Column::Name.eq(build.name.as_str()))
            .filter(build::Column::Branch.eq(build.branch.as_str()))
            .filter(build::Column::Number.lt(build.number))
            .filter(build::Column::ConcludedAt.is_not_null())
            .order_by_desc(build::Column::Number)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get previous build: {}", e)))?;

        Ok(result)
    }

    /// Unconcluded, unsignalled builds whose last activity falls in `(from, to]`.
    pub async fn list_builds_idle_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<build::Model>> {
        let result = Build::find()
            .filter(build::Column::ConcludedAt.is_null())
            .filter(build::Column::JobSignal.is_null())
            .filter(Expr::cust_with_values(
                "COALESCE(last_batch_at, created_at) > $1",
                [from],
            ))
            .filter(Expr::cust_with_values(
                "COALESCE(last_batch_at, created_at) <= $1",
                [to],
            ))
            .order_by_asc(build::Column::Id)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list idle builds: {}", e)))?;

        Ok(result)
    }

    /// Builds whose compare bucket completed but whose diffs were never
    /// persisted, untouched since `before`.
    pub async fn list_unconcluded_complete_builds(
        &self,
        before: DateTime<Utc>,
    ) -> AppResult<Vec<build::Model>> {
        let result = Build::find()
            .filter(build::Column::ConcludedAt.is_null())
            .filter(build::Column::JobSignal.is_null())
            .filter(build::Column::UpdatedAt.lt(before))
            .filter(Expr::cust(
                "EXISTS (SELECT 1 FROM screenshot_buckets sb WHERE sb.id = builds.compare_bucket_id AND sb.complete)",
            ))
            .order_by_asc(build::Column::Id)
            .all(self.connection())
            .await
            .map_err(|e| {
                AppError::Database(format!("Failed to list unconcluded builds: {}", e))
            })?;

        Ok(result)
    }
}
