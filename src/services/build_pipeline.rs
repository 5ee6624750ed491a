//! Build pipeline.
//!
//! Drives a build through its lifecycle: creation, batch ingestion, and
//! finalization once the last batch lands (complete the compare bucket,
//! resolve the base, classify diffs, record test stability). Every fact that
//! can change the derived status is announced on the event broadcaster.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sea_orm::TransactionTrait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::DbPool;
use crate::db::builds::{conclude_build, lock_build, record_batch};
use crate::db::screenshot_buckets::{
    append_screenshots, complete_bucket, count_screenshots, lock_bucket,
};
use crate::db::screenshot_diffs::{insert_diff, set_validation_status};
use crate::db::test_history::{
    increment_daily_change, lock_or_create_test, save_test_state,
};
use crate::entity::build;
use crate::error::{AppError, AppResult};
use crate::models::{
    BuildEvent, BuildResponse, BuildStats, BuildStatus, BuildType, Connection,
    CreateBuildRequest, CreateProjectRequest, JobSignal, ListBuildsParams, ListTestsParams,
    MuteTestsRequest, MuteTestsResponse, PageWindow, ProjectResponse, ScreenshotDiffResponse,
    ScreenshotUpload, SetValidationStatusResponse, TestIdentity, TestResponse,
    UpdateTestStatusesRequest, UpdateTestStatusesResponse, UploadBatchRequest,
    UploadBatchResponse, ValidationStatus,
};
use crate::services::build_status::{BuildSignals, aggregate};
use crate::services::diff_classifier::{ImageDiffer, classify};
use crate::services::event_broadcaster::EventBroadcaster;
use crate::services::test_stability::{
    DAILY_CHANGES_DAYS, TestState, counts_as_change, daily_changes, record_build_diff,
    test_response,
};

/// Longest accepted screenshot name.
const MAX_SCREENSHOT_NAME_LEN: usize = 1024;

/// Reject malformed batches before any row is locked.
pub fn validate_batch(screenshots: &[ScreenshotUpload], max: usize) -> AppResult<()> {
    if screenshots.is_empty() {
        return Err(AppError::InvalidInput(
            "Batch must contain at least one screenshot".to_string(),
        ));
    }
    if screenshots.len() > max {
        return Err(AppError::InvalidInput(format!(
            "Batch has {} screenshots, maximum is {}",
            screenshots.len(),
            max
        )));
    }

    for screenshot in screenshots {
        if screenshot.name.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Screenshot name must not be empty".to_string(),
            ));
        }
        if screenshot.name.len() > MAX_SCREENSHOT_NAME_LEN {
            return Err(AppError::InvalidInput(format!(
                "Screenshot name exceeds {} bytes",
                MAX_SCREENSHOT_NAME_LEN
            )));
        }
        let checksum = screenshot.checksum.as_str();
        if checksum.len() != 64 || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AppError::InvalidInput(format!(
                "Screenshot '{}' checksum must be a hex SHA-256 digest",
                screenshot.name
            )));
        }
    }

    Ok(())
}

/// Count the completing batch asserts for its bucket: the total declared by
/// the client, or what is attached when it declared none.
pub fn completion_count(attached: u64, declared: Option<i32>) -> AppResult<i32> {
    match declared {
        Some(count) if count < 0 => Err(AppError::InvalidInput(
            "screenshotCount must not be negative".to_string(),
        )),
        Some(count) => Ok(count),
        None => i32::try_from(attached).map_err(|_| {
            AppError::InvalidInput(format!("{} screenshots exceed the bucket limit", attached))
        }),
    }
}

/// Reject build requests the schema would refuse.
pub fn validate_build_request(req: &CreateBuildRequest) -> AppResult<()> {
    if req.branch.trim().is_empty() {
        return Err(AppError::InvalidInput("branch must not be empty".to_string()));
    }
    if req.commit.trim().is_empty() || req.commit.len() > 64 {
        return Err(AppError::InvalidInput(
            "commit must be between 1 and 64 characters".to_string(),
        ));
    }
    if let Some(name) = &req.name
        && name.trim().is_empty()
    {
        return Err(AppError::InvalidInput("name must not be empty".to_string()));
    }
    if let Some(total) = req.total_batch
        && total < 1
    {
        return Err(AppError::InvalidInput(
            "totalBatch must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Orchestrates builds on top of the database and the pure engine.
#[derive(Clone)]
pub struct BuildPipeline {
    pool: DbPool,
    broadcaster: EventBroadcaster,
    differ: Arc<dyn ImageDiffer>,
    engine: EngineConfig,
}

impl BuildPipeline {
    pub fn new(
        pool: DbPool,
        broadcaster: EventBroadcaster,
        differ: Arc<dyn ImageDiffer>,
        engine: EngineConfig,
    ) -> Self {
        Self {
            pool,
            broadcaster,
            differ,
            engine,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    /// Create a project.
    pub async fn create_project(&self, req: CreateProjectRequest) -> AppResult<ProjectResponse> {
        if req.name.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Project name must not be empty".to_string(),
            ));
        }
        let project = self
            .pool
            .insert_project(&req.name, req.reference_branch.as_deref())
            .await?;
        info!("Created project {} ({})", project.name, project.id);
        Ok(project.into())
    }

    /// Create a build and its compare bucket.
    pub async fn create_build(
        &self,
        project_id: Uuid,
        req: CreateBuildRequest,
    ) -> AppResult<BuildResponse> {
        validate_build_request(&req)?;

        let build = self.pool.insert_build(project_id, &req).await?;
        info!(
            "Created build #{} ({}) for project {} on {}@{}",
            build.number, build.id, project_id, build.branch, build.commit
        );

        self.broadcaster
            .emit(BuildEvent::BuildCreated { build_id: build.id });

        self.build_response(build).await
    }

    /// Apply one upload batch. The batch that completes the build triggers
    /// finalization before the response is returned.
    ///
    /// A finalization failure does not fail the upload: the batch is already
    /// committed, so the build stays in progress until the status watcher
    /// resumes it.
    pub async fn upload_batch(
        &self,
        build_id: Uuid,
        req: UploadBatchRequest,
    ) -> AppResult<UploadBatchResponse> {
        validate_batch(&req.screenshots, self.engine.max_screenshots_per_batch)?;

        let now = Utc::now();
        let txn = self
            .pool
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let build = lock_build(&txn, build_id).await?;

        if let Some(signal) = build.job_signal.as_deref() {
            return Err(AppError::Conflict(format!(
                "Build {} was {} by the job runner",
                build_id, signal
            )));
        }

        let gate = BuildSignals {
            job_signal: None,
            batch_count: build.batch_count,
            total_batch: build.total_batch,
            bucket_complete: false,
            concluded: false,
            last_batch_at: build.last_batch_at,
            created_at: build.created_at,
            build_type: BuildType::Check,
            stats: BuildStats::default(),
            validation: None,
        };
        let total = gate.effective_total();
        if gate.received() >= total {
            return Err(AppError::Conflict(format!(
                "Build {} already received all {} batches",
                build_id, total
            )));
        }
        if gate.is_expired(now, self.engine.build_expiration) {
            return Err(AppError::Conflict(format!("Build {} has expired", build_id)));
        }

        let bucket = lock_bucket(&txn, build.compare_bucket_id).await?;
        let refs = append_screenshots(&txn, &bucket, &req.screenshots).await?;
        let build = record_batch(&txn, build, now).await?;

        let batch_count = build.batch_count.unwrap_or(0);
        let last_batch = batch_count >= total;
        if last_batch {
            let attached = count_screenshots(&txn, bucket.id).await?;
            let expected = completion_count(attached, req.screenshot_count)?;
            complete_bucket(&txn, bucket, expected).await?;
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit transaction: {}", e)))?;

        let attached = refs.iter().filter(|r| r.attached).count() as u64;
        info!(
            "Build {} received batch {}/{} ({} screenshots attached)",
            build_id, batch_count, total, attached
        );
        self.broadcaster.emit(BuildEvent::BatchReceived {
            build_id,
            batch_count,
            total_batch: build.total_batch,
        });

        if last_batch && let Err(e) = self.finalize(build_id).await {
            warn!(
                "Build {} received its last batch but finalization failed: {}",
                build_id, e
            );
        }

        let build = self.pool.require_build(build_id).await?;
        let (status, _) = self.build_status(&build, Utc::now()).await?;

        Ok(UploadBatchResponse {
            build_id,
            batch_count,
            total_batch: build.total_batch,
            attached,
            finalized: build.concluded_at.is_some(),
            status,
        })
    }

    /// Pair, classify and persist the diffs of a build whose compare bucket is
    /// complete. Safe to call again: a concluded build is left untouched.
    pub async fn finalize(&self, build_id: Uuid) -> AppResult<()> {
        let build = self.pool.require_build(build_id).await?;
        if build.concluded_at.is_some() {
            return Ok(());
        }

        let project = self.pool.require_project(build.project_id).await?;
        let compare = self
            .pool
            .get_bucket(build.compare_bucket_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Screenshot bucket {}", build.compare_bucket_id)))?;
        if !compare.complete {
            return Err(AppError::InvalidTransition(format!(
                "Build {} compare bucket is not complete",
                build_id
            )));
        }

        let build_type = BuildType::parse(&build.build_type).unwrap_or(BuildType::Check);
        let base = self
            .pool
            .resolve_base(&compare, &project.reference_branch, build_type)
            .await?;
        let build_type = if base.is_some() {
            build_type
        } else {
            BuildType::Orphan
        };

        let base_screenshots = match &base {
            Some(base) => self.pool.list_screenshots(base.id).await?,
            None => Vec::new(),
        };
        let compare_screenshots = self.pool.list_screenshots(compare.id).await?;
        let prior = match self.pool.previous_build(&build).await? {
            Some(previous) => self.pool.prior_diffs(previous.id).await?,
            None => HashMap::new(),
        };

        let now = Utc::now();
        let diffs = classify(
            &base_screenshots,
            &compare_screenshots,
            self.differ.as_ref(),
            &prior,
            self.engine.classifier_policy(),
            now,
        )
        .await;

        let txn = self
            .pool
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let build = lock_build(&txn, build_id).await?;
        if build.concluded_at.is_some() {
            return Ok(());
        }

        // Diffs are sorted by name, so test rows are always locked in the same order
        let policy = self.engine.stability_policy();
        for diff in &diffs {
            let identity = TestIdentity {
                project_id: build.project_id,
                build_name: build.name.clone(),
                screenshot_name: diff.name.clone(),
            };
            let test = lock_or_create_test(&txn, &identity).await?;
            let test = match record_build_diff(
                &TestState::from_model(&test),
                build.number,
                diff.status,
                diff.flaky_detected,
                &policy,
                now,
            ) {
                Some(state) => save_test_state(&txn, test, &state).await?,
                None => {
                    debug!(
                        "Test {} already tracks a build newer than #{}",
                        test.id, build.number
                    );
                    test
                }
            };
            if counts_as_change(diff.status) {
                increment_daily_change(&txn, test.id, now.date_naive()).await?;
            }
            insert_diff(&txn, build_id, Some(test.id), diff, now).await?;
        }

        conclude_build(&txn, build, base.as_ref().map(|b| b.id), build_type, now).await?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit transaction: {}", e)))?;

        let stats = BuildStats::from_statuses(diffs.iter().map(|d| d.status));
        info!(
            "Build {} classified as {}: {} diffs ({} added, {} changed, {} removed, {} failed)",
            build_id,
            build_type,
            stats.total,
            stats.added,
            stats.changed,
            stats.removed,
            stats.failure
        );
        if stats.failure > 0 {
            warn!("Build {} has {} failed comparisons", build_id, stats.failure);
        }

        self.broadcaster.emit(BuildEvent::DiffsClassified {
            build_id,
            diff_count: stats.total,
        });

        Ok(())
    }

    /// Record a terminal signal from the job runner.
    pub async fn signal(&self, build_id: Uuid, signal: JobSignal) -> AppResult<BuildResponse> {
        let build = self.pool.set_job_signal(build_id, signal).await?;
        info!("Build {} signalled {}", build_id, signal);
        self.broadcaster
            .emit(BuildEvent::JobSignalled { build_id, signal });
        self.build_response(build).await
    }

    /// Set the human verdict on every diff of a concluded build.
    pub async fn set_validation_status(
        &self,
        build_id: Uuid,
        validation_status: ValidationStatus,
    ) -> AppResult<SetValidationStatusResponse> {
        let txn = self
            .pool
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let build = lock_build(&txn, build_id).await?;
        let (status, _) = self.build_status(&build, Utc::now()).await?;
        if !status.is_concluded() {
            return Err(AppError::InvalidTransition(format!(
                "Build {} is {}; only concluded builds can be validated",
                build_id, status
            )));
        }

        let updated_diffs = set_validation_status(&txn, build_id, validation_status).await?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit transaction: {}", e)))?;

        info!(
            "Build {} validation set to {} ({} diffs)",
            build_id, validation_status, updated_diffs
        );
        self.broadcaster.emit(BuildEvent::ValidationChanged {
            build_id,
            validation_status,
        });

        let (status, _) = self.build_status(&build, Utc::now()).await?;
        Ok(SetValidationStatusResponse {
            build_id,
            validation_status,
            status,
            updated_diffs,
        })
    }

    /// Gather the aggregation inputs of a build.
    pub async fn build_signals(&self, build: &build::Model) -> AppResult<BuildSignals> {
        let bucket_complete = self
            .pool
            .get_bucket(build.compare_bucket_id)
            .await?
            .is_some_and(|b| b.complete);
        let (stats, validation) = self.pool.diff_summary(build.id).await?;

        Ok(BuildSignals {
            job_signal: build.job_signal.as_deref().and_then(JobSignal::parse),
            batch_count: build.batch_count,
            total_batch: build.total_batch,
            bucket_complete,
            concluded: build.concluded_at.is_some(),
            last_batch_at: build.last_batch_at,
            created_at: build.created_at,
            build_type: BuildType::parse(&build.build_type).unwrap_or(BuildType::Check),
            stats,
            validation,
        })
    }

    /// Derived status of a build at `now`, with its diff counts.
    pub async fn build_status(
        &self,
        build: &build::Model,
        now: DateTime<Utc>,
    ) -> AppResult<(BuildStatus, BuildStats)> {
        let signals = self.build_signals(build).await?;
        let status = aggregate(&signals, now, self.engine.build_expiration);
        Ok((status, signals.stats))
    }

    /// Derived status of a build by ID.
    pub async fn status_of(&self, build_id: Uuid) -> AppResult<BuildStatus> {
        let build = self.pool.require_build(build_id).await?;
        let (status, _) = self.build_status(&build, Utc::now()).await?;
        Ok(status)
    }

    async fn build_response(&self, build: build::Model) -> AppResult<BuildResponse> {
        let (status, stats) = self.build_status(&build, Utc::now()).await?;
        let stats = build.concluded_at.is_some().then_some(stats);
        Ok(BuildResponse::from_model(build, status, stats))
    }

    /// `build(number)` query.
    pub async fn get_build(&self, project_id: Uuid, number: i32) -> AppResult<BuildResponse> {
        let build = self
            .pool
            .get_build_by_number(project_id, number)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Build #{}", number)))?;
        self.build_response(build).await
    }

    /// `project.builds(after, first, buildName)` query.
    pub async fn list_builds(
        &self,
        project_id: Uuid,
        params: &ListBuildsParams,
    ) -> AppResult<Connection<BuildResponse>> {
        self.pool.require_project(project_id).await?;

        let window = PageWindow::new(params.after, params.first);
        let (builds, total) = self
            .pool
            .list_builds(project_id, params.build_name.as_deref(), window)
            .await?;

        let mut edges = Vec::with_capacity(builds.len());
        for build in builds {
            edges.push(self.build_response(build).await?);
        }

        Ok(Connection::new(edges, window, total))
    }

    /// Screenshot diffs of a build.
    pub async fn get_diffs(&self, build_id: Uuid) -> AppResult<Vec<ScreenshotDiffResponse>> {
        self.pool.require_build(build_id).await?;
        let diffs = self.pool.get_diffs_by_build(build_id).await?;
        Ok(diffs.into_iter().map(Into::into).collect())
    }

    /// Tests of a project with their last week of changes.
    pub async fn list_tests(
        &self,
        project_id: Uuid,
        params: &ListTestsParams,
    ) -> AppResult<Connection<TestResponse>> {
        self.pool.require_project(project_id).await?;

        let window = PageWindow::new(params.after, params.first);
        let (tests, total) = self
            .pool
            .list_tests(project_id, params.build_name.as_deref(), window)
            .await?;

        let today = Utc::now().date_naive();
        let since = today - Duration::days(DAILY_CHANGES_DAYS - 1);
        let ids: Vec<Uuid> = tests.iter().map(|t| t.id).collect();
        let mut rows = self.pool.daily_change_rows(&ids, since).await?;

        let policy = self.engine.stability_policy();
        let edges = tests
            .into_iter()
            .map(|test| {
                let test_rows = rows.remove(&test.id).unwrap_or_default();
                let changes = daily_changes(&test_rows, today, DAILY_CHANGES_DAYS);
                test_response(test, changes, &policy)
            })
            .collect();

        Ok(Connection::new(edges, window, total))
    }

    /// Test read model.
    pub async fn get_test(&self, test_id: Uuid) -> AppResult<TestResponse> {
        let test = self
            .pool
            .get_test(test_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Test {}", test_id)))?;

        let today = Utc::now().date_naive();
        let since = today - Duration::days(DAILY_CHANGES_DAYS - 1);
        let rows = self
            .pool
            .daily_change_rows(&[test.id], since)
            .await?
            .remove(&test.id)
            .unwrap_or_default();

        let policy = self.engine.stability_policy();
        Ok(test_response(
            test,
            daily_changes(&rows, today, DAILY_CHANGES_DAYS),
            &policy,
        ))
    }

    /// `muteTests(ids, muted, muteUntil?)`.
    pub async fn mute_tests(&self, req: MuteTestsRequest) -> AppResult<MuteTestsResponse> {
        if req.ids.is_empty() {
            return Ok(MuteTestsResponse {
                ids: Vec::new(),
                mute: false,
                mute_until: None,
            });
        }

        let mute_until = if req.muted { req.mute_until } else { None };
        let updated = self
            .pool
            .mute_tests(&req.ids, req.muted, mute_until)
            .await?;
        info!("{} {} tests", if req.muted { "Muted" } else { "Unmuted" }, updated);

        Ok(MuteTestsResponse {
            ids: req.ids,
            mute: req.muted,
            mute_until,
        })
    }

    /// `updateTestStatuses(ids, status)`.
    pub async fn update_test_statuses(
        &self,
        req: UpdateTestStatusesRequest,
    ) -> AppResult<UpdateTestStatusesResponse> {
        let ids = self
            .pool
            .update_test_statuses(&req.ids, req.status, Utc::now())
            .await?;
        info!("Set {} tests to {}", ids.len(), req.status);

        Ok(UpdateTestStatusesResponse {
            ids,
            status: req.status,
        })
    }

    /// Announce builds that went idle in `(from, to]` and are now expired.
    pub async fn sweep_expired(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        let candidates = self.pool.list_builds_idle_between(from, to).await?;

        let mut expired = Vec::new();
        for build in candidates {
            let (status, _) = self.build_status(&build, now).await?;
            if status == BuildStatus::Expired {
                self.broadcaster
                    .emit(BuildEvent::Expired { build_id: build.id });
                expired.push(build.id);
            }
        }

        Ok(expired)
    }

    /// Finalize builds whose last batch landed but whose diffs were never
    /// written, e.g. after a restart in between.
    pub async fn resume_stalled(&self, before: DateTime<Utc>) -> AppResult<usize> {
        let stalled = self.pool.list_unconcluded_complete_builds(before).await?;
        let count = stalled.len();

        for build in stalled {
            if let Err(e) = self.finalize(build.id).await {
                warn!("Failed to resume finalization of build {}: {}", build.id, e);
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, checksum: &str) -> ScreenshotUpload {
        ScreenshotUpload {
            name: name.to_string(),
            checksum: checksum.to_string(),
            group: None,
        }
    }

    fn digest() -> String {
        "ab".repeat(32)
    }

    #[test]
    fn test_validate_batch_accepts_well_formed() {
        let batch = vec![upload("home", &digest()), upload("login", &digest())];
        assert!(validate_batch(&batch, 10).is_ok());
    }

    #[test]
    fn test_validate_batch_rejects_empty_and_oversized() {
        assert!(matches!(
            validate_batch(&[], 10),
            Err(AppError::InvalidInput(_))
        ));
        let batch = vec![upload("a", &digest()), upload("b", &digest())];
        assert!(matches!(
            validate_batch(&batch, 1),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validate_batch_rejects_bad_checksum_and_name() {
        assert!(validate_batch(&[upload("home", "xyz")], 10).is_err());
        assert!(validate_batch(&[upload("home", &"g".repeat(64))], 10).is_err());
        assert!(validate_batch(&[upload("  ", &digest())], 10).is_err());
    }

    #[test]
    fn test_completion_count_prefers_declared_total() {
        assert_eq!(completion_count(3, None).unwrap(), 3);
        // A mismatch is left for the bucket store to reject
        assert_eq!(completion_count(3, Some(4)).unwrap(), 4);
        assert!(matches!(
            completion_count(3, Some(-1)),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            completion_count(u64::MAX, None),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_validate_build_request() {
        let mut req = CreateBuildRequest {
            branch: "feature".to_string(),
            commit: "a".repeat(40),
            name: None,
            total_batch: Some(2),
            pr_number: None,
            pr_head_commit: None,
        };
        assert!(validate_build_request(&req).is_ok());

        req.total_batch = Some(0);
        assert!(validate_build_request(&req).is_err());

        req.total_batch = None;
        req.commit = String::new();
        assert!(validate_build_request(&req).is_err());
    }
}
