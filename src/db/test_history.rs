//! Database queries for tests and their daily change counters.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseTransaction,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
    TransactionTrait,
};
use uuid::Uuid;

use crate::entity::test::{self, ActiveModel, Entity as Test};
use crate::entity::test_stats_change::{self as stats_change, Entity as TestStatsChange};
use crate::error::{AppError, AppResult};
use crate::models::{PageWindow, TestIdentity, TestStatus};
use crate::services::test_stability::{TestState, override_status};

use super::DbPool;

/// Lock the test of `identity`, creating it on first sight.
pub(crate) async fn lock_or_create_test(
    txn: &DatabaseTransaction,
    identity: &TestIdentity,
) -> AppResult<test::Model> {
    let stmt = Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        r#"
        INSERT INTO tests (id, project_id, build_name, name)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (project_id, build_name, name) DO NOTHING
        "#,
        [
            Uuid::now_v7().into(),
            identity.project_id.into(),
            identity.build_name.clone().into(),
            identity.screenshot_name.clone().into(),
        ],
    );
    txn.execute_raw(stmt)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create test: {}", e)))?;

    Test::find()
        .filter(test::Column::ProjectId.eq(identity.project_id))
        .filter(test::Column::BuildName.eq(identity.build_name.as_str()))
        .filter(test::Column::Name.eq(identity.screenshot_name.as_str()))
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to lock test: {}", e)))?
        .ok_or_else(|| AppError::NotFound(format!("Test '{}'", identity.screenshot_name)))
}

/// Write back the tracked state of a locked test.
pub(crate) async fn save_test_state(
    txn: &DatabaseTransaction,
    model: test::Model,
    state: &TestState,
) -> AppResult<test::Model> {
    let mut active: ActiveModel = model.into();
    active.status = Set(state.status.as_str().to_string());
    active.mute = Set(state.mute);
    active.mute_until = Set(state.mute_until);
    active.stability_score = Set(state.stability_score);
    active.unstable = Set(state.unstable);
    active.unchanged_streak = Set(state.unchanged_streak);
    active.history = Set(state.history_json());
    active.last_build_number = Set(state.last_build_number);
    active.last_seen = Set(state.last_seen);
    active.resolved_date = Set(state.resolved_date);
    active.updated_at = Set(Utc::now());

    active
        .update(txn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to update test: {}", e)))
}

/// Add one change to the counter of `date`.
pub(crate) async fn increment_daily_change(
    txn: &DatabaseTransaction,
    test_id: Uuid,
    date: NaiveDate,
) -> AppResult<()> {
    let stmt = Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        r#"
        INSERT INTO test_stats_changes (test_id, date, count)
        VALUES ($1, $2, 1)
        ON CONFLICT (test_id, date)
        DO UPDATE SET count = test_stats_changes.count + 1
        "#,
        [test_id.into(), date.into()],
    );
    txn.execute_raw(stmt)
        .await
        .map_err(|e| AppError::Database(format!("Failed to record daily change: {}", e)))?;

    Ok(())
}

impl DbPool {
    /// Get a test by ID.
    pub async fn get_test(&self, id: Uuid) -> AppResult<Option<test::Model>> {
        let result = Test::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get test: {}", e)))?;

        Ok(result)
    }

    /// List tests of a project, ordered by build name then screenshot name.
    pub async fn list_tests(
        &self,
        project_id: Uuid,
        build_name: Option<&str>,
        window: PageWindow,
    ) -> AppResult<(Vec<test::Model>, u64)> {
        let mut select = Test::find().filter(test::Column::ProjectId.eq(project_id));

        if let Some(name) = build_name {
            select = select.filter(test::Column::BuildName.eq(name));
        }

        let total = select
            .clone()
            .count(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to count tests: {}", e)))?;

        let tests = select
            .order_by_asc(test::Column::BuildName)
            .order_by_asc(test::Column::Name)
            .offset(window.offset)
            .limit(window.limit)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list tests: {}", e)))?;

        Ok((tests, total))
    }

    /// Daily change counters since `since` (inclusive), grouped by test.
    pub async fn daily_change_rows(
        &self,
        test_ids: &[Uuid],
        since: NaiveDate,
    ) -> AppResult<HashMap<Uuid, Vec<(NaiveDate, i32)>>> {
        if test_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = TestStatsChange::find()
            .filter(stats_change::Column::TestId.is_in(test_ids.iter().copied()))
            .filter(stats_change::Column::Date.gte(since))
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get daily changes: {}", e)))?;

        let mut grouped: HashMap<Uuid, Vec<(NaiveDate, i32)>> = HashMap::new();
        for row in rows {
            grouped
                .entry(row.test_id)
                .or_default()
                .push((row.date, row.count));
        }

        Ok(grouped)
    }

    /// Set the mute flag of `ids`. Unmuting clears `mute_until`.
    pub async fn mute_tests(
        &self,
        ids: &[Uuid],
        muted: bool,
        mute_until: Option<DateTime<Utc>>,
    ) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mute_until = if muted { mute_until } else { None };
        let result = Test::update_many()
            .col_expr(test::Column::Mute, Expr::value(muted))
            .col_expr(test::Column::MuteUntil, Expr::value(mute_until))
            .filter(test::Column::Id.is_in(ids.iter().copied()))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to mute tests: {}", e)))?;

        Ok(result.rows_affected)
    }

    /// Operator override of test statuses. Returns the ids that exist.
    pub async fn update_test_statuses(
        &self,
        ids: &[Uuid],
        status: TestStatus,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Uuid>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let txn = self
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let tests = Test::find()
            .filter(test::Column::Id.is_in(ids.iter().copied()))
            .order_by_asc(test::Column::Id)
            .lock_exclusive()
            .all(&txn)
            .await
            .map_err(|e| AppError::Database(format!("Failed to lock tests: {}", e)))?;

        let mut updated = Vec::with_capacity(tests.len());
        for model in tests {
            let state = override_status(&TestState::from_model(&model), status, now);
            let saved = save_test_state(&txn, model, &state).await?;
            updated.push(saved.id);
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit transaction: {}", e)))?;

        Ok(updated)
    }
}
