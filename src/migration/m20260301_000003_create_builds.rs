//! Migration: Create builds table.
//!
//! Build status is derived at read time and has no column.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TABLE builds (
                    id UUID PRIMARY KEY,
                    project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    number INTEGER NOT NULL CHECK (number >= 1),
                    name VARCHAR(255) NOT NULL DEFAULT 'default',
                    branch VARCHAR(255) NOT NULL,
                    commit VARCHAR(64) NOT NULL,
                    type VARCHAR(20) NOT NULL
                        CHECK (type IN ('reference', 'check', 'orphan')),

                    base_bucket_id UUID REFERENCES screenshot_buckets(id) ON DELETE RESTRICT,
                    compare_bucket_id UUID NOT NULL REFERENCES screenshot_buckets(id) ON DELETE RESTRICT,

                    -- Batch progress (total_batch NULL = single batch)
                    batch_count INTEGER CHECK (batch_count IS NULL OR batch_count >= 0),
                    total_batch INTEGER CHECK (total_batch IS NULL OR total_batch >= 1),
                    last_batch_at TIMESTAMPTZ,

                    pr_number INTEGER,
                    pr_head_commit VARCHAR(64),

                    -- Terminal signal from the external job runner
                    job_signal VARCHAR(20)
                        CHECK (job_signal IS NULL OR job_signal IN ('aborted', 'error')),

                    concluded_at TIMESTAMPTZ,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                    CONSTRAINT builds_base_differs_from_compare
                        CHECK (base_bucket_id IS NULL OR base_bucket_id <> compare_bucket_id),
                    UNIQUE (project_id, number)
                );

                CREATE INDEX idx_builds_project_name ON builds(project_id, name, number DESC);
                CREATE INDEX idx_builds_branch ON builds(project_id, name, branch, number DESC);

                -- Expiration sweep: unfinished builds without a terminal signal
                CREATE INDEX idx_builds_open ON builds(last_batch_at)
                    WHERE concluded_at IS NULL AND job_signal IS NULL;

                CREATE TRIGGER update_builds_updated_at
                    BEFORE UPDATE ON builds
                    FOR EACH ROW
                    EXECUTE FUNCTION update_updated_at_column();
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                DROP TRIGGER IF EXISTS update_builds_updated_at ON builds;
                DROP TABLE IF EXISTS builds CASCADE;
                "#,
            )
            .await?;

        Ok(())
    }
}
