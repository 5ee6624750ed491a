//! Migration: Create screenshot_buckets and screenshots tables.
//!
//! A bucket holds the screenshots of one (branch, commit) upload and becomes
//! immutable once complete.

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
                CREATE TABLE screenshot_buckets (
                    id UUID PRIMARY KEY, -- UUIDv7, breaks created_at ties
                    project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    name VARCHAR(255) NOT NULL,
                    branch VARCHAR(255) NOT NULL,
                    commit VARCHAR(64) NOT NULL,
                    complete BOOLEAN NOT NULL DEFAULT FALSE,
                    screenshot_count INTEGER
                        CHECK (screenshot_count IS NULL OR screenshot_count >= 0),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                    CONSTRAINT screenshot_buckets_complete_has_count
                        CHECK (complete = FALSE OR screenshot_count IS NOT NULL)
                );

                -- Baseline lookup: complete buckets of a branch, newest first
                CREATE INDEX idx_screenshot_buckets_baseline
                    ON screenshot_buckets(project_id, name, branch, created_at DESC, id DESC)
                    WHERE complete = TRUE;

                -- Open bucket lookup for create-or-append
                CREATE INDEX idx_screenshot_buckets_open
                    ON screenshot_buckets(project_id, name, branch, commit)
                    WHERE complete = FALSE;

                CREATE TRIGGER update_screenshot_buckets_updated_at
                    BEFORE UPDATE ON screenshot_buckets
                    FOR EACH ROW
                    EXECUTE FUNCTION update_updated_at_column();

                CREATE TABLE screenshots (
                    id UUID PRIMARY KEY,
                    screenshot_bucket_id UUID NOT NULL
                        REFERENCES screenshot_buckets(id) ON DELETE CASCADE,
                    name VARCHAR(1024) NOT NULL,
                    checksum CHAR(64) NOT NULL,
                    "group" VARCHAR(255),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                    UNIQUE (screenshot_bucket_id, name)
                );
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
                DROP TABLE IF EXISTS screenshots CASCADE;
                DROP TRIGGER IF EXISTS update_screenshot_buckets_updated_at ON screenshot_buckets;
                DROP TABLE IF EXISTS screenshot_buckets CASCADE;
                "#,
            )
            .await?;

        Ok(())
    }
}
