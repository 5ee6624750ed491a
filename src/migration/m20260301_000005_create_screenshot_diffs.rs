//! Migration: Create screenshot_diffs table.
//!
//! One row per distinct screenshot name compared within a build.

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
                CREATE TABLE screenshot_diffs (
                    id UUID PRIMARY KEY,
                    build_id UUID NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
                    test_id UUID REFERENCES tests(id) ON DELETE SET NULL,
                    name VARCHAR(1024) NOT NULL,
                    status VARCHAR(20) NOT NULL
                        CHECK (status IN ('added', 'changed', 'removed', 'unchanged', 'failure')),
                    flaky_detected BOOLEAN NOT NULL DEFAULT FALSE,
                    "group" VARCHAR(255),
                    base_screenshot_id UUID REFERENCES screenshots(id) ON DELETE SET NULL,
                    compare_screenshot_id UUID REFERENCES screenshots(id) ON DELETE SET NULL,
                    validation_status VARCHAR(20)
                        CHECK (validation_status IS NULL OR validation_status IN ('accepted', 'rejected', 'unknown')),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                    CONSTRAINT screenshot_diffs_has_side
                        CHECK (base_screenshot_id IS NOT NULL OR compare_screenshot_id IS NOT NULL),
                    UNIQUE (build_id, name)
                );

                CREATE INDEX idx_screenshot_diffs_test ON screenshot_diffs(test_id, created_at DESC)
                    WHERE test_id IS NOT NULL;
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
                DROP TABLE IF EXISTS screenshot_diffs CASCADE;
                "#,
            )
            .await?;

        Ok(())
    }
}
