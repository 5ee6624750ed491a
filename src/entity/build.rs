//! Build entity for SeaORM.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "builds")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub project_id: Uuid,
    /// Per-project sequence number, assigned under a project row lock
    pub number: i32,
    pub name: String,
    pub branch: String,
    pub commit: String,
    /// reference, check or orphan
    #[sea_orm(column_name = "type")]
    pub build_type: String,
    pub base_bucket_id: Option<Uuid>,
    pub compare_bucket_id: Uuid,
    pub batch_count: Option<i32>,
    pub total_batch: Option<i32>,
    pub pr_number: Option<i32>,
    pub pr_head_commit: Option<String>,
    /// Terminal signal from the job runner: NULL, aborted, error
    pub job_signal: Option<String>,
    pub last_batch_at: Option<DateTimeUtc>,
    /// Set once diffs have been classified
    pub concluded_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id",
        on_delete = "Cascade"
    )]
    Project,
    #[sea_orm(
        belongs_to = "super::screenshot_bucket::Entity",
        from = "Column::CompareBucketId",
        to = "super::screenshot_bucket::Column::Id",
        on_delete = "Restrict"
    )]
    CompareBucket,
    #[sea_orm(
        belongs_to = "super::screenshot_bucket::Entity",
        from = "Column::BaseBucketId",
        to = "super::screenshot_bucket::Column::Id",
        on_delete = "Restrict"
    )]
    BaseBucket,
    #[sea_orm(has_many = "super::screenshot_diff::Entity")]
    ScreenshotDiffs,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::screenshot_diff::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScreenshotDiffs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
