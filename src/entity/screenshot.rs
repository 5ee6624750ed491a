//! Screenshot entity for SeaORM.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "screenshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub screenshot_bucket_id: Uuid,
    pub name: String,
    /// SHA-256 of the image file, hex encoded
    pub checksum: String,
    pub group: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::screenshot_bucket::Entity",
        from = "Column::ScreenshotBucketId",
        to = "super::screenshot_bucket::Column::Id",
        on_delete = "Cascade"
    )]
    Bucket,
}

impl Related<super::screenshot_bucket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bucket.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
