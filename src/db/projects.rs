//! Database queries for projects.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

use crate::entity::project::{self, ActiveModel, Entity as Project};
use crate::error::{AppError, AppResult};

use super::{DbPool, is_unique_violation};

/// Reference branch used when a project does not name one.
pub const DEFAULT_REFERENCE_BRANCH: &str = "main";

impl DbPool {
    /// Insert a new project.
    pub async fn insert_project(
        &self,
        name: &str,
        reference_branch: Option<&str>,
    ) -> AppResult<project::Model> {
        let now = Utc::now();

        let model = ActiveModel {
            id: Set(Uuid::now_v7()),
            name: Set(name.to_string()),
            reference_branch: Set(reference_branch
                .unwrap_or(DEFAULT_REFERENCE_BRANCH)
                .to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model.insert(self.connection()).await.map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("Project '{}' already exists", name))
            } else {
                AppError::Database(format!("Failed to insert project: {}", e))
            }
        })
    }

    /// Get a project by ID.
    pub async fn get_project(&self, id: Uuid) -> AppResult<Option<project::Model>> {
        let result = Project::find_by_id(id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get project: {}", e)))?;

        Ok(result)
    }

    /// Get a project by ID or fail with `NotFound`.
    pub async fn require_project(&self, id: Uuid) -> AppResult<project::Model> {
        self.get_project(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {}", id)))
    }
}
