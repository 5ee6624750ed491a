//! Project API handlers.

use actix_web::{HttpResponse, web};

use crate::error::AppResult;
use crate::models::{CreateProjectRequest, ProjectResponse};
use crate::services::BuildPipeline;

/// Register a project.
#[utoipa::path(
    post,
    path = "/api/v1/projects",
    tag = "Projects",
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created", body = ProjectResponse),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse),
        (status = 409, description = "Project name already taken", body = crate::error::ErrorResponse),
    )
)]
pub async fn create_project(
    pipeline: web::Data<BuildPipeline>,
    body: web::Json<CreateProjectRequest>,
) -> AppResult<HttpResponse> {
    let project = pipeline.create_project(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(project))
}

/// Configure project routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/projects").route(web::post().to(create_project)));
}
