//! Build API handlers.

use actix_web::{HttpResponse, web};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    BuildResponse, CreateBuildRequest, JobSignalRequest, ListBuildsParams,
    ScreenshotDiffResponse, SetValidationStatusRequest, SetValidationStatusResponse,
    UploadBatchRequest, UploadBatchResponse,
};
use crate::services::BuildPipeline;

/// Create a build.
///
/// Assigns the next build number of the project and opens the compare bucket
/// for the build's branch and commit.
#[utoipa::path(
    post,
    path = "/api/v1/projects/{project_id}/builds",
    tag = "Builds",
    params(
        ("project_id" = Uuid, Path, description = "Project UUID")
    ),
    request_body = CreateBuildRequest,
    responses(
        (status = 201, description = "Build created", body = BuildResponse),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse),
        (status = 404, description = "Project not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn create_build(
    pipeline: web::Data<BuildPipeline>,
    path: web::Path<Uuid>,
    body: web::Json<CreateBuildRequest>,
) -> AppResult<HttpResponse> {
    let project_id = path.into_inner();
    let build = pipeline.create_build(project_id, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(build))
}

/// List builds of a project, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/builds",
    tag = "Builds",
    params(
        ("project_id" = Uuid, Path, description = "Project UUID"),
        ("after" = Option<u64>, Query, description = "Number of builds to skip"),
        ("first" = Option<u64>, Query, description = "Page size (default 20, max 100)"),
        ("buildName" = Option<String>, Query, description = "Only builds with this name")
    ),
    responses(
        (status = 200, description = "Build connection", body = crate::models::Connection<BuildResponse>),
        (status = 404, description = "Project not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn list_builds(
    pipeline: web::Data<BuildPipeline>,
    path: web::Path<Uuid>,
    query: web::Query<ListBuildsParams>,
) -> AppResult<HttpResponse> {
    let project_id = path.into_inner();
    let connection = pipeline.list_builds(project_id, &query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(connection))
}

/// Get a build by its project number.
#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/builds/{number}",
    tag = "Builds",
    params(
        ("project_id" = Uuid, Path, description = "Project UUID"),
        ("number" = i32, Path, description = "Build number")
    ),
    responses(
        (status = 200, description = "Build", body = BuildResponse),
        (status = 404, description = "Build not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn get_build(
    pipeline: web::Data<BuildPipeline>,
    path: web::Path<(Uuid, i32)>,
) -> AppResult<HttpResponse> {
    let (project_id, number) = path.into_inner();
    let build = pipeline.get_build(project_id, number).await?;
    Ok(HttpResponse::Ok().json(build))
}

/// Upload one batch of screenshots.
///
/// The batch that completes the build also classifies its diffs.
#[utoipa::path(
    post,
    path = "/api/v1/builds/{build_id}/batches",
    tag = "Builds",
    params(
        ("build_id" = Uuid, Path, description = "Build UUID")
    ),
    request_body = UploadBatchRequest,
    responses(
        (status = 200, description = "Batch applied", body = UploadBatchResponse),
        (status = 400, description = "Invalid batch", body = crate::error::ErrorResponse),
        (status = 404, description = "Build not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Build no longer accepts batches or screenshot conflicts", body = crate::error::ErrorResponse),
    )
)]
pub async fn upload_batch(
    pipeline: web::Data<BuildPipeline>,
    path: web::Path<Uuid>,
    body: web::Json<UploadBatchRequest>,
) -> AppResult<HttpResponse> {
    let build_id = path.into_inner();
    let response = pipeline.upload_batch(build_id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Terminal signal from the job runner.
#[utoipa::path(
    post,
    path = "/api/v1/builds/{build_id}/signal",
    tag = "Builds",
    params(
        ("build_id" = Uuid, Path, description = "Build UUID")
    ),
    request_body = JobSignalRequest,
    responses(
        (status = 200, description = "Signal recorded", body = BuildResponse),
        (status = 404, description = "Build not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Build already signalled differently", body = crate::error::ErrorResponse),
    )
)]
pub async fn signal_build(
    pipeline: web::Data<BuildPipeline>,
    path: web::Path<Uuid>,
    body: web::Json<JobSignalRequest>,
) -> AppResult<HttpResponse> {
    let build_id = path.into_inner();
    let build = pipeline.signal(build_id, body.signal).await?;
    Ok(HttpResponse::Ok().json(build))
}

/// Screenshot diffs of a build.
#[utoipa::path(
    get,
    path = "/api/v1/builds/{build_id}/diffs",
    tag = "Builds",
    params(
        ("build_id" = Uuid, Path, description = "Build UUID")
    ),
    responses(
        (status = 200, description = "Screenshot diffs ordered by name", body = Vec<ScreenshotDiffResponse>),
        (status = 404, description = "Build not found", body = crate::error::ErrorResponse),
    )
)]
pub async fn get_build_diffs(
    pipeline: web::Data<BuildPipeline>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let diffs = pipeline.get_diffs(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(diffs))
}

/// Accept or reject the changes of a concluded build.
#[utoipa::path(
    post,
    path = "/api/v1/builds/{build_id}/validation-status",
    tag = "Builds",
    params(
        ("build_id" = Uuid, Path, description = "Build UUID")
    ),
    request_body = SetValidationStatusRequest,
    responses(
        (status = 200, description = "Validation status updated", body = SetValidationStatusResponse),
        (status = 404, description = "Build not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Build is not concluded", body = crate::error::ErrorResponse),
    )
)]
pub async fn set_validation_status(
    pipeline: web::Data<BuildPipeline>,
    path: web::Path<Uuid>,
    body: web::Json<SetValidationStatusRequest>,
) -> AppResult<HttpResponse> {
    let build_id = path.into_inner();
    let response = pipeline
        .set_validation_status(build_id, body.validation_status)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Configure build routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/projects/{project_id}/builds")
            .route(web::post().to(create_build))
            .route(web::get().to(list_builds)),
    )
    .service(
        web::resource("/projects/{project_id}/builds/{number}").route(web::get().to(get_build)),
    )
    .service(web::resource("/builds/{build_id}/batches").route(web::post().to(upload_batch)))
    .service(web::resource("/builds/{build_id}/signal").route(web::post().to(signal_build)))
    .service(web::resource("/builds/{build_id}/diffs").route(web::get().to(get_build_diffs)))
    .service(
        web::resource("/builds/{build_id}/validation-status")
            .route(web::post().to(set_validation_status)),
    );
}
