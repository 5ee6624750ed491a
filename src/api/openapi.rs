//! OpenAPI documentation configuration.

use utoipa::OpenApi;

use crate::{api, error, models};

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Visual Review Server",
        version = "0.1.0",
        description = "Build lifecycle and screenshot-diff status engine for visual regression testing"
    ),
    servers(
        (url = "/", description = "Local server")
    ),
    paths(
        // Health endpoints
        api::health::health,
        api::health::ready,
        api::health::info,
        // Project endpoints
        api::projects::create_project,
        // Build endpoints
        api::builds::create_build,
        api::builds::list_builds,
        api::builds::get_build,
        api::builds::upload_batch,
        api::builds::signal_build,
        api::builds::get_build_diffs,
        api::builds::set_validation_status,
        // Test endpoints
        api::tests::list_tests,
        api::tests::get_test,
        api::tests::mute_tests,
        api::tests::update_test_statuses,
    ),
    components(
        schemas(
            // Common
            error::ErrorResponse,
            models::PageInfo,
            // Health
            api::health::HealthResponse,
            api::health::ReadyResponse,
            api::health::ServerInfoResponse,
            // Projects
            models::CreateProjectRequest,
            models::ProjectResponse,
            // Builds
            models::BuildType,
            models::BuildStatus,
            models::JobSignal,
            models::CreateBuildRequest,
            models::BuildResponse,
            models::ListBuildsParams,
            models::ScreenshotUpload,
            models::UploadBatchRequest,
            models::UploadBatchResponse,
            models::JobSignalRequest,
            // Diffs
            models::ScreenshotDiffStatus,
            models::ValidationStatus,
            models::BuildStats,
            models::ScreenshotDiffResponse,
            models::SetValidationStatusRequest,
            models::SetValidationStatusResponse,
            // Tests
            models::TestStatus,
            models::DailyCount,
            models::TestResponse,
            models::ListTestsParams,
            models::MuteTestsRequest,
            models::MuteTestsResponse,
            models::UpdateTestStatusesRequest,
            models::UpdateTestStatusesResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Projects", description = "Project registration"),
        (name = "Builds", description = "Build lifecycle, uploads and screenshot diffs"),
        (name = "Tests", description = "Test stability history and operator overrides")
    )
)]
pub struct ApiDoc;
