//! API endpoint modules.

pub mod builds;
pub mod health;
pub mod openapi;
pub mod projects;

pub use builds::configure_routes as configure_build_routes;
pub use health::configure_health_routes;
pub use openapi::ApiDoc;
pub use projects::configure_routes as configure_project_routes;
pub use tests::configure_routes as configure_test_routes;
