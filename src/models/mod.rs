//! Domain models for the visual review server.

use serde::Serialize;
use utoipa::ToSchema;

pub mod build;
pub mod build_event;
pub mod project;
pub mod screenshot_bucket;
pub mod screenshot_diff;

// Re-export commonly used types
pub use build::{
    BuildResponse, BuildStatus, BuildType, CreateBuildRequest, DEFAULT_BUILD_NAME, JobSignal,
    JobSignalRequest, ListBuildsParams, UploadBatchRequest, UploadBatchResponse,
};
pub use build_event::{BuildEvent, BuildEventMessage};
pub use project::{CreateProjectRequest, ProjectResponse};
pub use screenshot_bucket::{BucketRef, ScreenshotBucket, ScreenshotRef, ScreenshotUpload};
pub use screenshot_diff::{
    BuildStats, ScreenshotDiffResponse, ScreenshotDiffStatus, SetValidationStatusRequest,
    SetValidationStatusResponse, ValidationStatus,
};
pub use test::{
    DailyCount, ListTestsParams, MuteTestsRequest, MuteTestsResponse, TestIdentity, TestResponse,
    TestStatus, UpdateTestStatusesRequest, UpdateTestStatusesResponse,
};

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;
/// Largest OFFSET Postgres accepts.
const MAX_OFFSET: u64 = i64::MAX as u64;

/// Offset-style connection window: `after` rows are skipped, `first` are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: u64,
    pub limit: u64,
}

impl PageWindow {
    pub fn new(after: Option<u64>, first: Option<u64>) -> Self {
        Self {
            offset: after.unwrap_or(0).min(MAX_OFFSET),
            limit: first.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }
}

/// Pagination metadata, named as the GraphQL `PageInfo` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub total_count: u64,
}

/// Connection response: `{edges, pageInfo}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub edges: Vec<T>,
    pub page_info: PageInfo,
}

impl<T> Connection<T> {
    pub fn new(edges: Vec<T>, window: PageWindow, total_count: u64) -> Self {
        let has_next_page = window.offset.saturating_add(edges.len() as u64) < total_count;
        Connection {
            edges,
            page_info: PageInfo {
                has_next_page,
                total_count,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window_defaults_and_clamp() {
        assert_eq!(
            PageWindow::new(None, None),
            PageWindow {
                offset: 0,
                limit: 20
            }
        );
        assert_eq!(PageWindow::new(Some(40), Some(1000)).limit, 100);
        assert_eq!(PageWindow::new(None, Some(0)).limit, 1);
        assert_eq!(PageWindow::new(Some(u64::MAX), None).offset, i64::MAX as u64);
    }

    #[test]
    fn test_window_past_the_end_is_empty_page() {
        let window = PageWindow::new(Some(u64::MAX), Some(10));
        let connection: Connection<i32> = Connection::new(Vec::new(), window, 5);
        assert!(!connection.page_info.has_next_page);
    }

    #[test]
    fn test_connection_has_next_page() {
        let window = PageWindow::new(Some(0), Some(2));
        let connection = Connection::new(vec![1, 2], window, 5);
        assert!(connection.page_info.has_next_page);
        assert_eq!(connection.page_info.total_count, 5);

        let last = Connection::new(vec![5], PageWindow::new(Some(4), Some(2)), 5);
        assert!(!last.page_info.has_next_page);
    }

    #[test]
    fn test_connection_field_names() {
        let connection = Connection::new(vec!["a"], PageWindow::new(None, None), 1);
        let json = serde_json::to_value(&connection).unwrap();
        assert_eq!(json["edges"][0], "a");
        assert_eq!(json["pageInfo"]["hasNextPage"], false);
        assert_eq!(json["pageInfo"]["totalCount"], 1);
    }
}
