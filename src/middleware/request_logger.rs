//! Request logging middleware.
//!
//! One line per finished request, leveled by outcome. Health probes are
//! logged at debug so container healthchecks do not flood the log, and
//! requests slower than [`SLOW_REQUEST`] are flagged (a finalizing batch
//! upload classifies every screenshot of the build inline).

use std::future::{Ready, ready};
use std::time::{Duration, Instant};

use actix_web::Error;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::http::StatusCode;
use futures_util::future::LocalBoxFuture;
use tracing::{debug, error, info, warn};

/// Requests taking longer than this are logged as slow.
pub const SLOW_REQUEST: Duration = Duration::from_secs(5);

const PROBE_PATHS: [&str; 2] = ["/api/v1/health", "/api/v1/ready"];

/// What is known about a request before it is handled.
struct RequestSummary {
    method: String,
    path: String,
    request_id: String,
    remote_addr: String,
    started: Instant,
}

impl RequestSummary {
    fn capture(req: &ServiceRequest) -> Self {
        Self {
            method: req.method().to_string(),
            path: req.path().to_string(),
            request_id: req
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string(),
            remote_addr: req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
                .to_string(),
            started: Instant::now(),
        }
    }

    fn is_probe(&self) -> bool {
        PROBE_PATHS.contains(&self.path.as_str())
    }

    fn finish(&self, status: StatusCode) {
        let elapsed = self.started.elapsed();
        let duration_ms = elapsed.as_millis();
        let code = status.as_u16();
        let method = self.method.as_str();
        let path = self.path.as_str();
        let request_id = self.request_id.as_str();
        let remote_addr = self.remote_addr.as_str();

        macro_rules! log_at {
            ($level:ident, $msg:literal) => {
                $level!(
                    target: "api",
                    method = %method,
                    path = %path,
                    status = code,
                    duration_ms = %duration_ms,
                    request_id = %request_id,
                    remote_addr = %remote_addr,
                    $msg
                )
            };
        }

        if status.is_server_error() {
            log_at!(error, "Server error");
        } else if status.is_client_error() {
            log_at!(warn, "Client error");
        } else if elapsed > SLOW_REQUEST {
            log_at!(warn, "Slow request");
        } else if self.is_probe() {
            log_at!(debug, "Probe");
        } else {
            log_at!(info, "Request completed");
        }
    }
}

/// Request logger middleware factory.
pub struct RequestLogger;

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware { service }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let summary = RequestSummary::capture(&req);
        let fut = self.service.call(req);

        Box::pin(async move {
            match fut.await {
                Ok(res) => {
                    summary.finish(res.status());
                    Ok(res)
                }
                Err(e) => {
                    summary.finish(e.as_response_error().status_code());
                    Err(e)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, test, web};

    #[actix_rt::test]
    async fn test_logger_passes_responses_through() {
        let app = test::init_service(
            App::new()
                .wrap(RequestLogger)
                .route("/ok", web::get().to(|| async { HttpResponse::Ok().finish() }))
                .route(
                    "/conflict",
                    web::post().to(|| async { HttpResponse::Conflict().finish() }),
                ),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/ok").to_request()).await;
        assert_eq!(resp.status().as_u16(), 200);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/conflict")
                .insert_header(("x-request-id", "abc"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 409);
    }

    #[::core::prelude::v1::test]
    fn test_probe_paths() {
        let req = test::TestRequest::get().uri("/api/v1/ready").to_srv_request();
        assert!(RequestSummary::capture(&req).is_probe());

        let req = test::TestRequest::post()
            .uri("/api/v1/builds/1/batches")
            .to_srv_request();
        assert!(!RequestSummary::capture(&req).is_probe());
    }
}
