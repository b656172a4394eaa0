//! HTTP merge service
//!
//! Exposes the merge pipeline behind two multipart endpoints. The pipeline runs on
//! the blocking pool; an abandoned request flags its job as cancelled so it stops
//! at the next stage boundary.

mod handlers;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{ConfigError, MergeConfig};
use crate::error::MergeError;
use crate::pipeline::MergePipeline;
use crate::scratch::sweep_stale;

pub use handlers::{MergeResponse, HEADER_JOB_ID, HEADER_MEMBER_COUNT, HEADER_PAGE_COUNT, HEADER_SECTION_COUNT, HEADER_WARNING_COUNT};

/// Errors that stop the server itself
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================
// State and routing
// ============================================================

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<MergePipeline>,
}

impl AppState {
    pub fn new(config: MergeConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            pipeline: Arc::new(MergePipeline::new(config)?),
        })
    }

    pub fn pipeline(&self) -> &MergePipeline {
        &self.pipeline
    }
}

/// Build the service router with its middleware stack
pub fn router(state: AppState) -> Router {
    let server = &state.pipeline.config().server;
    let upload_limit = server.upload_limit;
    let timeout = Duration::from_secs(server.request_timeout_secs);
    let cors = cors_layer(&server.cors_origins);

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/file-merger/merge", post(handlers::merge_files))
        .route("/file-merger/merge/", post(handlers::merge_files))
        .route("/column-merger/merge-columns", post(handlers::merge_columns))
        .route("/column-merger/merge-columns/", post(handlers::merge_columns))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(upload_limit))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([
            header::CONTENT_DISPOSITION,
            HeaderName::from_static(HEADER_JOB_ID),
            HeaderName::from_static(HEADER_MEMBER_COUNT),
            HeaderName::from_static(HEADER_WARNING_COUNT),
            HeaderName::from_static(HEADER_PAGE_COUNT),
            HeaderName::from_static(HEADER_SECTION_COUNT),
        ]);

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Run the server until Ctrl-C
pub async fn serve(config: MergeConfig) -> Result<(), ServerError> {
    let scratch_root = config.scratch.root.clone();
    match sweep_stale(&scratch_root, Duration::from_secs(config.scratch.stale_after_secs)) {
        Ok(report) if !report.removed.is_empty() => info!(
            removed = report.removed.len(),
            root = %scratch_root.display(),
            "Removed stale scratch directories"
        ),
        Ok(_) => {}
        Err(e) => warn!(root = %scratch_root.display(), error = %e, "Scratch sweep failed"),
    }

    let bind = config.server.bind.clone();
    let app = router(AppState::new(config)?);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(address = %listener.local_addr()?, "docmerge server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining requests");
}

// ============================================================
// Error responses
// ============================================================

/// JSON error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub member: Option<String>,
}

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                code: "INVALID_REQUEST".to_string(),
                message: message.into(),
                member: None,
            },
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::from(MergeError::Internal(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &ErrorBody {
        &self.body
    }
}

impl From<MergeError> for ApiError {
    fn from(err: MergeError) -> Self {
        let kind = err.kind();
        Self {
            status: StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body: ErrorBody {
                code: kind.code().to_string(),
                message: err.to_string(),
                member: err.member().map(str::to_string),
            },
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        let status = err.status();
        let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "RESOURCE_LIMIT"
        } else {
            "INVALID_REQUEST"
        };
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: err.body_text(),
                member: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(code = %self.body.code, message = %self.body.message, "Request failed");
        }
        (self.status, Json(self.body)).into_response()
    }
}
