//! # HTTP Gateway
//!
//! Accepts raw CSV bodies over HTTP and answers with forecast, validation and
//! comparison results as JSON. Column choices and forecast settings come from
//! the query string; anything not given falls back to the loaded config.

mod server;

pub use server::{ForecastQuery, router, run};

use crate::config::AppConfig;
use crate::data::UploadStore;
use crate::error::PipelineError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared state handed to every handler.
pub type SharedState = Arc<GatewayState>;

pub struct GatewayState {
    pub config: AppConfig,
    /// Present when uploads are kept on disk.
    pub uploads: Option<Mutex<UploadStore>>,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(config: AppConfig, uploads: Option<UploadStore>) -> Self {
        Self {
            config,
            uploads: uploads.map(Mutex::new),
            started_at: Utc::now(),
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }

    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("server", &self.config.server)
            .field("uploads", &self.uploads.is_some())
            .finish()
    }
}

/// Error returned by a handler, rendered as `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Pipeline(PipelineError::Csv(_)) => StatusCode::BAD_REQUEST,
            Self::Pipeline(err) if err.is_input_error() => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Pipeline(err) => err.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipeline(err) => write!(f, "{err}"),
            Self::Internal(msg) => f.write_str(msg),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self::Pipeline(err)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("pipeline task failed: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Request rejected");
        }
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
