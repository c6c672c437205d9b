//! HTTP routes built on axum.

use super::{ApiError, SharedState};
use crate::config::AppConfig;
use crate::data::{DataBatch, UploadEntry, read_csv};
use crate::error::{PipelineError, Result};
use crate::forecast::ModelKind;
use crate::pipeline::{
    ModelComparison, PipelineOutcome, PipelineRequest, RowFilter, compare_models, run_pipeline,
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const DEFAULT_UPLOAD_NAME: &str = "upload.csv";

/// Query parameters accepted by `/api/forecast` and `/api/compare`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ForecastQuery {
    pub date_column: String,
    pub target_column: String,
    /// Comma separated.
    pub regressors: Option<String>,
    pub horizon_days: Option<u32>,
    pub yearly: Option<bool>,
    pub weekly: Option<bool>,
    pub daily: Option<bool>,
    pub filter_column: Option<String>,
    pub filter_value: Option<String>,
    pub model: Option<String>,
    pub train_fraction: Option<f64>,
    /// Comma separated, compare only. Defaults to every backend.
    pub models: Option<String>,
    /// File name recorded in the upload store.
    pub name: Option<String>,
    /// Keep the upload even when `data.store_uploads` is off.
    pub store: Option<bool>,
}

fn comma_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

impl ForecastQuery {
    /// Merge the query over the forecast settings of `config`.
    pub fn to_request(&self, config: &AppConfig) -> Result<PipelineRequest> {
        let filter = match (&self.filter_column, &self.filter_value) {
            (Some(column), Some(value)) => Some(RowFilter::parse(column.as_str(), value)),
            (None, None) => None,
            _ => {
                return Err(PipelineError::invalid_parameter(
                    "filter",
                    "filter_column and filter_value must be given together",
                ));
            }
        };

        let mut request = PipelineRequest::new(config, &self.date_column, &self.target_column)
            .with_regressors(comma_list(self.regressors.as_deref()))
            .with_filter(filter);

        let settings = &mut request.settings;
        if let Some(h) = self.horizon_days {
            settings.horizon_days = h;
        }
        if let Some(f) = self.train_fraction {
            settings.train_fraction = f;
        }
        if let Some(model) = &self.model {
            settings.model = model.parse()?;
        }
        if let Some(v) = self.yearly {
            settings.seasonality.yearly = v;
        }
        if let Some(v) = self.weekly {
            settings.seasonality.weekly = v;
        }
        if let Some(v) = self.daily {
            settings.seasonality.daily = v;
        }
        Ok(request)
    }

    pub fn model_kinds(&self) -> Result<Vec<ModelKind>> {
        let names = comma_list(self.models.as_deref());
        if names.is_empty() {
            return Ok(ModelKind::ALL.to_vec());
        }
        names.iter().map(|n| n.parse()).collect()
    }
}

/// Build the router with every route and layer attached.
pub fn router(state: SharedState) -> Router {
    let body_limit = state.config.server.max_upload_bytes();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/forecast", post(forecast_handler))
        .route("/api/compare", post(compare_handler))
        .route("/api/uploads", get(uploads_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.uptime_secs(),
        "uploads_enabled": state.uploads.is_some(),
    }))
}

/// Parse the body and keep it in the upload store when requested. Runs on
/// the blocking pool.
fn ingest(state: &SharedState, query: &ForecastQuery, body: &[u8]) -> Result<DataBatch> {
    let batch = read_csv(body, state.config.data.delimiter, None)?;
    let wanted = query.store.unwrap_or(state.config.data.store_uploads);
    if let (true, Some(store)) = (wanted, &state.uploads) {
        let name = query.name.as_deref().unwrap_or(DEFAULT_UPLOAD_NAME);
        let entry = store.blocking_lock().store(name, body, batch.row_count())?;
        tracing::info!(id = %entry.id, file = %entry.file_name, "Stored upload");
    }
    Ok(batch)
}

async fn forecast_handler(
    State(state): State<SharedState>,
    Query(query): Query<ForecastQuery>,
    body: Bytes,
) -> std::result::Result<Json<PipelineOutcome>, ApiError> {
    let request = query.to_request(&state.config)?;
    let outcome = tokio::task::spawn_blocking(move || {
        let batch = ingest(&state, &query, &body)?;
        run_pipeline(&batch, &request, &state.config)
    })
    .await??;
    Ok(Json(outcome))
}

async fn compare_handler(
    State(state): State<SharedState>,
    Query(query): Query<ForecastQuery>,
    body: Bytes,
) -> std::result::Result<Json<Vec<ModelComparison>>, ApiError> {
    let request = query.to_request(&state.config)?;
    let kinds = query.model_kinds()?;
    let results = tokio::task::spawn_blocking(move || {
        let batch = ingest(&state, &query, &body)?;
        compare_models(&batch, &request, &kinds, &state.config)
    })
    .await??;
    Ok(Json(results))
}

async fn uploads_handler(State(state): State<SharedState>) -> Json<Vec<UploadEntry>> {
    let entries = match &state.uploads {
        Some(store) => store.lock().await.list().to_vec(),
        None => Vec::new(),
    };
    Json(entries)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Shutdown requested");
    }
}

/// Serve on `server.host:server.port` until Ctrl-C.
pub async fn run(state: SharedState) -> std::io::Result<()> {
    let addr = state.config.server.bind_address();
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> ForecastQuery {
        ForecastQuery {
            date_column: "date".into(),
            target_column: "sales".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_query_overrides_config() {
        let config = AppConfig::default();
        let q = ForecastQuery {
            regressors: Some("price, promo,,".into()),
            horizon_days: Some(7),
            weekly: Some(false),
            model: Some("holt-winters".into()),
            ..query()
        };
        let req = q.to_request(&config).unwrap();
        assert_eq!(req.regressors, vec!["price".to_string(), "promo".to_string()]);
        assert_eq!(req.settings.horizon_days, 7);
        assert!(!req.settings.seasonality.weekly);
        assert!(req.settings.seasonality.yearly);
        assert_eq!(req.settings.model, ModelKind::HoltWinters);
    }

    #[test]
    fn test_query_filter_is_typed() {
        let q = ForecastQuery {
            filter_column: Some("store".into()),
            filter_value: Some("7".into()),
            ..query()
        };
        let req = q.to_request(&AppConfig::default()).unwrap();
        assert_eq!(req.filter.unwrap().value, serde_json::json!(7));
    }

    #[test]
    fn test_query_half_filter_rejected() {
        let q = ForecastQuery {
            filter_column: Some("store".into()),
            ..query()
        };
        assert!(q.to_request(&AppConfig::default()).is_err());
    }

    #[test]
    fn test_model_kinds() {
        assert_eq!(query().model_kinds().unwrap(), ModelKind::ALL.to_vec());
        let q = ForecastQuery {
            models: Some("arima,additive".into()),
            ..query()
        };
        assert_eq!(
            q.model_kinds().unwrap(),
            vec![ModelKind::Arima, ModelKind::Additive]
        );
        let bad = ForecastQuery {
            models: Some("lstm".into()),
            ..query()
        };
        assert!(bad.model_kinds().is_err());
    }
}
