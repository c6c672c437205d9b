//! # IntelliSeason Core
//!
//! CSV time-series pipeline: load a table, clean and aggregate it by date,
//! fit a forecasting backend (additive trend + seasonality, Holt-Winters or
//! ARIMA), validate against a held-out partition and summarize the forecast.

pub mod config;
pub mod data;
pub mod error;
pub mod forecast;
pub mod gateway;
pub mod pipeline;
pub mod validation;

// Re-export commonly used types at the crate root.
pub use config::{AppConfig, load_config};
pub use data::{DataBatch, DataCleaner, DataSource};
pub use error::{PipelineError, Result};
pub use forecast::{
    ForecastPoint, ForecastResult, ForecastSettings, Forecaster, ModelKind, TimeSeriesFrame,
    fit_and_backtest, fit_and_forecast,
};
pub use pipeline::{
    ModelComparison, PipelineOutcome, PipelineRequest, RowFilter, RunContext, compare_models,
    run_pipeline,
};
pub use validation::{ValidationReport, ZeroActualPolicy, validate};
