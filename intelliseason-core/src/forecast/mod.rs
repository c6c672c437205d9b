//! Forecasting: frame preparation, interchangeable backends and insights.

pub mod additive;
pub mod arima;
pub mod frame;
pub mod holt_winters;
pub mod insights;
pub mod linalg;
pub mod model;

pub use additive::{AdditiveForecaster, AdditiveParams};
pub use arima::{ArimaForecaster, ArimaParams};
pub use frame::{
    FutureFrame, FutureRegressorPolicy, Regressor, TimeSeriesFrame, make_future_frame, prepare,
    split,
};
pub use holt_winters::{HoltWintersForecaster, HoltWintersParams};
pub use insights::{ForecastInsights, analyze};
pub use model::{
    Backtest, FittedModel, ForecastPoint, ForecastResult, ForecastSettings, Forecaster, ModelKind,
    SeasonalityFlags, fit_and_backtest, fit_and_forecast,
};
