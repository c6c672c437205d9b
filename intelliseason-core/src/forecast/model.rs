//! Forecasting capability interface, settings and orchestration.

use crate::error::{PipelineError, Result};
use crate::forecast::additive::{AdditiveForecaster, AdditiveParams};
use crate::forecast::arima::{ArimaForecaster, ArimaParams};
use crate::forecast::frame::{FutureFrame, FutureRegressorPolicy, TimeSeriesFrame, make_future_frame};
use crate::forecast::holt_winters::{HoltWintersForecaster, HoltWintersParams};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Available forecasting backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Piecewise-linear trend with Fourier seasonality and regressors.
    #[default]
    Additive,
    HoltWinters,
    Arima,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Additive, ModelKind::HoltWinters, ModelKind::Arima];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Additive => "additive",
            Self::HoltWinters => "holt_winters",
            Self::Arima => "arima",
        }
    }

    pub fn forecaster(self) -> Box<dyn Forecaster> {
        match self {
            Self::Additive => Box::new(AdditiveForecaster),
            Self::HoltWinters => Box::new(HoltWintersForecaster),
            Self::Arima => Box::new(ArimaForecaster),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "additive" | "prophet" => Ok(Self::Additive),
            "holt_winters" | "holtwinters" | "exponential_smoothing" | "ets" => {
                Ok(Self::HoltWinters)
            }
            "arima" => Ok(Self::Arima),
            other => Err(PipelineError::invalid_parameter(
                "model",
                format!("unknown model '{other}'"),
            )),
        }
    }
}

/// Seasonality toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonalityFlags {
    pub yearly: bool,
    pub weekly: bool,
    pub daily: bool,
}

impl Default for SeasonalityFlags {
    fn default() -> Self {
        Self {
            yearly: true,
            weekly: true,
            daily: false,
        }
    }
}

/// Everything a backend needs besides the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    /// Days to forecast past the last training date.
    pub horizon_days: u32,
    /// Share of rows used for training; the rest is held out.
    pub train_fraction: f64,
    pub model: ModelKind,
    /// Width of the uncertainty band, in (0, 1).
    pub interval_width: f64,
    pub regressor_fill: FutureRegressorPolicy,
    pub seasonality: SeasonalityFlags,
    pub additive: AdditiveParams,
    pub holt_winters: HoltWintersParams,
    pub arima: ArimaParams,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            horizon_days: 30,
            train_fraction: 0.8,
            model: ModelKind::default(),
            interval_width: 0.8,
            regressor_fill: FutureRegressorPolicy::default(),
            seasonality: SeasonalityFlags::default(),
            additive: AdditiveParams::default(),
            holt_winters: HoltWintersParams::default(),
            arima: ArimaParams::default(),
        }
    }
}

impl ForecastSettings {
    pub fn check(&self) -> Result<()> {
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return Err(PipelineError::invalid_parameter(
                "interval_width",
                "must lie strictly between 0 and 1",
            ));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(PipelineError::invalid_parameter(
                "train_fraction",
                "must lie strictly between 0 and 1",
            ));
        }
        Ok(())
    }
}

/// One predicted date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
    pub trend: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yearly: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<f64>,
}

impl ForecastPoint {
    /// A point with a symmetric band and no seasonal breakdown.
    pub fn banded(date: NaiveDate, yhat: f64, margin: f64, trend: f64) -> Self {
        Self {
            date,
            yhat,
            yhat_lower: yhat - margin,
            yhat_upper: yhat + margin,
            trend,
            yearly: None,
            weekly: None,
            daily: None,
        }
    }
}

/// Predictions over the training dates followed by the horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResult {
    pub model: ModelKind,
    pub points: Vec<ForecastPoint>,
    pub history_len: usize,
    pub horizon_days: u32,
}

impl ForecastResult {
    /// Points past the training history.
    pub fn future_points(&self) -> &[ForecastPoint] {
        &self.points[self.history_len.min(self.points.len())..]
    }

    pub fn point_on(&self, date: NaiveDate) -> Option<&ForecastPoint> {
        self.points.iter().find(|p| p.date == date)
    }
}

/// A forecasting backend.
pub trait Forecaster: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Fit on a training frame.
    fn fit(&self, train: &TimeSeriesFrame, settings: &ForecastSettings)
    -> Result<Box<dyn FittedModel>>;
}

/// A fitted model able to predict arbitrary dates.
pub trait FittedModel: Send {
    /// One point per date of `future`, in order.
    fn predict(&self, future: &FutureFrame) -> Result<Vec<ForecastPoint>>;
}

/// Fit `forecaster` on `train` and predict the training dates plus
/// `settings.horizon_days` future days.
pub fn fit_and_forecast(
    train: &TimeSeriesFrame,
    full: &TimeSeriesFrame,
    settings: &ForecastSettings,
    forecaster: &dyn Forecaster,
) -> Result<ForecastResult> {
    let model = fit_checked(train, settings, forecaster)?;
    horizon_forecast(model.as_ref(), train, full, settings, forecaster.kind())
}

/// A horizon forecast together with predictions for every held-out date.
#[derive(Debug, Clone)]
pub struct Backtest {
    pub forecast: ForecastResult,
    /// One point per date of the test frame, in its order.
    pub holdout: Vec<ForecastPoint>,
}

/// Fit once, then predict both the horizon and the dates of `test`.
///
/// The held-out predictions use the test frame's own regressor values, so
/// validation covers the whole test partition whatever the horizon.
pub fn fit_and_backtest(
    train: &TimeSeriesFrame,
    full: &TimeSeriesFrame,
    test: &TimeSeriesFrame,
    settings: &ForecastSettings,
    forecaster: &dyn Forecaster,
) -> Result<Backtest> {
    let model = fit_checked(train, settings, forecaster)?;
    let forecast = horizon_forecast(model.as_ref(), train, full, settings, forecaster.kind())?;
    let holdout = predict_exact(model.as_ref(), &FutureFrame::from_frame(test), forecaster.kind())?;
    tracing::debug!(model = %forecaster.kind(), held_out = holdout.len(), "Predicted test dates");
    Ok(Backtest { forecast, holdout })
}

fn fit_checked(
    train: &TimeSeriesFrame,
    settings: &ForecastSettings,
    forecaster: &dyn Forecaster,
) -> Result<Box<dyn FittedModel>> {
    settings.check()?;
    if train.is_empty() {
        return Err(PipelineError::empty_dataset("training"));
    }
    forecaster.fit(train, settings)
}

fn predict_exact(
    model: &dyn FittedModel,
    future: &FutureFrame,
    kind: ModelKind,
) -> Result<Vec<ForecastPoint>> {
    let points = model.predict(future)?;
    if points.len() != future.len() {
        return Err(PipelineError::Numerical(format!(
            "{kind} returned {} points for {} dates",
            points.len(),
            future.len()
        )));
    }
    Ok(points)
}

fn horizon_forecast(
    model: &dyn FittedModel,
    train: &TimeSeriesFrame,
    full: &TimeSeriesFrame,
    settings: &ForecastSettings,
    kind: ModelKind,
) -> Result<ForecastResult> {
    let future = make_future_frame(train, full, settings.horizon_days, settings.regressor_fill)?;
    let points = predict_exact(model, &future, kind)?;

    tracing::debug!(
        model = %kind,
        history = future.history_len,
        horizon = settings.horizon_days,
        "Forecast complete"
    );
    Ok(ForecastResult {
        model: kind,
        points,
        history_len: future.history_len,
        horizon_days: settings.horizon_days,
    })
}

/// Where a requested date sits relative to a positional history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Position within the training series.
    InSample(usize),
    /// Days past the last training date.
    Ahead(usize),
}

/// Maps dates onto positions of a positional training series.
///
/// Dates past the training range are counted in steps of the median spacing
/// between training dates, so weekly or monthly series advance one position
/// per period.
#[derive(Debug, Clone)]
pub(crate) struct DateIndex {
    positions: HashMap<NaiveDate, usize>,
    last: NaiveDate,
    step_days: i64,
}

impl DateIndex {
    pub(crate) fn new(train: &TimeSeriesFrame) -> Result<Self> {
        let last = train
            .last_date()
            .ok_or_else(|| PipelineError::empty_dataset("training"))?;

        let mut gaps: Vec<i64> = train
            .ds
            .windows(2)
            .map(|w| (w[1] - w[0]).num_days())
            .filter(|&g| g > 0)
            .collect();
        gaps.sort_unstable();
        let step_days = gaps.get(gaps.len() / 2).copied().unwrap_or(1).max(1);
        if gaps.iter().any(|&g| g != step_days) {
            tracing::warn!(
                step_days,
                "Training dates are unevenly spaced; counting future dates in median steps"
            );
        }

        Ok(Self {
            positions: train.ds.iter().enumerate().map(|(i, d)| (*d, i)).collect(),
            last,
            step_days,
        })
    }

    pub(crate) fn locate(&self, date: NaiveDate) -> Result<Step> {
        if let Some(&i) = self.positions.get(&date) {
            return Ok(Step::InSample(i));
        }
        let ahead = (date - self.last).num_days();
        if ahead > 0 {
            let steps = (ahead + self.step_days / 2) / self.step_days;
            Ok(Step::Ahead(steps.max(1) as usize))
        } else {
            Err(PipelineError::degenerate(format!(
                "{date} lies inside the training range but has no observation"
            )))
        }
    }
}
