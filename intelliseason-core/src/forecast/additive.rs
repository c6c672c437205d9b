//! Additive trend + seasonality model.
//!
//! `y(t) = g(t) + s(t) + Σ βᵢ·xᵢ(t) + ε` where `g` is a piecewise-linear trend
//! with hinge changepoints, `s` is a sum of Fourier series and `xᵢ` are
//! standardized external regressors. Coefficients come from one ridge
//! regression on an abs-max scaled target; the changepoint penalty plays the
//! role of the changepoint prior.

use crate::error::{PipelineError, Result};
use crate::forecast::frame::{FutureFrame, TimeSeriesFrame};
use crate::forecast::linalg::{dot, mean, ridge_least_squares, rms, std_dev, z_for_interval};
use crate::forecast::model::{
    FittedModel, ForecastPoint, ForecastSettings, Forecaster, ModelKind, SeasonalityFlags,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Penalty on intercept and slope, only to keep the system well posed.
const TREND_PENALTY: f64 = 1e-6;

/// Tuning knobs of the additive model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdditiveParams {
    pub n_changepoints: usize,
    /// Share of the history in which changepoints are placed.
    pub changepoint_range: f64,
    /// Larger values let the trend bend more.
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub regressor_prior_scale: f64,
    pub yearly_order: usize,
    pub weekly_order: usize,
}

impl Default for AdditiveParams {
    fn default() -> Self {
        Self {
            n_changepoints: 25,
            changepoint_range: 0.8,
            changepoint_prior_scale: 0.05,
            seasonality_prior_scale: 10.0,
            regressor_prior_scale: 10.0,
            yearly_order: 10,
            weekly_order: 3,
        }
    }
}

impl AdditiveParams {
    fn check(&self) -> Result<()> {
        if !(self.changepoint_range > 0.0 && self.changepoint_range <= 1.0) {
            return Err(PipelineError::invalid_parameter(
                "changepoint_range",
                "must lie in (0, 1]",
            ));
        }
        for (name, value) in [
            ("changepoint_prior_scale", self.changepoint_prior_scale),
            ("seasonality_prior_scale", self.seasonality_prior_scale),
            ("regressor_prior_scale", self.regressor_prior_scale),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(PipelineError::invalid_parameter(name, "must be positive"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Yearly,
    Weekly,
}

#[derive(Debug, Clone)]
struct SeasonBlock {
    component: Component,
    period: f64,
    order: usize,
    start: usize,
}

#[derive(Debug, Clone)]
struct RegressorScale {
    name: String,
    mean: f64,
    std: f64,
}

/// Column layout shared by fitting and prediction.
#[derive(Debug, Clone)]
struct Design {
    t0: NaiveDate,
    span_days: f64,
    changepoints: Vec<f64>,
    seasons: Vec<SeasonBlock>,
    regressors: Vec<RegressorScale>,
    reg_start: usize,
    width: usize,
}

impl Design {
    fn build(train: &TimeSeriesFrame, settings: &ForecastSettings) -> Result<Self> {
        let params = &settings.additive;
        let (Some(t0), Some(last)) = (train.first_date(), train.last_date()) else {
            return Err(PipelineError::empty_dataset("training"));
        };
        let span_days = ((last - t0).num_days() as f64).max(1.0);

        let mut t_sorted: Vec<f64> = train
            .ds
            .iter()
            .map(|d| (*d - t0).num_days() as f64 / span_days)
            .collect();
        t_sorted.sort_by(f64::total_cmp);
        let changepoints =
            place_changepoints(&t_sorted, params.n_changepoints, params.changepoint_range);

        let mut width = 2 + changepoints.len();
        let mut seasons = Vec::new();
        let flags = settings.seasonality;
        for (enabled, component, period, order) in [
            (flags.yearly, Component::Yearly, 365.25, params.yearly_order),
            (flags.weekly, Component::Weekly, 7.0, params.weekly_order),
        ] {
            if enabled && order > 0 {
                seasons.push(SeasonBlock {
                    component,
                    period,
                    order,
                    start: width,
                });
                width += 2 * order;
            }
        }
        if flags.daily {
            tracing::debug!("Daily seasonality is constant at date granularity; reporting zero");
        }

        let reg_start = width;
        let regressors: Vec<RegressorScale> = train
            .regressors
            .iter()
            .map(|r| {
                let std = std_dev(&r.values);
                RegressorScale {
                    name: r.name.clone(),
                    mean: mean(&r.values),
                    std: if std > 1e-12 { std } else { 1.0 },
                }
            })
            .collect();
        width += regressors.len();

        Ok(Self {
            t0,
            span_days,
            changepoints,
            seasons,
            regressors,
            reg_start,
            width,
        })
    }

    fn penalties(&self, params: &AdditiveParams) -> Vec<f64> {
        let mut penalty = vec![TREND_PENALTY; self.width];
        for p in penalty.iter_mut().skip(2).take(self.changepoints.len()) {
            *p = 1.0 / params.changepoint_prior_scale;
        }
        for block in &self.seasons {
            for p in &mut penalty[block.start..block.start + 2 * block.order] {
                *p = 1.0 / params.seasonality_prior_scale;
            }
        }
        for p in &mut penalty[self.reg_start..] {
            *p = 1.0 / params.regressor_prior_scale;
        }
        penalty
    }

    fn row(&self, date: NaiveDate, regressor_values: &[f64]) -> Vec<f64> {
        let days = (date - self.t0).num_days() as f64;
        let t = days / self.span_days;

        let mut row = Vec::with_capacity(self.width);
        row.push(1.0);
        row.push(t);
        row.extend(self.changepoints.iter().map(|cp| (t - cp).max(0.0)));
        for block in &self.seasons {
            for k in 1..=block.order {
                let angle = 2.0 * PI * k as f64 * days / block.period;
                row.push(angle.sin());
                row.push(angle.cos());
            }
        }
        for (scale, value) in self.regressors.iter().zip(regressor_values) {
            row.push((value - scale.mean) / scale.std);
        }
        row
    }
}

/// Changepoint locations (scaled time) evenly spaced over the first
/// `range` of the sorted history.
fn place_changepoints(t_sorted: &[f64], requested: usize, range: f64) -> Vec<f64> {
    let hist = (t_sorted.len() as f64 * range).floor() as usize;
    let count = requested.min(hist.saturating_sub(1));
    if count == 0 {
        return Vec::new();
    }
    let mut cps: Vec<f64> = (1..=count)
        .map(|k| {
            let idx = ((k * (hist - 1)) as f64 / count as f64).round() as usize;
            t_sorted[idx.min(t_sorted.len() - 1)]
        })
        .collect();
    cps.dedup();
    cps
}

/// Backend for [`ModelKind::Additive`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AdditiveForecaster;

impl Forecaster for AdditiveForecaster {
    fn kind(&self) -> ModelKind {
        ModelKind::Additive
    }

    fn fit(
        &self,
        train: &TimeSeriesFrame,
        settings: &ForecastSettings,
    ) -> Result<Box<dyn FittedModel>> {
        settings.additive.check()?;
        if train.len() < 2 {
            return Err(PipelineError::InsufficientData {
                required: 2,
                actual: train.len(),
            });
        }

        let design = Design::build(train, settings)?;
        let y_scale = train
            .y
            .iter()
            .fold(0.0f64, |acc, v| acc.max(v.abs()));
        let y_scale = if y_scale > 1e-12 { y_scale } else { 1.0 };

        let x: Vec<Vec<f64>> = (0..train.len())
            .map(|i| {
                let regs: Vec<f64> = train.regressors.iter().map(|r| r.values[i]).collect();
                design.row(train.ds[i], &regs)
            })
            .collect();
        let y: Vec<f64> = train.y.iter().map(|v| v / y_scale).collect();

        let beta = ridge_least_squares(&x, &y, &design.penalties(&settings.additive))?;
        let residuals: Vec<f64> = x
            .iter()
            .zip(&y)
            .map(|(row, target)| target - dot(row, &beta))
            .collect();
        let sigma = rms(&residuals) * y_scale;

        tracing::debug!(
            rows = train.len(),
            changepoints = design.changepoints.len(),
            features = design.width,
            sigma,
            "Fitted additive model"
        );
        Ok(Box::new(AdditiveModel {
            design,
            beta,
            y_scale,
            margin: z_for_interval(settings.interval_width) * sigma,
            seasonality: settings.seasonality,
        }))
    }
}

#[derive(Debug, Clone)]
struct AdditiveModel {
    design: Design,
    beta: Vec<f64>,
    y_scale: f64,
    margin: f64,
    seasonality: SeasonalityFlags,
}

impl AdditiveModel {
    fn block_sum(&self, row: &[f64], start: usize, len: usize) -> f64 {
        dot(&row[start..start + len], &self.beta[start..start + len]) * self.y_scale
    }
}

impl FittedModel for AdditiveModel {
    fn predict(&self, future: &FutureFrame) -> Result<Vec<ForecastPoint>> {
        let columns: Vec<&[f64]> = self
            .design
            .regressors
            .iter()
            .map(|r| future.regressor_values(&r.name))
            .collect::<Result<_>>()?;
        if let Some(short) = columns.iter().find(|c| c.len() != future.len()) {
            return Err(PipelineError::Numerical(format!(
                "regressor has {} values for {} dates",
                short.len(),
                future.len()
            )));
        }

        let trend_len = 2 + self.design.changepoints.len();
        let mut points = Vec::with_capacity(future.len());
        for (i, &date) in future.ds.iter().enumerate() {
            let regs: Vec<f64> = columns.iter().map(|c| c[i]).collect();
            let row = self.design.row(date, &regs);

            let trend = self.block_sum(&row, 0, trend_len);
            let mut yearly = self.seasonality.yearly.then_some(0.0);
            let mut weekly = self.seasonality.weekly.then_some(0.0);
            let mut seasonal = 0.0;
            for block in &self.design.seasons {
                let value = self.block_sum(&row, block.start, 2 * block.order);
                seasonal += value;
                match block.component {
                    Component::Yearly => yearly = Some(value),
                    Component::Weekly => weekly = Some(value),
                }
            }
            let extra = self.block_sum(&row, self.design.reg_start, self.design.regressors.len());

            let yhat = trend + seasonal + extra;
            points.push(ForecastPoint {
                date,
                yhat,
                yhat_lower: yhat - self.margin,
                yhat_upper: yhat + self.margin,
                trend,
                yearly,
                weekly,
                daily: self.seasonality.daily.then_some(0.0),
            });
        }
        Ok(points)
    }
}
