//! ARIMA(p, d, q) with Yule-Walker AR estimation.
//!
//! The series is differenced `d` times, AR coefficients are solved from the
//! sample autocorrelations by Levinson-Durbin, and MA coefficients are read
//! off the autocorrelation of the AR residuals. Predictions are integrated
//! back with the binomial expansion of `(1 - B)^d`, so every differencing
//! order uses the right history.

use crate::error::{PipelineError, Result};
use crate::forecast::frame::{FutureFrame, TimeSeriesFrame};
use crate::forecast::linalg::{mean, rms, z_for_interval};
use crate::forecast::model::{
    DateIndex, FittedModel, ForecastPoint, ForecastSettings, Forecaster, ModelKind, Step,
};
use serde::{Deserialize, Serialize};

const MAX_AR_ORDER: usize = 10;
const MAX_DIFF_ORDER: usize = 2;
const MAX_MA_ORDER: usize = 10;

/// Model orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArimaParams {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

impl Default for ArimaParams {
    fn default() -> Self {
        Self { p: 1, d: 1, q: 1 }
    }
}

impl ArimaParams {
    fn check(&self) -> Result<()> {
        if self.p > MAX_AR_ORDER {
            return Err(PipelineError::invalid_parameter(
                "p",
                format!("AR order must be <= {MAX_AR_ORDER}"),
            ));
        }
        if self.d > MAX_DIFF_ORDER {
            return Err(PipelineError::invalid_parameter(
                "d",
                format!("differencing order must be <= {MAX_DIFF_ORDER}"),
            ));
        }
        if self.q > MAX_MA_ORDER {
            return Err(PipelineError::invalid_parameter(
                "q",
                format!("MA order must be <= {MAX_MA_ORDER}"),
            ));
        }
        Ok(())
    }

    pub fn min_observations(&self) -> usize {
        self.p + self.d + self.q + 10
    }
}

pub fn difference(data: &[f64], order: usize) -> Vec<f64> {
    let mut result = data.to_vec();
    for _ in 0..order {
        result = result.windows(2).map(|w| w[1] - w[0]).collect();
    }
    result
}

/// Signed binomial weights `w_k` such that
/// `y_t = Δ^d y_t + Σ_{k=1..d} w_k · y_{t-k}`.
fn integration_weights(d: usize) -> Vec<f64> {
    let mut weights = Vec::with_capacity(d);
    let mut binom = 1.0;
    for k in 1..=d {
        binom = binom * (d - k + 1) as f64 / k as f64;
        let sign = if k % 2 == 1 { 1.0 } else { -1.0 };
        weights.push(sign * binom);
    }
    weights
}

fn autocovariance(centered: &[f64], max_lag: usize) -> Vec<f64> {
    let n = centered.len() as f64;
    (0..=max_lag)
        .map(|k| {
            centered
                .iter()
                .skip(k)
                .zip(centered)
                .map(|(a, b)| a * b)
                .sum::<f64>()
                / n
        })
        .collect()
}

/// Levinson-Durbin recursion on the autocovariances.
fn yule_walker(series: &[f64], p: usize) -> Vec<f64> {
    if p == 0 {
        return Vec::new();
    }
    let m = mean(series);
    let centered: Vec<f64> = series.iter().map(|v| v - m).collect();
    let r = autocovariance(&centered, p);

    let mut phi = vec![0.0; p];
    if r[0].abs() < 1e-10 {
        return phi;
    }
    let mut err = r[0];
    for k in 0..p {
        let acc: f64 = (0..k).map(|j| phi[j] * r[k - j]).sum();
        let reflection = (r[k + 1] - acc) / err;
        let prev = phi.clone();
        phi[k] = reflection;
        for j in 0..k {
            phi[j] = prev[j] - reflection * prev[k - 1 - j];
        }
        err *= 1.0 - reflection * reflection;
        if err.abs() < 1e-10 {
            break;
        }
    }
    phi
}

fn ma_from_residuals(residuals: &[f64], q: usize) -> Vec<f64> {
    if q == 0 || residuals.is_empty() {
        return vec![0.0; q];
    }
    let m = mean(residuals);
    let centered: Vec<f64> = residuals.iter().map(|v| v - m).collect();
    let acov = autocovariance(&centered, q);
    if acov[0].abs() < 1e-10 {
        return vec![0.0; q];
    }
    acov[1..]
        .iter()
        .map(|c| (c / acov[0]).clamp(-0.99, 0.99))
        .collect()
}

/// Backend for [`ModelKind::Arima`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ArimaForecaster;

impl Forecaster for ArimaForecaster {
    fn kind(&self) -> ModelKind {
        ModelKind::Arima
    }

    fn fit(
        &self,
        train: &TimeSeriesFrame,
        settings: &ForecastSettings,
    ) -> Result<Box<dyn FittedModel>> {
        let params = &settings.arima;
        params.check()?;
        if train.len() < params.min_observations() {
            return Err(PipelineError::InsufficientData {
                required: params.min_observations(),
                actual: train.len(),
            });
        }
        if train.y.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::degenerate("series contains non-finite values"));
        }
        if !train.regressors.is_empty() {
            tracing::warn!(
                regressors = ?train.regressor_names(),
                "ARIMA ignores external regressors"
            );
        }

        let (p, d, q) = (params.p, params.d, params.q);
        let w = difference(&train.y, d);
        let constant = mean(&w);
        let ar = yule_walker(&w, p);

        let mut ar_residuals = vec![0.0; w.len()];
        for t in p..w.len() {
            let ar_part: f64 = (0..p).map(|j| ar[j] * (w[t - j - 1] - constant)).sum();
            ar_residuals[t] = w[t] - (constant + ar_part);
        }
        let ma = ma_from_residuals(&ar_residuals, q);

        let model = ArimaModel {
            index: DateIndex::new(train)?,
            d,
            ar,
            ma,
            constant,
            weights: integration_weights(d),
            history: train.y.clone(),
            differenced: w,
            innovations: ar_residuals,
            fitted: Vec::new(),
            margin: 0.0,
        };
        let model = model.with_in_sample(z_for_interval(settings.interval_width));
        tracing::debug!(p, d, q, margin = model.margin, "Fitted ARIMA model");
        Ok(Box::new(model))
    }
}

#[derive(Debug)]
struct ArimaModel {
    index: DateIndex,
    d: usize,
    ar: Vec<f64>,
    ma: Vec<f64>,
    constant: f64,
    weights: Vec<f64>,
    history: Vec<f64>,
    differenced: Vec<f64>,
    innovations: Vec<f64>,
    fitted: Vec<f64>,
    margin: f64,
}

impl ArimaModel {
    /// One-step prediction of `w[t]` from `w[..t]` and `e[..t]`.
    fn predict_differenced(&self, w: &[f64], e: &[f64], t: usize) -> f64 {
        let ar: f64 = self
            .ar
            .iter()
            .enumerate()
            .filter(|(j, _)| t > *j)
            .map(|(j, phi)| phi * (w[t - j - 1] - self.constant))
            .sum();
        let ma: f64 = self
            .ma
            .iter()
            .enumerate()
            .filter(|(j, _)| t > *j)
            .map(|(j, theta)| theta * e[t - j - 1])
            .sum();
        self.constant + ar + ma
    }

    /// Add back the differenced-away history for position `t` of `y`.
    fn integrate(&self, w_hat: f64, y: &[f64], t: usize) -> f64 {
        w_hat
            + self
                .weights
                .iter()
                .enumerate()
                .map(|(k, wk)| wk * y[t - k - 1])
                .sum::<f64>()
    }

    fn with_in_sample(mut self, z: f64) -> Self {
        let warmup = self.d + self.ar.len();
        let mut fitted = Vec::with_capacity(self.history.len());
        let mut residuals = Vec::new();
        for t in 0..self.history.len() {
            if t < warmup {
                fitted.push(self.history[t]);
                continue;
            }
            let w_hat = self.predict_differenced(&self.differenced, &self.innovations, t - self.d);
            let y_hat = self.integrate(w_hat, &self.history, t);
            residuals.push(self.history[t] - y_hat);
            fitted.push(y_hat);
        }
        self.fitted = fitted;
        self.margin = z * rms(&residuals);
        self
    }

    /// Recursive forecasts for `steps` days past the end of the history.
    fn forecast_ahead(&self, steps: usize) -> Vec<f64> {
        let mut w = self.differenced.clone();
        let mut e = self.innovations.clone();
        let mut y = self.history.clone();
        for _ in 0..steps {
            let t = w.len();
            let w_hat = self.predict_differenced(&w, &e, t);
            w.push(w_hat);
            e.push(0.0);
            let y_hat = self.integrate(w_hat, &y, y.len());
            y.push(y_hat);
        }
        y.split_off(self.history.len())
    }
}

impl FittedModel for ArimaModel {
    fn predict(&self, future: &FutureFrame) -> Result<Vec<ForecastPoint>> {
        let steps = future
            .ds
            .iter()
            .map(|&date| self.index.locate(date))
            .collect::<Result<Vec<Step>>>()?;
        let horizon = steps
            .iter()
            .filter_map(|s| match s {
                Step::Ahead(h) => Some(*h),
                Step::InSample(_) => None,
            })
            .max()
            .unwrap_or(0);
        let ahead = self.forecast_ahead(horizon);

        Ok(future
            .ds
            .iter()
            .zip(steps)
            .map(|(&date, step)| match step {
                Step::InSample(i) => {
                    ForecastPoint::banded(date, self.fitted[i], self.margin, self.fitted[i])
                }
                Step::Ahead(h) => {
                    let value = ahead[h - 1];
                    ForecastPoint::banded(date, value, self.margin * (h as f64).sqrt(), value)
                }
            })
            .collect())
    }
}
