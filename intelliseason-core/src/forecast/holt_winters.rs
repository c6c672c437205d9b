//! Exponential smoothing backend built on `augurs`.
//!
//! The trend is an AutoETS model. When a weekly or yearly period fits the
//! data the series is first decomposed with MSTL and the seasonal part is
//! carried forward, which gives additive Holt-Winters behaviour; otherwise a
//! plain AutoETS fit (Holt's linear method and its relatives) is used.
//! Prediction bands are the models' own intervals at `interval_width`.

use crate::error::{PipelineError, Result};
use crate::forecast::frame::{FutureFrame, TimeSeriesFrame};
use crate::forecast::model::{
    DateIndex, FittedModel, ForecastPoint, ForecastSettings, Forecaster, ModelKind,
    SeasonalityFlags, Step,
};
use augurs::Forecast;
use augurs::ets::AutoETS;
use augurs::mstl::MSTLModel;
use augurs::prelude::*;
use serde::{Deserialize, Serialize};

/// Fewest training points AutoETS is asked to fit.
const MIN_OBSERVATIONS: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoltWintersParams {
    /// AutoETS specification of the trend model: error, trend and season
    /// letters, each `A`, `M`, `N` or `Z` (automatic). The season letter
    /// must be `N`; seasonality comes from the MSTL decomposition.
    pub spec: String,
}

impl Default for HoltWintersParams {
    fn default() -> Self {
        Self {
            spec: "ZZN".to_string(),
        }
    }
}

impl HoltWintersParams {
    fn trend_model(&self) -> Result<AutoETS> {
        if !self.spec.ends_with(['N', 'n']) {
            return Err(PipelineError::invalid_parameter(
                "holt_winters.spec",
                "the season letter must be N",
            ));
        }
        AutoETS::new(1, self.spec.as_str())
            .map_err(|e| PipelineError::invalid_parameter("holt_winters.spec", e.to_string()))
    }
}

/// Seasonal period for a series of `n` daily points.
pub fn choose_period(n: usize, flags: SeasonalityFlags) -> Option<usize> {
    if flags.weekly && n >= 14 {
        Some(7)
    } else if flags.yearly && n >= 730 {
        Some(365)
    } else {
        None
    }
}

fn model_error(stage: &str, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Numerical(format!("exponential smoothing {stage} failed: {err}"))
}

/// Object-safe view of a fitted `augurs` model.
trait SeriesModel: Send {
    fn in_sample(&self, level: f64) -> Result<Forecast>;
    fn ahead(&self, horizon: usize, level: f64) -> Result<Forecast>;
}

impl<P> SeriesModel for P
where
    P: Predict + Send,
    P::Error: std::fmt::Display,
{
    fn in_sample(&self, level: f64) -> Result<Forecast> {
        self.predict_in_sample(level)
            .map_err(|e| model_error("in-sample prediction", e))
    }

    fn ahead(&self, horizon: usize, level: f64) -> Result<Forecast> {
        self.predict(horizon, level)
            .map_err(|e| model_error("prediction", e))
    }
}

/// Point and band at position `i` of an `augurs` forecast.
fn banded_at(forecast: &Forecast, i: usize) -> Option<(f64, f64, f64)> {
    let point = *forecast.point.get(i)?;
    let (lower, upper) = match &forecast.intervals {
        Some(iv) => (*iv.lower.get(i)?, *iv.upper.get(i)?),
        None => (point, point),
    };
    Some((point, lower.min(point), upper.max(point)))
}

/// Backend for [`ModelKind::HoltWinters`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HoltWintersForecaster;

impl Forecaster for HoltWintersForecaster {
    fn kind(&self) -> ModelKind {
        ModelKind::HoltWinters
    }

    fn fit(
        &self,
        train: &TimeSeriesFrame,
        settings: &ForecastSettings,
    ) -> Result<Box<dyn FittedModel>> {
        let trend_model = settings.holt_winters.trend_model()?;
        if train.len() < MIN_OBSERVATIONS {
            return Err(PipelineError::InsufficientData {
                required: MIN_OBSERVATIONS,
                actual: train.len(),
            });
        }
        if !train.regressors.is_empty() {
            tracing::warn!(
                regressors = ?train.regressor_names(),
                "Holt-Winters ignores external regressors"
            );
        }

        let period = choose_period(train.len(), settings.seasonality);
        let fitted: Box<dyn SeriesModel> = match period {
            Some(m) => {
                let mstl = MSTLModel::new(vec![m], trend_model.into_trend_model());
                Box::new(mstl.fit(&train.y).map_err(|e| model_error("MSTL fit", e))?)
            }
            None => Box::new(trend_model.fit(&train.y).map_err(|e| model_error("ETS fit", e))?),
        };

        let level = settings.interval_width;
        let in_sample = fitted.in_sample(level)?;
        if in_sample.point.len() != train.len() {
            return Err(PipelineError::Numerical(format!(
                "exponential smoothing returned {} fitted values for {} observations",
                in_sample.point.len(),
                train.len()
            )));
        }
        tracing::debug!(?period, "Fitted exponential smoothing model");

        Ok(Box::new(HoltWintersModel {
            index: DateIndex::new(train)?,
            level,
            fitted,
            in_sample,
        }))
    }
}

struct HoltWintersModel {
    index: DateIndex,
    level: f64,
    fitted: Box<dyn SeriesModel>,
    in_sample: Forecast,
}

impl FittedModel for HoltWintersModel {
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
        let ahead = if horizon > 0 {
            Some(self.fitted.ahead(horizon, self.level)?)
        } else {
            None
        };

        future
            .ds
            .iter()
            .zip(steps)
            .map(|(&date, step)| {
                let banded = match (step, &ahead) {
                    (Step::InSample(i), _) => banded_at(&self.in_sample, i),
                    (Step::Ahead(h), Some(forecast)) => banded_at(forecast, h - 1),
                    (Step::Ahead(_), None) => None,
                };
                let (yhat, lower, upper) = banded.ok_or_else(|| {
                    PipelineError::Numerical(format!("no exponential smoothing value for {date}"))
                })?;
                Ok(ForecastPoint {
                    yhat_lower: lower,
                    yhat_upper: upper,
                    ..ForecastPoint::banded(date, yhat, 0.0, yhat)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::frame::{FutureRegressorPolicy, make_future_frame};
    use chrono::{Days, NaiveDate};

    fn daily_frame(n: usize, f: impl Fn(usize) -> f64) -> TimeSeriesFrame {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        TimeSeriesFrame {
            ds: (0..n)
                .map(|i| start.checked_add_days(Days::new(i as u64)).unwrap())
                .collect(),
            y: (0..n).map(f).collect(),
            regressors: Vec::new(),
        }
    }

    fn forecast_with(
        frame: &TimeSeriesFrame,
        horizon: u32,
        seasonality: SeasonalityFlags,
    ) -> Vec<ForecastPoint> {
        let settings = ForecastSettings {
            horizon_days: horizon,
            seasonality,
            ..Default::default()
        };
        let model = HoltWintersForecaster.fit(frame, &settings).unwrap();
        let future =
            make_future_frame(frame, frame, horizon, FutureRegressorPolicy::default()).unwrap();
        model.predict(&future).unwrap()
    }

    fn no_seasonality() -> SeasonalityFlags {
        SeasonalityFlags {
            yearly: false,
            weekly: false,
            daily: false,
        }
    }

    #[test]
    fn test_choose_period() {
        let flags = SeasonalityFlags::default();
        assert_eq!(choose_period(14, flags), Some(7));
        assert_eq!(choose_period(13, flags), None);
        let yearly_only = SeasonalityFlags {
            yearly: true,
            weekly: false,
            daily: false,
        };
        assert_eq!(choose_period(730, yearly_only), Some(365));
        assert_eq!(choose_period(729, yearly_only), None);
    }

    #[test]
    fn test_trend_forecast_follows_line() {
        let line = |i: usize| 20.0 + 2.0 * i as f64;
        let frame = daily_frame(40, |i| line(i) + 0.5 * (i as f64 * 1.7).sin());
        let points = forecast_with(&frame, 5, no_seasonality());
        assert_eq!(points.len(), 45);
        for (i, p) in points.iter().enumerate().skip(40) {
            let expected = line(i);
            assert!(
                (p.yhat - expected).abs() < 0.1 * expected,
                "{i}: {} vs {expected}",
                p.yhat
            );
        }
    }

    #[test]
    fn test_weekly_shape_carried_forward() {
        let pattern = [3.0, 1.0, 0.0, 0.0, 1.0, 12.0, 16.0];
        let frame = daily_frame(56, |i| 40.0 + pattern[i % 7] + 0.2 * (i as f64 * 0.9).sin());
        let points = forecast_with(&frame, 14, SeasonalityFlags::default());
        assert_eq!(points.len(), 70);
        for week in [56usize, 63] {
            let peak = points[week + 6].yhat;
            let trough = points[week + 2].yhat;
            assert!(peak > trough + 5.0, "week {week}: {peak} vs {trough}");
        }
    }

    #[test]
    fn test_bands_contain_point_and_widen() {
        let frame = daily_frame(45, |i| (i as f64 * 1.3).sin() * 5.0 + i as f64);
        let points = forecast_with(&frame, 6, no_seasonality());
        for p in &points {
            assert!(p.yhat_lower <= p.yhat && p.yhat <= p.yhat_upper);
        }
        let width = |p: &ForecastPoint| p.yhat_upper - p.yhat_lower;
        assert!(width(&points[50]) >= width(&points[45]));
        assert!(width(&points[45]) > 0.0);
    }

    #[test]
    fn test_invalid_spec() {
        let frame = daily_frame(20, |i| i as f64);
        for spec in ["QQN", "AAA"] {
            let settings = ForecastSettings {
                holt_winters: HoltWintersParams {
                    spec: spec.to_string(),
                },
                ..Default::default()
            };
            let err = HoltWintersForecaster.fit(&frame, &settings).err().unwrap();
            assert!(matches!(err, PipelineError::InvalidParameter { .. }), "{spec}");
        }
    }

    #[test]
    fn test_too_few_points() {
        let frame = daily_frame(5, |i| i as f64);
        let err = HoltWintersForecaster
            .fit(&frame, &ForecastSettings::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            PipelineError::InsufficientData { required: 7, actual: 5 }
        ));
    }

    #[test]
    fn test_missing_history_date_is_degenerate() {
        let mut frame = daily_frame(12, |i| 5.0 + i as f64 + (i as f64).sin());
        let gap = frame.ds.remove(4);
        frame.y.remove(4);
        let model = HoltWintersForecaster
            .fit(&frame, &ForecastSettings::default())
            .unwrap();
        let future = FutureFrame {
            ds: vec![gap],
            regressors: Vec::new(),
            history_len: 0,
        };
        assert!(matches!(
            model.predict(&future),
            Err(PipelineError::DegenerateInput(_))
        ));
    }
}
