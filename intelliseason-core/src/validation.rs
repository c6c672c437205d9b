//! Held-out validation of a forecast.

use crate::error::{PipelineError, Result};
use crate::forecast::frame::TimeSeriesFrame;
use crate::forecast::model::ForecastPoint;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What to do with test rows whose actual value is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroActualPolicy {
    /// Leave them out of the percentage metrics and count them.
    #[default]
    Exclude,
    /// Fail the validation.
    Reject,
}

impl std::str::FromStr for ZeroActualPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exclude" => Ok(Self::Exclude),
            "reject" => Ok(Self::Reject),
            other => Err(PipelineError::invalid_parameter(
                "zero_actuals",
                format!("unknown policy '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub zero_actuals: ZeroActualPolicy,
}

/// Error metrics over the test rows that have a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Smallest absolute percentage error.
    pub min_pct_error: f64,
    /// Largest absolute percentage error.
    pub max_pct_error: f64,
    /// Mean absolute percentage error.
    pub mape: f64,
    pub mae: f64,
    pub rmse: f64,
    pub dates: Vec<NaiveDate>,
    pub actuals: Vec<f64>,
    pub predictions: Vec<f64>,
    /// Test rows with a prediction on the same date.
    pub matched: usize,
    /// Test rows without a prediction.
    pub unmatched: usize,
    /// Matched rows left out of the percentage metrics because the actual
    /// is zero.
    pub excluded_zero: usize,
}

/// Compare `forecast` with the held-out `test` frame, aligned by date.
pub fn validate(
    forecast: &[ForecastPoint],
    test: &TimeSeriesFrame,
    policy: ZeroActualPolicy,
) -> Result<ValidationReport> {
    let predicted: HashMap<NaiveDate, f64> = forecast.iter().map(|p| (p.date, p.yhat)).collect();

    let mut dates = Vec::new();
    let mut actuals = Vec::new();
    let mut predictions = Vec::new();
    let mut unmatched = 0usize;
    for (date, &actual) in test.ds.iter().zip(&test.y) {
        match predicted.get(date) {
            Some(&yhat) => {
                dates.push(*date);
                actuals.push(actual);
                predictions.push(yhat);
            }
            None => unmatched += 1,
        }
    }
    if dates.is_empty() {
        return Err(PipelineError::degenerate(
            "no forecast date overlaps the test partition",
        ));
    }

    let mut pct_errors = Vec::with_capacity(dates.len());
    let mut excluded_zero = 0usize;
    for (i, (&actual, &yhat)) in actuals.iter().zip(&predictions).enumerate() {
        if actual == 0.0 {
            match policy {
                ZeroActualPolicy::Reject => {
                    return Err(PipelineError::degenerate(format!(
                        "actual value is zero on {}",
                        dates[i]
                    )));
                }
                ZeroActualPolicy::Exclude => {
                    excluded_zero += 1;
                    continue;
                }
            }
        }
        pct_errors.push((actual - yhat).abs() / actual.abs() * 100.0);
    }
    if excluded_zero > 0 {
        tracing::warn!(excluded_zero, "Excluded zero actuals from percentage errors");
    }
    if pct_errors.is_empty() {
        return Err(PipelineError::degenerate(
            "every matched actual is zero; percentage errors are undefined",
        ));
    }

    let abs_errors: Vec<f64> = actuals
        .iter()
        .zip(&predictions)
        .map(|(a, p)| (a - p).abs())
        .collect();
    let n = abs_errors.len() as f64;

    Ok(ValidationReport {
        min_pct_error: pct_errors.iter().copied().fold(f64::INFINITY, f64::min),
        max_pct_error: pct_errors.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mape: pct_errors.iter().sum::<f64>() / pct_errors.len() as f64,
        mae: abs_errors.iter().sum::<f64>() / n,
        rmse: (abs_errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt(),
        matched: dates.len(),
        dates,
        actuals,
        predictions,
        unmatched,
        excluded_zero,
    })
}
