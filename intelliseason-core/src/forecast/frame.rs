//! Typed time-series frames: projection, chronological split and future
//! frame construction.

use crate::data::cleaner::{OUTPUT_DATE_FORMAT, display_value, parse_date_value};
use crate::data::source::DataBatch;
use crate::error::{PipelineError, Result};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An exogenous predictor aligned with a frame's dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regressor {
    pub name: String,
    pub values: Vec<f64>,
}

/// Dates, target values and regressors, column-aligned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesFrame {
    pub ds: Vec<NaiveDate>,
    pub y: Vec<f64>,
    pub regressors: Vec<Regressor>,
}

impl TimeSeriesFrame {
    pub fn len(&self) -> usize {
        self.ds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ds.is_empty()
    }

    pub fn regressor(&self, name: &str) -> Option<&Regressor> {
        self.regressors.iter().find(|r| r.name == name)
    }

    pub fn regressor_names(&self) -> Vec<&str> {
        self.regressors.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.ds.iter().min().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.ds.iter().max().copied()
    }

    /// Whether every date is exactly one day after the previous one.
    pub fn is_daily(&self) -> bool {
        self.ds
            .windows(2)
            .all(|w| (w[1] - w[0]).num_days() == 1)
    }

    /// Rows at `indices`, in that order.
    fn select(&self, indices: &[usize]) -> TimeSeriesFrame {
        TimeSeriesFrame {
            ds: indices.iter().map(|&i| self.ds[i]).collect(),
            y: indices.iter().map(|&i| self.y[i]).collect(),
            regressors: self
                .regressors
                .iter()
                .map(|r| Regressor {
                    name: r.name.clone(),
                    values: indices.iter().map(|&i| r.values[i]).collect(),
                })
                .collect(),
        }
    }
}

/// Dates to predict, with the regressor values the model will see.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FutureFrame {
    pub ds: Vec<NaiveDate>,
    pub regressors: Vec<Regressor>,
    /// Number of leading dates that belong to the training history.
    pub history_len: usize,
}

impl FutureFrame {
    /// Predict exactly the dates of an observed frame, with its regressors.
    pub fn from_frame(frame: &TimeSeriesFrame) -> Self {
        Self {
            ds: frame.ds.clone(),
            regressors: frame.regressors.clone(),
            history_len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.ds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ds.is_empty()
    }

    /// Values of a named regressor, or `ColumnNotFound`.
    pub fn regressor_values(&self, name: &str) -> Result<&[f64]> {
        self.regressors
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.values.as_slice())
            .ok_or_else(|| PipelineError::column_not_found(name))
    }
}

/// How future regressor values are filled for dates without observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FutureRegressorPolicy {
    /// Carry the most recent observed value forward.
    #[default]
    LastObserved,
    /// Use the mean of the observed values.
    Mean,
    /// Use the sum of all observed values. Kept for parity with older
    /// dashboards; it is rarely a sensible future value.
    HistoricalSum,
}

impl std::str::FromStr for FutureRegressorPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "last_observed" | "last" | "ffill" => Ok(Self::LastObserved),
            "mean" => Ok(Self::Mean),
            "historical_sum" | "sum" => Ok(Self::HistoricalSum),
            other => Err(PipelineError::invalid_parameter(
                "regressor_fill",
                format!("unknown policy '{other}'"),
            )),
        }
    }
}

impl FutureRegressorPolicy {
    fn fill_value(self, dates: &[NaiveDate], values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Self::LastObserved => dates
                .iter()
                .zip(values)
                .max_by_key(|(d, _)| **d)
                .map(|(_, v)| *v)
                .unwrap_or(0.0),
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::HistoricalSum => values.iter().sum(),
        }
    }
}

fn cell_f64(value: &Value, column: &str, row: usize) -> Result<f64> {
    value.as_f64().ok_or_else(|| PipelineError::NonNumericColumn {
        column: column.to_string(),
        row,
        value: display_value(value),
    })
}

/// Project a batch onto `ds`, `y` and the named regressors. Rows with a null
/// target are dropped. Dates must already be in the canonical `YYYY-MM-DD`
/// form produced by cleaning and aggregation.
pub fn prepare(
    batch: &DataBatch,
    date_column: &str,
    target_column: &str,
    regressors: &[String],
) -> Result<TimeSeriesFrame> {
    let date_idx = batch.column_index(date_column)?;
    let target_idx = batch.column_index(target_column)?;
    let reg_idx = regressors
        .iter()
        .map(|name| batch.column_index(name))
        .collect::<Result<Vec<_>>>()?;

    let mut frame = TimeSeriesFrame {
        regressors: regressors
            .iter()
            .map(|name| Regressor {
                name: name.clone(),
                values: Vec::with_capacity(batch.row_count()),
            })
            .collect(),
        ..Default::default()
    };

    let mut dropped = 0usize;
    for row_no in 0..batch.row_count() {
        let target = batch.cell(row_no, target_idx);
        if target.is_null() {
            dropped += 1;
            continue;
        }
        let y = cell_f64(target, target_column, row_no)?;

        let date_cell = batch.cell(row_no, date_idx);
        let date = parse_date_value(date_cell, &[OUTPUT_DATE_FORMAT]).ok_or_else(|| {
            PipelineError::InvalidDate {
                column: date_column.to_string(),
                row: row_no,
                value: display_value(date_cell),
            }
        })?;

        for (slot, &col) in reg_idx.iter().enumerate() {
            let v = cell_f64(batch.cell(row_no, col), &regressors[slot], row_no)?;
            frame.regressors[slot].values.push(v);
        }
        frame.ds.push(date);
        frame.y.push(y);
    }

    if dropped > 0 {
        tracing::debug!(dropped, column = target_column, "Dropped rows with null target");
    }
    Ok(frame)
}

/// Sort by date (stable) and cut at `floor(len * train_fraction)`.
pub fn split(
    frame: &TimeSeriesFrame,
    train_fraction: f64,
) -> Result<(TimeSeriesFrame, TimeSeriesFrame)> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(PipelineError::invalid_parameter(
            "train_fraction",
            format!("must lie strictly between 0 and 1, got {train_fraction}"),
        ));
    }

    let mut order: Vec<usize> = (0..frame.len()).collect();
    order.sort_by_key(|&i| frame.ds[i]);

    let cut = (frame.len() as f64 * train_fraction).floor() as usize;
    if cut == 0 {
        return Err(PipelineError::empty_dataset("train split"));
    }
    if cut >= frame.len() {
        return Err(PipelineError::empty_dataset("test split"));
    }

    let train = frame.select(&order[..cut]);
    let test = frame.select(&order[cut..]);
    tracing::debug!(train = train.len(), test = test.len(), "Split frame");
    Ok((train, test))
}

/// Training dates followed by `horizon_days` consecutive days.
///
/// Regressor values for dates present in `full` come from it; the remaining
/// future dates are filled according to `policy` over `full`'s observations.
pub fn make_future_frame(
    train: &TimeSeriesFrame,
    full: &TimeSeriesFrame,
    horizon_days: u32,
    policy: FutureRegressorPolicy,
) -> Result<FutureFrame> {
    let last = train
        .last_date()
        .ok_or_else(|| PipelineError::empty_dataset("training"))?;

    let mut ds = train.ds.clone();
    for h in 1..=u64::from(horizon_days) {
        let date = last.checked_add_days(Days::new(h)).ok_or_else(|| {
            PipelineError::invalid_parameter("horizon_days", "date range overflows the calendar")
        })?;
        ds.push(date);
    }

    let mut regressors = Vec::with_capacity(train.regressors.len());
    for reg in &train.regressors {
        let (obs_dates, obs_values) = match full.regressor(&reg.name) {
            Some(r) => (full.ds.as_slice(), r.values.as_slice()),
            None => (train.ds.as_slice(), reg.values.as_slice()),
        };
        let known: HashMap<NaiveDate, f64> = obs_dates
            .iter()
            .copied()
            .zip(obs_values.iter().copied())
            .collect();
        let fill = policy.fill_value(obs_dates, obs_values);

        let mut values = reg.values.clone();
        let mut filled = 0usize;
        for date in &ds[train.len()..] {
            values.push(match known.get(date) {
                Some(v) => *v,
                None => {
                    filled += 1;
                    fill
                }
            });
        }
        if filled > 0 {
            tracing::debug!(regressor = %reg.name, filled, ?policy, "Filled future regressor values");
        }
        regressors.push(Regressor {
            name: reg.name.clone(),
            values,
        });
    }

    Ok(FutureFrame {
        ds,
        regressors,
        history_len: train.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn frame(dates: &[&str], y: &[f64]) -> TimeSeriesFrame {
        TimeSeriesFrame {
            ds: dates.iter().map(|s| d(s)).collect(),
            y: y.to_vec(),
            regressors: Vec::new(),
        }
    }

    #[test]
    fn test_prepare_projects_and_drops_null_target() {
        let batch = DataBatch::new(
            vec!["date".into(), "y".into(), "promo".into(), "region".into()],
            vec![
                vec![json!("2023-01-01"), json!(1.0), json!(0.0), json!("n")],
                vec![json!("2023-01-02"), serde_json::Value::Null, json!(1.0), json!("n")],
                vec![json!("2023-01-03"), json!(3.0), json!(1.0), json!("s")],
            ],
        );
        let frame = prepare(&batch, "date", "y", &["promo".to_string()]).unwrap();
        assert_eq!(frame.ds, vec![d("2023-01-01"), d("2023-01-03")]);
        assert_eq!(frame.y, vec![1.0, 3.0]);
        assert_eq!(frame.regressors[0].values, vec![0.0, 1.0]);
    }

    #[test]
    fn test_prepare_rejects_null_regressor() {
        let batch = DataBatch::new(
            vec!["date".into(), "y".into(), "promo".into()],
            vec![vec![json!("2023-01-01"), json!(1.0), serde_json::Value::Null]],
        );
        let err = prepare(&batch, "date", "y", &["promo".to_string()]).unwrap_err();
        assert!(matches!(err, PipelineError::NonNumericColumn { column, .. } if column == "promo"));
    }

    #[test]
    fn test_prepare_requires_canonical_dates() {
        let batch = DataBatch::new(
            vec!["date".into(), "y".into()],
            vec![
                vec![json!("2023-01-01"), json!(1.0)],
                vec![json!("01/02/2023"), json!(2.0)],
            ],
        );
        let err = prepare(&batch, "date", "y", &[]).unwrap_err();
        match err {
            PipelineError::InvalidDate { row, value, .. } => {
                assert_eq!(row, 1);
                assert_eq!(value, "01/02/2023");
            }
            other => panic!("expected InvalidDate, got {other:?}"),
        }
    }

    #[test]
    fn test_prepare_missing_regressor_column() {
        let batch = DataBatch::new(vec!["date".into(), "y".into()], vec![]);
        let err = prepare(&batch, "date", "y", &["price".to_string()]).unwrap_err();
        assert!(matches!(err, PipelineError::ColumnNotFound { .. }));
    }

    #[test]
    fn test_split_sorts_and_cuts() {
        let input = frame(
            &["2023-01-05", "2023-01-01", "2023-01-03", "2023-01-02", "2023-01-04"],
            &[5.0, 1.0, 3.0, 2.0, 4.0],
        );
        let (train, test) = split(&input, 0.8).unwrap();
        assert_eq!(train.y, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(test.y, vec![5.0]);
        assert!(train.last_date() <= test.first_date());
    }

    #[test]
    fn test_split_guards() {
        let input = frame(&["2023-01-01", "2023-01-02"], &[1.0, 2.0]);
        assert!(matches!(
            split(&input, 1.0),
            Err(PipelineError::InvalidParameter { .. })
        ));
        assert!(matches!(
            split(&input, 0.0),
            Err(PipelineError::InvalidParameter { .. })
        ));
        assert!(matches!(
            split(&input, 0.3),
            Err(PipelineError::EmptyDataset { .. })
        ));
        assert!(matches!(
            split(&frame(&["2023-01-01"], &[1.0]), 0.8),
            Err(PipelineError::EmptyDataset { .. })
        ));
    }

    #[test]
    fn test_future_frame_horizon_zero() {
        let train = frame(&["2023-01-01", "2023-01-02"], &[1.0, 2.0]);
        let future = make_future_frame(&train, &train, 0, FutureRegressorPolicy::default()).unwrap();
        assert_eq!(future.ds, train.ds);
        assert_eq!(future.history_len, 2);
    }

    #[test]
    fn test_future_frame_fills_regressors() {
        let mut full = frame(
            &["2023-01-01", "2023-01-02", "2023-01-03"],
            &[1.0, 2.0, 3.0],
        );
        full.regressors.push(Regressor {
            name: "promo".into(),
            values: vec![1.0, 2.0, 6.0],
        });
        let (train, _) = split(&full, 0.67).unwrap();
        assert_eq!(train.len(), 2);

        let future = make_future_frame(&train, &full, 3, FutureRegressorPolicy::LastObserved).unwrap();
        assert_eq!(
            future.ds,
            vec![
                d("2023-01-01"),
                d("2023-01-02"),
                d("2023-01-03"),
                d("2023-01-04"),
                d("2023-01-05"),
            ]
        );
        assert_eq!(
            future.regressor_values("promo").unwrap(),
            &[1.0, 2.0, 6.0, 6.0, 6.0]
        );

        let mean = make_future_frame(&train, &full, 2, FutureRegressorPolicy::Mean).unwrap();
        assert_eq!(mean.regressor_values("promo").unwrap(), &[1.0, 2.0, 6.0, 3.0]);

        let sum = make_future_frame(&train, &full, 2, FutureRegressorPolicy::HistoricalSum).unwrap();
        assert_eq!(sum.regressor_values("promo").unwrap(), &[1.0, 2.0, 6.0, 9.0]);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "historical-sum".parse::<FutureRegressorPolicy>().unwrap(),
            FutureRegressorPolicy::HistoricalSum
        );
        assert!("median".parse::<FutureRegressorPolicy>().is_err());
    }
}
