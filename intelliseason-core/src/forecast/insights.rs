//! Business-facing summaries of a forecast.

use crate::forecast::model::ForecastPoint;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Day-over-day changes above this quantile count as significant increases.
pub const INCREASE_QUANTILE: f64 = 0.95;
/// Day-over-day changes below this quantile count as significant decreases.
pub const DECREASE_QUANTILE: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyMean {
    /// Calendar month, 1 to 12, pooled across years.
    pub month: u32,
    pub mean_yhat: f64,
    pub points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub date: NaiveDate,
    pub yhat: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastInsights {
    pub monthly_means: Vec<MonthlyMean>,
    /// Month with the highest mean prediction. Ties go to the earlier month.
    pub peak_month: Option<u32>,
    pub trough_month: Option<u32>,
    pub significant_increases: Vec<Change>,
    pub significant_decreases: Vec<Change>,
}

/// Linear-interpolation quantile of unsorted values.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Monthly means and significant day-over-day moves of `yhat`, in the order
/// the points are given.
pub fn analyze(points: &[ForecastPoint]) -> ForecastInsights {
    let mut by_month: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for p in points {
        let entry = by_month.entry(p.date.month()).or_insert((0.0, 0));
        entry.0 += p.yhat;
        entry.1 += 1;
    }
    let monthly_means: Vec<MonthlyMean> = by_month
        .into_iter()
        .map(|(month, (sum, count))| MonthlyMean {
            month,
            mean_yhat: sum / count as f64,
            points: count,
        })
        .collect();

    let mut peak: Option<&MonthlyMean> = None;
    let mut trough: Option<&MonthlyMean> = None;
    for m in &monthly_means {
        if peak.is_none_or(|p| m.mean_yhat > p.mean_yhat) {
            peak = Some(m);
        }
        if trough.is_none_or(|t| m.mean_yhat < t.mean_yhat) {
            trough = Some(m);
        }
    }

    let changes: Vec<Change> = points
        .windows(2)
        .map(|w| Change {
            date: w[1].date,
            yhat: w[1].yhat,
            delta: w[1].yhat - w[0].yhat,
        })
        .collect();
    let deltas: Vec<f64> = changes.iter().map(|c| c.delta).collect();

    let (significant_increases, significant_decreases) =
        match (quantile(&deltas, INCREASE_QUANTILE), quantile(&deltas, DECREASE_QUANTILE)) {
            (Some(hi), Some(lo)) => (
                changes.iter().filter(|c| c.delta > hi).cloned().collect(),
                changes.iter().filter(|c| c.delta < lo).cloned().collect(),
            ),
            _ => (Vec::new(), Vec::new()),
        };

    ForecastInsights {
        peak_month: peak.map(|m| m.month),
        trough_month: trough.map(|m| m.month),
        monthly_means,
        significant_increases,
        significant_decreases,
    }
}
