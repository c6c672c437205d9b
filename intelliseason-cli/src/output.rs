//! Rendering of run results as text tables, CSV or JSON.

use intelliseason_core::data::{DataProfile, UploadEntry};
use intelliseason_core::{ForecastPoint, ModelComparison, PipelineOutcome};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Table,
    Csv,
    Json,
}

/// Left-aligned first column, right-aligned numbers.
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let render = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(i, (cell, &w))| {
                if i == 0 {
                    format!("{cell:<w$}")
                } else {
                    format!("{cell:>w$}")
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
    };

    let mut out = render(headers.to_vec());
    out.push('\n');
    out.push_str(&widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  "));
    out.push('\n');
    for row in rows {
        out.push_str(&render(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }
    out
}

fn csv_text(headers: &[&str], rows: &[Vec<String>]) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }
    let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!("CSV write failed: {e}"))?;
    Ok(String::from_utf8(bytes)?)
}

fn num(v: f64) -> String {
    format!("{v:.2}")
}

fn opt_num(v: Option<f64>) -> String {
    v.map(num).unwrap_or_default()
}

const FORECAST_HEADERS: [&str; 8] = [
    "date",
    "yhat",
    "yhat_lower",
    "yhat_upper",
    "trend",
    "yearly",
    "weekly",
    "daily",
];

fn forecast_rows(points: &[ForecastPoint]) -> Vec<Vec<String>> {
    points
        .iter()
        .map(|p| {
            vec![
                p.date.to_string(),
                num(p.yhat),
                num(p.yhat_lower),
                num(p.yhat_upper),
                num(p.trend),
                opt_num(p.yearly),
                opt_num(p.weekly),
                opt_num(p.daily),
            ]
        })
        .collect()
}

fn month_name(month: u32) -> &'static str {
    const NAMES: [&str; 12] = [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ];
    month
        .checked_sub(1)
        .and_then(|i| NAMES.get(i as usize))
        .copied()
        .unwrap_or("?")
}

pub fn render_outcome(outcome: &PipelineOutcome, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(outcome)?),
        OutputFormat::Csv => csv_text(&FORECAST_HEADERS, &forecast_rows(&outcome.forecast.points)),
        OutputFormat::Table => {
            let c = &outcome.counts;
            let mut out = format!(
                "Run {} ({}, {} ms)\n",
                outcome.context.run_id, outcome.forecast.model, outcome.elapsed_ms
            );
            out.push_str(&format!(
                "Rows: loaded {}, cleaned {}, aggregated {}, train {}, test {}",
                c.loaded, c.cleaned, c.aggregated, c.train, c.test
            ));
            if let Some(filtered) = c.filtered {
                out.push_str(&format!(", filtered {filtered}"));
            }
            out.push_str("\n\n");

            let v = &outcome.validation;
            out.push_str(&format!(
                "Validation over {} dates: MAPE {:.2}%, min {:.2}%, max {:.2}%, MAE {:.2}, RMSE {:.2}\n",
                v.matched, v.mape, v.min_pct_error, v.max_pct_error, v.mae, v.rmse
            ));
            if v.excluded_zero > 0 {
                out.push_str(&format!(
                    "  {} zero actuals excluded from percentage errors\n",
                    v.excluded_zero
                ));
            }

            let insights = &outcome.insights;
            if let (Some(peak), Some(trough)) = (insights.peak_month, insights.trough_month) {
                out.push_str(&format!(
                    "Peak month: {}. Lowest month: {}.\n",
                    month_name(peak),
                    month_name(trough)
                ));
            }
            out.push_str(&format!(
                "Significant increases: {}, decreases: {}\n\n",
                insights.significant_increases.len(),
                insights.significant_decreases.len()
            ));

            let future = outcome.forecast.future_points();
            let shown = if future.is_empty() {
                &outcome.forecast.points[..]
            } else {
                future
            };
            out.push_str(&table(&FORECAST_HEADERS, &forecast_rows(shown)));
            Ok(out)
        }
    }
}

pub fn render_comparison(results: &[ModelComparison], format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(results)?);
    }
    let headers = ["model", "mape", "min_pct", "max_pct", "mae", "rmse", "ms", "error"];
    let rows: Vec<Vec<String>> = results
        .iter()
        .map(|r| {
            let v = r.validation.as_ref();
            vec![
                r.model.to_string(),
                opt_num(v.map(|v| v.mape)),
                opt_num(v.map(|v| v.min_pct_error)),
                opt_num(v.map(|v| v.max_pct_error)),
                opt_num(v.map(|v| v.mae)),
                opt_num(v.map(|v| v.rmse)),
                r.elapsed_ms.to_string(),
                r.error.as_ref().map(|e| e.message.clone()).unwrap_or_default(),
            ]
        })
        .collect();
    match format {
        OutputFormat::Csv => csv_text(&headers, &rows),
        _ => Ok(table(&headers, &rows)),
    }
}

pub fn render_profile(profile: &DataProfile, format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(profile)?);
    }
    let headers = ["column", "type", "null_pct", "distinct"];
    let rows: Vec<Vec<String>> = profile
        .schema
        .columns
        .iter()
        .map(|c| {
            vec![
                c.name.clone(),
                c.dtype.to_string(),
                opt_num(profile.null_percentage.get(&c.name).copied()),
                profile
                    .distinct_values
                    .get(&c.name)
                    .map(|n| n.to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect();
    match format {
        OutputFormat::Csv => csv_text(&headers, &rows),
        _ => {
            let mut out = format!(
                "{} rows, {} columns, {} duplicate rows\n",
                profile.total_rows, profile.total_columns, profile.duplicate_rows
            );
            out.push_str(&format!("Date columns: {}\n", profile.date_columns.join(", ")));
            out.push_str(&format!("Numeric columns: {}\n\n", profile.numeric_columns.join(", ")));
            out.push_str(&table(&headers, &rows));
            Ok(out)
        }
    }
}

pub fn render_history(entries: &[UploadEntry], format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(entries)?);
    }
    let headers = ["id", "file", "rows", "bytes", "uploaded", "hash"];
    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            vec![
                e.id.to_string(),
                e.file_name.clone(),
                e.row_count.to_string(),
                e.size_bytes.to_string(),
                e.created_at.format("%Y-%m-%d %H:%M").to_string(),
                e.hash.chars().take(12).collect(),
            ]
        })
        .collect();
    match format {
        OutputFormat::Csv => csv_text(&headers, &rows),
        _ if rows.is_empty() => Ok("No uploads stored yet.\n".to_string()),
        _ => Ok(table(&headers, &rows)),
    }
}

/// Print to stdout, or write to `path` when given.
pub fn emit(content: &str, path: Option<&Path>) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, content)?;
            tracing::info!(path = %path.display(), "Wrote output");
        }
        None => print!("{content}"),
    }
    Ok(())
}
