//! Date normalization, equality filtering and per-date aggregation.

use crate::data::source::DataBatch;
use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;

/// Internal name of the target column after aggregation.
pub const TARGET_COLUMN: &str = "y";

/// Internal name of the date column once prepared for forecasting.
pub const DATE_COLUMN: &str = "ds";

/// Canonical output format for cleaned dates.
pub const OUTPUT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Formats tried in order when parsing a date cell. RFC 3339 is always tried
/// last.
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%Y%m%d",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse a date, discarding any time of day.
pub fn parse_date_text<S: AsRef<str>>(text: &str, formats: &[S]) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    for fmt in formats {
        let fmt = fmt.as_ref();
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return Some(date);
        }
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.date());
        }
    }
    chrono::DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Parse a cell as a date. Integer cells go through their decimal text.
pub fn parse_date_value<S: AsRef<str>>(value: &Value, formats: &[S]) -> Option<NaiveDate> {
    match value {
        Value::String(s) => parse_date_text(s, formats),
        Value::Number(n) if n.is_i64() || n.is_u64() => parse_date_text(&n.to_string(), formats),
        _ => None,
    }
}

fn numeric_cell(value: &Value, column: &str, row: usize) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        other => Err(PipelineError::NonNumericColumn {
            column: column.to_string(),
            row,
            value: display_value(other),
        }),
    }
}

pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Stateless cleaning operations over a [`DataBatch`].
#[derive(Debug, Clone)]
pub struct DataCleaner {
    formats: Vec<String>,
}

impl Default for DataCleaner {
    fn default() -> Self {
        Self {
            formats: DEFAULT_DATE_FORMATS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DataCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom list of date formats. An empty list keeps the defaults.
    pub fn with_formats(formats: Vec<String>) -> Self {
        if formats.is_empty() {
            Self::default()
        } else {
            Self { formats }
        }
    }

    pub fn formats(&self) -> &[String] {
        &self.formats
    }

    pub fn parse_date(&self, value: &Value) -> Option<NaiveDate> {
        parse_date_value(value, &self.formats)
    }

    /// Parse a date that may already be in the canonical output format.
    /// The canonical form wins so cleaned rows never parse differently.
    fn parse_normalized(&self, value: &Value) -> Option<NaiveDate> {
        let canonical = match value {
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), OUTPUT_DATE_FORMAT).ok(),
            _ => None,
        };
        canonical.or_else(|| self.parse_date(value))
    }

    /// Normalize `date_column` to `YYYY-MM-DD`, dropping rows whose date does
    /// not parse.
    pub fn clean(&self, batch: &DataBatch, date_column: &str) -> Result<DataBatch> {
        let idx = batch.column_index(date_column)?;
        let mut rows = Vec::with_capacity(batch.row_count());

        for row in &batch.rows {
            let Some(date) = row.get(idx).and_then(|v| self.parse_date(v)) else {
                continue;
            };
            let mut row = row.clone();
            row[idx] = Value::String(date.format(OUTPUT_DATE_FORMAT).to_string());
            rows.push(row);
        }

        let dropped = batch.row_count() - rows.len();
        tracing::debug!(
            column = date_column,
            kept = rows.len(),
            dropped,
            "Cleaned date column"
        );
        Ok(DataBatch::new(batch.columns.clone(), rows))
    }

    /// Keep rows whose `column` equals `value` exactly.
    pub fn filter(&self, batch: &DataBatch, column: &str, value: &Value) -> Result<DataBatch> {
        let idx = batch.column_index(column)?;
        let rows: Vec<_> = batch
            .rows
            .iter()
            .filter(|row| row.get(idx).unwrap_or(&Value::Null) == value)
            .cloned()
            .collect();

        tracing::debug!(column, kept = rows.len(), "Filtered rows");
        Ok(DataBatch::new(batch.columns.clone(), rows))
    }

    /// Sum `target_column` and `extra_columns` per date. The target is renamed
    /// to `y` and rows come out sorted by date.
    pub fn aggregate(
        &self,
        batch: &DataBatch,
        date_column: &str,
        target_column: &str,
        extra_columns: &[String],
    ) -> Result<DataBatch> {
        for extra in extra_columns {
            if extra == date_column || extra == target_column {
                return Err(PipelineError::invalid_parameter(
                    "extra_columns",
                    format!("'{extra}' is already the date or target column"),
                ));
            }
        }

        let date_idx = batch.column_index(date_column)?;
        let mut summed: Vec<(&str, usize)> =
            vec![(target_column, batch.column_index(target_column)?)];
        for extra in extra_columns {
            summed.push((extra.as_str(), batch.column_index(extra)?));
        }

        let mut groups: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
        for (row_no, row) in batch.rows.iter().enumerate() {
            let cell = row.get(date_idx).unwrap_or(&Value::Null);
            let date = self.parse_normalized(cell).ok_or_else(|| PipelineError::InvalidDate {
                column: date_column.to_string(),
                row: row_no,
                value: display_value(cell),
            })?;

            let sums = groups.entry(date).or_insert_with(|| vec![0.0; summed.len()]);
            for (slot, (name, col)) in summed.iter().enumerate() {
                let value = row.get(*col).unwrap_or(&Value::Null);
                if let Some(v) = numeric_cell(value, name, row_no)? {
                    sums[slot] += v;
                }
            }
        }

        let mut columns = Vec::with_capacity(summed.len() + 1);
        columns.push(date_column.to_string());
        columns.push(TARGET_COLUMN.to_string());
        columns.extend(extra_columns.iter().cloned());

        let rows: Vec<Vec<Value>> = groups
            .into_iter()
            .map(|(date, sums)| {
                let mut row = Vec::with_capacity(sums.len() + 1);
                row.push(Value::String(date.format(OUTPUT_DATE_FORMAT).to_string()));
                row.extend(sums.into_iter().map(|s| serde_json::json!(s)));
                row
            })
            .collect();

        tracing::debug!(
            input_rows = batch.row_count(),
            dates = rows.len(),
            "Aggregated by date"
        );
        Ok(DataBatch::new(columns, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn batch(columns: &[&str], rows: Vec<Vec<Value>>) -> DataBatch {
        DataBatch::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    #[test]
    fn test_parse_date_text_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        for text in [
            "2023-01-02",
            "2023/01/02",
            "01/02/2023",
            "02.01.2023",
            "20230102",
            "02 Jan 2023",
            "Jan 02, 2023",
            "January 02, 2023",
            "2023-01-02 13:45:00",
            "2023-01-02T13:45:00",
            "2023-01-02T13:45:00+02:00",
        ] {
            assert_eq!(
                parse_date_text(text, DEFAULT_DATE_FORMATS),
                Some(expected),
                "{text}"
            );
        }
        assert_eq!(parse_date_text("bad-date", DEFAULT_DATE_FORMATS), None);
        assert_eq!(parse_date_text("2023-02-30", DEFAULT_DATE_FORMATS), None);
    }

    #[test]
    fn test_parse_date_value_integer() {
        let date = parse_date_value(&json!(20230101), DEFAULT_DATE_FORMATS);
        assert_eq!(date, NaiveDate::from_ymd_opt(2023, 1, 1));
        assert_eq!(parse_date_value(&json!(1.5), DEFAULT_DATE_FORMATS), None);
    }

    #[test]
    fn test_clean_drops_bad_dates() {
        let cleaner = DataCleaner::new();
        let input = batch(
            &["date", "sales"],
            vec![
                vec![json!("bad-date"), json!(1)],
                vec![json!("2023-02-01"), json!(2)],
            ],
        );
        let out = cleaner.clean(&input, "date").unwrap();
        assert_eq!(out.rows, vec![vec![json!("2023-02-01"), json!(2)]]);
    }

    #[test]
    fn test_clean_normalizes_format() {
        let cleaner = DataCleaner::new();
        let input = batch(
            &["date"],
            vec![
                vec![json!("02/15/2023")],
                vec![Value::Null],
                vec![json!("2023-03-01T08:00:00Z")],
            ],
        );
        let out = cleaner.clean(&input, "date").unwrap();
        assert_eq!(
            out.rows,
            vec![vec![json!("2023-02-15")], vec![json!("2023-03-01")]]
        );
    }

    #[test]
    fn test_clean_missing_column() {
        let cleaner = DataCleaner::new();
        let input = batch(&["date"], vec![]);
        let err = cleaner.clean(&input, "day").unwrap_err();
        assert!(matches!(err, PipelineError::ColumnNotFound { .. }));
    }

    #[test]
    fn test_clean_custom_formats() {
        let cleaner = DataCleaner::with_formats(vec!["%d|%m|%Y".to_string()]);
        let input = batch(&["d"], vec![vec![json!("05|06|2023")], vec![json!("2023-06-05")]]);
        let out = cleaner.clean(&input, "d").unwrap();
        assert_eq!(out.rows, vec![vec![json!("2023-06-05")]]);
    }

    #[test]
    fn test_aggregate_after_clean_with_custom_formats() {
        // A day-first format would misread the cleaned text if it were tried first.
        let cleaner = DataCleaner::with_formats(vec!["%Y-%d-%m".to_string()]);
        let input = batch(
            &["d", "sales"],
            vec![
                vec![json!("2023-05-06"), json!(2)],
                vec![json!("2023-05-06"), json!(3)],
                vec![json!("2023-06-06"), json!(1)],
            ],
        );
        let cleaned = cleaner.clean(&input, "d").unwrap();
        assert_eq!(cleaned.rows[0][0], json!("2023-06-05"));

        let out = cleaner.aggregate(&cleaned, "d", "sales", &[]).unwrap();
        assert_eq!(
            out.rows,
            vec![
                vec![json!("2023-06-05"), json!(5.0)],
                vec![json!("2023-06-06"), json!(1.0)],
            ]
        );
    }

    #[test]
    fn test_filter_exact_match() {
        let cleaner = DataCleaner::new();
        let input = batch(
            &["region", "sales"],
            vec![
                vec![json!("north"), json!(1)],
                vec![json!("south"), json!(2)],
                vec![json!("north"), json!(3)],
            ],
        );
        let out = cleaner.filter(&input, "region", &json!("north")).unwrap();
        assert_eq!(out.row_count(), 2);

        let none = cleaner.filter(&input, "region", &json!("east")).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_filter_no_type_coercion() {
        let cleaner = DataCleaner::new();
        let input = batch(&["store"], vec![vec![json!(1)], vec![json!("1")]]);
        let out = cleaner.filter(&input, "store", &json!(1)).unwrap();
        assert_eq!(out.rows, vec![vec![json!(1)]]);
    }

    #[test]
    fn test_filter_missing_column() {
        let cleaner = DataCleaner::new();
        let input = batch(&["a"], vec![]);
        assert!(cleaner.filter(&input, "b", &json!(1)).is_err());
    }

    #[test]
    fn test_aggregate_sums_per_date() {
        let cleaner = DataCleaner::new();
        let input = batch(
            &["date", "sales"],
            vec![
                vec![json!("2023-01-01"), json!(5)],
                vec![json!("2023-01-01"), json!(3)],
                vec![json!("2023-01-02"), json!(2)],
            ],
        );
        let out = cleaner.aggregate(&input, "date", "sales", &[]).unwrap();
        assert_eq!(out.columns, vec!["date", "y"]);
        assert_eq!(
            out.rows,
            vec![
                vec![json!("2023-01-01"), json!(8.0)],
                vec![json!("2023-01-02"), json!(2.0)],
            ]
        );
    }

    #[test]
    fn test_aggregate_sorts_and_sums_extras() {
        let cleaner = DataCleaner::new();
        let input = batch(
            &["date", "sales", "promo", "region"],
            vec![
                vec![json!("2023-01-03"), json!(1), json!(1), json!("n")],
                vec![json!("2023-01-01"), json!(2), Value::Null, json!("s")],
                vec![json!("2023-01-01"), Value::Null, json!(4), json!("n")],
            ],
        );
        let out = cleaner
            .aggregate(&input, "date", "sales", &["promo".to_string()])
            .unwrap();
        assert_eq!(out.columns, vec!["date", "y", "promo"]);
        assert_eq!(
            out.rows,
            vec![
                vec![json!("2023-01-01"), json!(2.0), json!(4.0)],
                vec![json!("2023-01-03"), json!(1.0), json!(1.0)],
            ]
        );
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let cleaner = DataCleaner::new();
        let input = batch(
            &["date", "sales"],
            vec![
                vec![json!("2023-01-02"), json!(1)],
                vec![json!("2023-01-01"), json!(2)],
                vec![json!("2023-01-01"), json!(2)],
            ],
        );
        let once = cleaner.aggregate(&input, "date", "sales", &[]).unwrap();
        let twice = cleaner.aggregate(&once, "date", "y", &[]).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_aggregate_non_numeric_target() {
        let cleaner = DataCleaner::new();
        let input = batch(
            &["date", "sales"],
            vec![
                vec![json!("2023-01-01"), json!(1)],
                vec![json!("2023-01-02"), json!("lots")],
            ],
        );
        let err = cleaner.aggregate(&input, "date", "sales", &[]).unwrap_err();
        match err {
            PipelineError::NonNumericColumn { column, row, value } => {
                assert_eq!(column, "sales");
                assert_eq!(row, 1);
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_aggregate_invalid_date() {
        let cleaner = DataCleaner::new();
        let input = batch(&["date", "sales"], vec![vec![json!("soon"), json!(1)]]);
        let err = cleaner.aggregate(&input, "date", "sales", &[]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDate { row: 0, .. }));
    }

    #[test]
    fn test_aggregate_rejects_target_as_extra() {
        let cleaner = DataCleaner::new();
        let input = batch(&["date", "sales"], vec![]);
        let err = cleaner
            .aggregate(&input, "date", "sales", &["sales".to_string()])
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParameter { .. }));
    }
}
