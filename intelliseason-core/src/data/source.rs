//! Data source abstraction for loading tabular time-series data.

use crate::data::schema::{ColumnType, SchemaDefinition, infer_column_type, infer_schema};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;

fn default_delimiter() -> char {
    ','
}

/// A batch of data rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl DataBatch {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of `column`, or `ColumnNotFound`.
    pub fn column_index(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| PipelineError::column_not_found(column))
    }

    /// Cell at `(row, column)`, `Null` when the row is short.
    pub fn cell(&self, row: usize, column: usize) -> &serde_json::Value {
        static NULL: serde_json::Value = serde_json::Value::Null;
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&NULL)
    }

    /// Distinct values of a column in first-seen order.
    pub fn unique_values(&self, column: &str) -> Result<Vec<serde_json::Value>> {
        let idx = self.column_index(column)?;
        let mut seen = Vec::new();
        for row in &self.rows {
            let value = row.get(idx).cloned().unwrap_or(serde_json::Value::Null);
            if !seen.contains(&value) {
                seen.push(value);
            }
        }
        Ok(seen)
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> DataBatch {
        DataBatch {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    pub fn schema(&self) -> SchemaDefinition {
        infer_schema(&self.columns, &self.rows)
    }
}

/// Information about a data source for run reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceInfo {
    pub source_type: String,
    pub location: String,
    pub accessed_at: chrono::DateTime<chrono::Utc>,
    pub row_count: Option<usize>,
}

/// Trait for loading data from a source.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Load data from this source, optionally limiting the number of rows.
    async fn load(&self, limit: Option<usize>) -> Result<DataBatch>;

    /// Return metadata about this source.
    fn source_info(&self) -> DataSourceInfo;

    /// Infer the schema from a sample of the source.
    fn schema(&self) -> Result<SchemaDefinition>;
}

/// Number of rows sampled by `DataSource::schema`.
const SCHEMA_SAMPLE_ROWS: usize = 100;

/// Turn raw CSV text into a typed cell: empty is null, then integer, finite
/// float, boolean, and finally string.
pub fn parse_cell(text: &str) -> serde_json::Value {
    let s = text.trim();
    if s.is_empty() {
        return serde_json::Value::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return serde_json::Value::Number(i.into());
    }
    if let Ok(f) = s.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return serde_json::Value::Number(n);
        }
    }
    if s.eq_ignore_ascii_case("true") {
        return serde_json::Value::Bool(true);
    }
    if s.eq_ignore_ascii_case("false") {
        return serde_json::Value::Bool(false);
    }
    serde_json::Value::String(s.to_string())
}

fn delimiter_byte(delimiter: char) -> Result<u8> {
    if delimiter.is_ascii() {
        Ok(delimiter as u8)
    } else {
        Err(PipelineError::invalid_parameter(
            "delimiter",
            format!("'{delimiter}' is not an ASCII character"),
        ))
    }
}

/// Read a CSV stream into a batch with homogeneous per-column types.
pub fn read_csv<R: Read>(reader: R, delimiter: char, limit: Option<usize>) -> Result<DataBatch> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter_byte(delimiter)?)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_matches('"').to_string())
        .collect();
    if columns.is_empty() || columns.iter().all(|c| c.is_empty()) {
        return Err(PipelineError::dataset("Empty CSV file"));
    }

    let mut raw: Vec<Vec<String>> = Vec::new();
    for record in rdr.records() {
        if limit.is_some_and(|max| raw.len() >= max) {
            break;
        }
        let record = record?;
        raw.push(record.iter().map(str::to_string).collect());
    }

    Ok(homogenize(columns, raw))
}

/// Type every cell, then make each column agree on one type.
fn homogenize(columns: Vec<String>, raw: Vec<Vec<String>>) -> DataBatch {
    let mut rows: Vec<Vec<serde_json::Value>> = raw
        .iter()
        .map(|r| r.iter().map(|s| parse_cell(s)).collect())
        .collect();

    for col in 0..columns.len() {
        let values: Vec<serde_json::Value> =
            rows.iter().filter_map(|r| r.get(col).cloned()).collect();
        match infer_column_type(&values) {
            ColumnType::String | ColumnType::Date => {
                for (row, text) in rows.iter_mut().zip(&raw) {
                    if let Some(cell) = row.get_mut(col) {
                        if !cell.is_null() {
                            *cell = serde_json::Value::String(text[col].trim().to_string());
                        }
                    }
                }
            }
            ColumnType::Float => {
                for row in &mut rows {
                    if let Some(cell) = row.get_mut(col) {
                        if let Some(f) = cell.as_i64().map(|i| i as f64) {
                            *cell = serde_json::json!(f);
                        }
                    }
                }
            }
            ColumnType::Integer | ColumnType::Boolean | ColumnType::Null => {}
        }
    }

    DataBatch { columns, rows }
}

// ---------------------------------------------------------------------------
// CsvSource
// ---------------------------------------------------------------------------

/// CSV file data source.
pub struct CsvSource {
    pub path: PathBuf,
    pub delimiter: char,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: default_delimiter(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }
}

#[async_trait]
impl DataSource for CsvSource {
    async fn load(&self, limit: Option<usize>) -> Result<DataBatch> {
        let content = tokio::fs::read(&self.path).await?;
        let batch = read_csv(content.as_slice(), self.delimiter, limit)?;
        tracing::debug!(
            path = %self.path.display(),
            rows = batch.row_count(),
            columns = batch.column_count(),
            "Loaded CSV"
        );
        Ok(batch)
    }

    fn source_info(&self) -> DataSourceInfo {
        DataSourceInfo {
            source_type: "csv".to_string(),
            location: self.path.display().to_string(),
            accessed_at: chrono::Utc::now(),
            row_count: None,
        }
    }

    fn schema(&self) -> Result<SchemaDefinition> {
        let file = std::fs::File::open(&self.path)
            .map_err(|e| PipelineError::dataset(format!("Failed to read CSV for schema: {e}")))?;
        let sample = read_csv(file, self.delimiter, Some(SCHEMA_SAMPLE_ROWS))?;
        Ok(sample.schema())
    }
}

// ---------------------------------------------------------------------------
// CsvBytesSource
// ---------------------------------------------------------------------------

/// CSV content received in memory, e.g. an HTTP upload.
pub struct CsvBytesSource {
    pub name: String,
    pub bytes: Vec<u8>,
    pub delimiter: char,
}

impl CsvBytesSource {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            delimiter: default_delimiter(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Synchronous load for callers already on a blocking thread.
    pub fn load_blocking(&self, limit: Option<usize>) -> Result<DataBatch> {
        read_csv(self.bytes.as_slice(), self.delimiter, limit)
    }
}

#[async_trait]
impl DataSource for CsvBytesSource {
    async fn load(&self, limit: Option<usize>) -> Result<DataBatch> {
        self.load_blocking(limit)
    }

    fn source_info(&self) -> DataSourceInfo {
        DataSourceInfo {
            source_type: "upload".to_string(),
            location: self.name.clone(),
            accessed_at: chrono::Utc::now(),
            row_count: None,
        }
    }

    fn schema(&self) -> Result<SchemaDefinition> {
        let sample = self.load_blocking(Some(SCHEMA_SAMPLE_ROWS))?;
        Ok(sample.schema())
    }
}
