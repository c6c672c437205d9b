//! Data profiling for uploaded files.

use crate::data::schema::{ColumnType, SchemaDefinition};
use crate::data::source::DataBatch;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Summary of a loaded dataset, shown before a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataProfile {
    pub total_rows: usize,
    pub total_columns: usize,
    pub schema: SchemaDefinition,
    pub null_percentage: BTreeMap<String, f64>,
    pub duplicate_rows: usize,
    /// Candidate date columns, in column order.
    pub date_columns: Vec<String>,
    /// Candidate target and regressor columns, in column order.
    pub numeric_columns: Vec<String>,
    /// Distinct value counts for string columns, useful to pick a filter.
    pub distinct_values: BTreeMap<String, usize>,
}

impl DataProfile {
    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.schema.column(column).map(|c| c.dtype)
    }
}

/// Profile a batch.
pub fn profile_batch(batch: &DataBatch) -> DataProfile {
    let total_rows = batch.row_count();
    let schema = batch.schema();

    let mut null_percentage = BTreeMap::new();
    for (i, col) in batch.columns.iter().enumerate() {
        let nulls = batch
            .rows
            .iter()
            .filter(|row| row.get(i).is_none_or(|v| v.is_null()))
            .count();
        let pct = if total_rows > 0 {
            nulls as f64 / total_rows as f64 * 100.0
        } else {
            0.0
        };
        null_percentage.insert(col.clone(), pct);
    }

    let mut seen = HashSet::new();
    let mut duplicate_rows = 0;
    for row in &batch.rows {
        let key = serde_json::to_string(row).unwrap_or_default();
        if !seen.insert(key) {
            duplicate_rows += 1;
        }
    }

    let mut distinct_values = BTreeMap::new();
    for (i, col) in schema.columns.iter().enumerate() {
        if col.dtype != ColumnType::String {
            continue;
        }
        let distinct: HashSet<&str> = batch
            .rows
            .iter()
            .filter_map(|row| row.get(i).and_then(|v| v.as_str()))
            .collect();
        distinct_values.insert(col.name.clone(), distinct.len());
    }

    DataProfile {
        total_rows,
        total_columns: batch.column_count(),
        date_columns: schema.date_columns().into_iter().map(String::from).collect(),
        numeric_columns: schema
            .numeric_columns()
            .into_iter()
            .map(String::from)
            .collect(),
        schema,
        null_percentage,
        duplicate_rows,
        distinct_values,
    }
}
