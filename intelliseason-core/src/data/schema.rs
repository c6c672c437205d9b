//! Schema definition and type inference for datasets.

use crate::data::cleaner::{DEFAULT_DATE_FORMATS, parse_date_text};
use serde::{Deserialize, Serialize};

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Date,
    String,
    Null,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::String => "string",
            Self::Null => "null",
        };
        f.write_str(name)
    }
}

/// Schema definition for a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub columns: Vec<ColumnSchema>,
}

impl SchemaDefinition {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns whose every non-null value parses as a calendar date.
    pub fn date_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.dtype == ColumnType::Date)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Columns that can be summed or used as regressors.
    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.dtype.is_numeric())
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Schema for a single column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: ColumnType,
    pub nullable: bool,
}

/// Infer column type from its values.
///
/// Any string makes the column a string column, unless every non-null value
/// is a string that parses as a date. Integers mixed with floats give a float
/// column.
pub fn infer_column_type(values: &[serde_json::Value]) -> ColumnType {
    let non_null: Vec<_> = values.iter().filter(|v| !v.is_null()).collect();
    if non_null.is_empty() {
        return ColumnType::Null;
    }

    let mut has_int = false;
    let mut has_float = false;
    let mut has_bool = false;
    let mut has_string = false;

    for v in &non_null {
        match v {
            serde_json::Value::Number(n) => {
                if n.is_f64() {
                    has_float = true;
                } else {
                    has_int = true;
                }
            }
            serde_json::Value::Bool(_) => has_bool = true,
            _ => has_string = true,
        }
    }

    if has_string {
        let all_dates = non_null.iter().all(|v| {
            v.as_str()
                .is_some_and(|s| parse_date_text(s, DEFAULT_DATE_FORMATS).is_some())
        });
        return if all_dates && !has_int && !has_float && !has_bool {
            ColumnType::Date
        } else {
            ColumnType::String
        };
    }
    if has_bool && (has_int || has_float) {
        return ColumnType::String;
    }
    if has_float {
        return ColumnType::Float;
    }
    if has_int {
        return ColumnType::Integer;
    }
    ColumnType::Boolean
}

/// Infer schema from column names and rows.
pub fn infer_schema(columns: &[String], rows: &[Vec<serde_json::Value>]) -> SchemaDefinition {
    let mut schema_columns = Vec::with_capacity(columns.len());

    for (i, col_name) in columns.iter().enumerate() {
        let values: Vec<serde_json::Value> =
            rows.iter().filter_map(|row| row.get(i).cloned()).collect();

        let dtype = infer_column_type(&values);
        let nullable = values.iter().any(|v| v.is_null());

        schema_columns.push(ColumnSchema {
            name: col_name.clone(),
            dtype,
            nullable,
        });
    }

    SchemaDefinition {
        columns: schema_columns,
    }
}
