//! Data ingestion, cleaning, profiling and upload storage.

pub mod cleaner;
pub mod profile;
pub mod schema;
pub mod source;
pub mod storage;

pub use cleaner::{DATE_COLUMN, DataCleaner, TARGET_COLUMN};
pub use profile::{DataProfile, profile_batch};
pub use schema::{ColumnType, SchemaDefinition};
pub use source::{
    CsvBytesSource, CsvSource, DataBatch, DataSource, DataSourceInfo, parse_cell, read_csv,
};
pub use storage::{UploadEntry, UploadStore};
