//! Dataset registry
//!
//! Process-wide mapping from dataset identifiers to tables in one shared
//! in-memory DuckDB database.
//!
//! - Registration is serialised by a single writer lock. The drop and the
//!   re-create of a table run in one engine transaction, so a concurrent
//!   query sees either the previous table or the new one, never a gap.
//! - Queries run on cloned connections to the same database and do not
//!   wait on the writer lock beyond the clone itself.
//! - Re-registering an identifier replaces the previous table (last write
//!   wins, no merge, no versioning).
//! - Identifiers are matched case-insensitively, like engine table names:
//!   `Sales` replaces `sales`, and either spelling finds the dataset.
//!
//! Column types in the recorded schema come from the DataFrame dtypes:
//!
//! | dtype            | rendered  |
//! |------------------|-----------|
//! | String           | TEXT      |
//! | Int64            | INTEGER   |
//! | Float64          | FLOAT     |
//! | Boolean          | BOOLEAN   |
//! | Datetime         | DATETIME  |
//! | anything else    | TEXT      |

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use duckdb::Connection;
use polars::prelude::{DataFrame, DataType, ParquetWriter};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::info;

use crate::execute::fetch_rows;
use crate::introspect::render_schema;
use crate::source::{quote_ident, quote_literal, validate_identifier};
use crate::{QueryBotError, Result, DEFAULT_SAMPLE_ROWS};

/// A registered table
#[derive(Debug, Clone, Serialize)]
pub struct Dataset {
    /// Table identifier inside the engine
    pub name: String,
    /// `CREATE TABLE` style schema description
    pub schema: String,
    /// Column names with their rendered types, in table order
    pub columns: Vec<(String, String)>,
    /// First rows of the table
    pub sample: Vec<Vec<JsonValue>>,
}

/// Map a DataFrame dtype to the type shown in schema descriptions
pub fn sql_type_for(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::String => "TEXT",
        DataType::Int64 => "INTEGER",
        DataType::Float64 => "FLOAT",
        DataType::Boolean => "BOOLEAN",
        DataType::Datetime(_, _) => "DATETIME",
        _ => "TEXT",
    }
}

/// Registry of datasets backed by a shared DuckDB database
pub struct DatasetRegistry {
    /// Connection used for every mutation. Locking it is the single writer discipline.
    writer: Mutex<Connection>,
    /// Keyed by [`registry_key`]
    datasets: RwLock<BTreeMap<String, Dataset>>,
    sample_rows: usize,
}

/// Map key for an identifier; the engine resolves table names case-insensitively
fn registry_key(identifier: &str) -> String {
    identifier.to_ascii_lowercase()
}

impl DatasetRegistry {
    /// Create a registry over a fresh in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| QueryBotError::InternalError(format!("Failed to open DuckDB: {}", e)))?;
        Ok(Self {
            writer: Mutex::new(conn),
            datasets: RwLock::new(BTreeMap::new()),
            sample_rows: DEFAULT_SAMPLE_ROWS,
        })
    }

    /// Change how many sample rows are kept per dataset
    pub fn with_sample_rows(mut self, sample_rows: usize) -> Self {
        self.sample_rows = sample_rows;
        self
    }

    /// Open a connection for reading. Registered tables are visible on it.
    pub fn reader(&self) -> Result<Connection> {
        let writer = self.writer.lock().map_err(|e| {
            QueryBotError::InternalError(format!(
                "Database connection unavailable (mutex poisoned): {}",
                e
            ))
        })?;
        writer
            .try_clone()
            .map_err(|e| QueryBotError::InternalError(format!("Failed to clone connection: {}", e)))
    }

    /// Register `df` under `identifier`, replacing any previous table.
    ///
    /// Returns the schema description recorded for the dataset.
    pub fn register(&self, identifier: &str, mut df: DataFrame) -> Result<String> {
        validate_identifier(identifier)?;
        if df.width() == 0 {
            return Err(QueryBotError::EmptySource(format!(
                "dataset '{}' has no columns",
                identifier
            )));
        }

        let columns: Vec<(String, String)> = df
            .get_columns()
            .iter()
            .map(|c| (c.name().to_string(), sql_type_for(c.dtype()).to_string()))
            .collect();
        let schema = render_schema(identifier, &columns);

        // Hand the frame to the engine through a parquet file
        let mut staged = tempfile::Builder::new()
            .prefix("querybot-")
            .suffix(".parquet")
            .tempfile()?;
        ParquetWriter::new(staged.as_file_mut())
            .finish(&mut df)
            .map_err(|e| QueryBotError::IoError(format!("Failed to stage '{}': {}", identifier, e)))?;
        let staged_path = staged.path().to_string_lossy().to_string();

        let writer = self.writer.lock().map_err(|e| {
            QueryBotError::InternalError(format!(
                "Database connection unavailable (mutex poisoned): {}",
                e
            ))
        })?;

        let table = quote_ident(identifier);
        let replace = format!(
            "BEGIN TRANSACTION;\n\
             DROP TABLE IF EXISTS {table};\n\
             CREATE TABLE {table} AS SELECT * FROM read_parquet({path});\n\
             COMMIT;",
            table = table,
            path = quote_literal(&staged_path),
        );
        if let Err(e) = writer.execute_batch(&replace) {
            let _ = writer.execute_batch("ROLLBACK");
            return Err(QueryBotError::ReadFailure(format!(
                "Failed to create table '{}': {}",
                identifier, e
            )));
        }

        let sample = fetch_rows(
            &writer,
            &format!("SELECT * FROM {} LIMIT {}", table, self.sample_rows),
        )
        .map_err(|e| QueryBotError::ReadFailure(format!("Failed to sample '{}': {}", identifier, e)))?
        .values;

        let mut datasets = self.datasets.write().map_err(|e| {
            QueryBotError::InternalError(format!("Dataset map unavailable (lock poisoned): {}", e))
        })?;
        let replaced = datasets
            .insert(
                registry_key(identifier),
                Dataset {
                    name: identifier.to_string(),
                    schema: schema.clone(),
                    columns,
                    sample,
                },
            )
            .is_some();

        info!(
            "Registered dataset '{}' ({} rows){}",
            identifier,
            df.height(),
            if replaced { ", replacing previous table" } else { "" }
        );

        Ok(schema)
    }

    /// Look up a dataset by identifier
    pub fn get(&self, identifier: &str) -> Result<Dataset> {
        let datasets = self.datasets.read().map_err(|e| {
            QueryBotError::InternalError(format!("Dataset map unavailable (lock poisoned): {}", e))
        })?;
        datasets
            .get(&registry_key(identifier))
            .cloned()
            .ok_or_else(|| QueryBotError::NotFound(identifier.to_string()))
    }

    /// Identifiers of all registered datasets, sorted case-insensitively
    pub fn list(&self) -> Result<Vec<String>> {
        let datasets = self.datasets.read().map_err(|e| {
            QueryBotError::InternalError(format!("Dataset map unavailable (lock poisoned): {}", e))
        })?;
        Ok(datasets.values().map(|d| d.name.clone()).collect())
    }

    /// All registered datasets, sorted case-insensitively by identifier
    pub fn datasets(&self) -> Result<Vec<Dataset>> {
        let datasets = self.datasets.read().map_err(|e| {
            QueryBotError::InternalError(format!("Dataset map unavailable (lock poisoned): {}", e))
        })?;
        Ok(datasets.values().cloned().collect())
    }

    /// Drop a dataset and its table
    pub fn remove(&self, identifier: &str) -> Result<()> {
        validate_identifier(identifier)?;
        let writer = self.writer.lock().map_err(|e| {
            QueryBotError::InternalError(format!(
                "Database connection unavailable (mutex poisoned): {}",
                e
            ))
        })?;
        let mut datasets = self.datasets.write().map_err(|e| {
            QueryBotError::InternalError(format!("Dataset map unavailable (lock poisoned): {}", e))
        })?;
        if datasets.remove(&registry_key(identifier)).is_none() {
            return Err(QueryBotError::NotFound(identifier.to_string()));
        }
        writer
            .execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_ident(identifier)))
            .map_err(|e| QueryBotError::InternalError(format!("Failed to drop '{}': {}", identifier, e)))?;
        info!("Removed dataset '{}'", identifier);
        Ok(())
    }

    /// Serialise a registered table as CSV with a header row
    pub fn export_csv(&self, identifier: &str) -> Result<Vec<u8>> {
        validate_identifier(identifier)?;
        self.get(identifier)?;

        let target = tempfile::Builder::new()
            .prefix("querybot-")
            .suffix(".csv")
            .tempfile()?;
        let target_path = target.path().to_string_lossy().to_string();

        let conn = self.reader()?;
        conn.execute_batch(&format!(
            "COPY (SELECT * FROM {}) TO {} (HEADER, DELIMITER ',');",
            quote_ident(identifier),
            quote_literal(&target_path)
        ))
        .map_err(|e| QueryBotError::ExecutionFailure(e.to_string()))?;

        Ok(std::fs::read(target.path())?)
    }
}
