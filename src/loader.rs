//! Loading sources into DataFrames for registration
//!
//! Delimited and Parquet files are read directly by Polars. Every other
//! kind goes through a scratch DuckDB connection and is handed over as a
//! Parquet file, so all sources reach the registry as a `DataFrame`.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use polars::prelude::*;
use tracing::{debug, info};

use crate::introspect::{ensure_readable_file, materialize};
use crate::source::{quote_literal, DataSource, SourceKind};
use crate::{QueryBotError, Result};

/// A source read into memory, with the identifier it should be registered under
#[derive(Debug)]
pub struct LoadedSource {
    pub identifier: String,
    pub frame: DataFrame,
}

/// Read a whole source into a DataFrame
pub fn load(source: &DataSource) -> Result<LoadedSource> {
    let loaded = match source.kind {
        SourceKind::Delimited => {
            ensure_readable_file(source)?;
            LoadedSource {
                identifier: file_identifier(source),
                frame: read_delimited(source)?,
            }
        }
        SourceKind::Columnar => {
            ensure_readable_file(source)?;
            LoadedSource {
                identifier: file_identifier(source),
                frame: read_parquet(source, Path::new(&source.locator))?,
            }
        }
        _ => load_through_engine(source)?,
    };

    info!(
        "Loaded {} as '{}': {} rows x {} columns",
        source.locator,
        loaded.identifier,
        loaded.frame.height(),
        loaded.frame.width()
    );
    Ok(loaded)
}

fn file_identifier(source: &DataSource) -> String {
    source
        .default_identifier()
        .unwrap_or_else(|| "dataset".to_string())
}

fn read_failure(source: &DataSource, err: PolarsError) -> QueryBotError {
    QueryBotError::ReadFailure(format!("{}: {}", source.locator, err))
}

fn read_delimited(source: &DataSource) -> Result<DataFrame> {
    let separator = if source.locator.to_lowercase().ends_with(".tsv") {
        b'\t'
    } else {
        b','
    };

    let bytes = std::fs::read(&source.locator)
        .map_err(|e| QueryBotError::ReadFailure(format!("{}: {}", source.locator, e)))?;
    let bytes = match String::from_utf8(bytes) {
        Ok(text) => text.into_bytes(),
        Err(e) => {
            debug!("{} is not UTF-8; reading it as Latin-1", source.locator);
            latin1_to_utf8(e.as_bytes()).into_bytes()
        }
    };

    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .map_parse_options(|opts| {
            opts.with_separator(separator)
                .with_encoding(CsvEncoding::LossyUtf8)
                .with_try_parse_dates(true)
        })
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .map_err(|e| read_failure(source, e))
}

/// Every Latin-1 byte is the code point of the same value
fn latin1_to_utf8(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn read_parquet(source: &DataSource, path: &Path) -> Result<DataFrame> {
    let file = File::open(path)
        .map_err(|e| QueryBotError::ReadFailure(format!("{}: {}", source.locator, e)))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| read_failure(source, e))
}

fn load_through_engine(source: &DataSource) -> Result<LoadedSource> {
    let scratch = materialize(source)?;

    let staged = tempfile::Builder::new()
        .prefix("querybot-")
        .suffix(".parquet")
        .tempfile()?;
    let staged_path = staged.path().to_path_buf();

    scratch
        .conn
        .execute_batch(&format!(
            "COPY {} TO {} (FORMAT parquet);",
            scratch.table_ref(),
            quote_literal(&staged_path.to_string_lossy())
        ))
        .map_err(|e| QueryBotError::ReadFailure(format!("{}: {}", source.locator, e)))?;

    let frame = read_parquet(source, &staged_path)?;
    Ok(LoadedSource {
        identifier: scratch.name,
        frame,
    })
}
