//! Data source locators
//!
//! A [`DataSource`] is built per ingestion request from a locator string (a
//! file path or a connection string). It is discarded once the schema and
//! data have been extracted.
//!
//! Kind detection looks at the locator shape first (URL schemes, connection
//! string prefixes), then at the file extension:
//!
//! | Locator                                        | Kind                 |
//! |------------------------------------------------|----------------------|
//! | `*.csv`, `*.tsv`, `*.txt`                      | delimited text       |
//! | `*.xlsx`                                       | spreadsheet          |
//! | `*.parquet`                                    | columnar             |
//! | `*.db`, `*.sqlite`, `*.sqlite3`, `*.duckdb`    | embedded database    |
//! | `duckdb://…`, `http(s)://…`, `s3://…`, `md:…`  | remote DuckDB        |
//! | `mysql://…`                                    | remote MySQL         |
//! | `postgres://…`, `postgresql://…`               | remote Postgres      |

use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use crate::{QueryBotError, Result};

/// Flavour of a remote relational endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDialect {
    DuckDb,
    MySql,
    Postgres,
}

impl RemoteDialect {
    /// Engine extension backing the dialect, if any
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            RemoteDialect::DuckDb => None,
            RemoteDialect::MySql => Some("mysql"),
            RemoteDialect::Postgres => Some("postgres"),
        }
    }
}

/// Kind of tabular source a locator points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// CSV and similar text files, column types inferred from content
    Delimited,
    /// Excel workbook
    Spreadsheet,
    /// Parquet file, types embedded in the file
    Columnar,
    /// Database file attached as a nested catalog
    EmbeddedDatabase,
    /// Database reached through a connection string or URL
    RemoteDatabase(RemoteDialect),
}

impl SourceKind {
    pub fn is_remote(&self) -> bool {
        matches!(self, SourceKind::RemoteDatabase(_))
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Delimited => "delimited",
            SourceKind::Spreadsheet => "spreadsheet",
            SourceKind::Columnar => "columnar",
            SourceKind::EmbeddedDatabase => "embedded-database",
            SourceKind::RemoteDatabase(RemoteDialect::DuckDb) => "remote-duckdb",
            SourceKind::RemoteDatabase(RemoteDialect::MySql) => "remote-mysql",
            SourceKind::RemoteDatabase(RemoteDialect::Postgres) => "remote-postgres",
        };
        write!(f, "{}", name)
    }
}

/// A reference to tabular data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    /// Locator exactly as supplied by the caller
    pub locator: String,
    /// Inferred kind
    pub kind: SourceKind,
    /// Sheet or table to read when the source holds several
    pub table: Option<String>,
}

impl DataSource {
    /// Parse a locator, inferring its kind
    pub fn parse(locator: &str) -> Result<Self> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(QueryBotError::UnsupportedFormat(
                "empty data source locator".to_string(),
            ));
        }

        let kind = detect_kind(locator)?;
        Ok(Self {
            locator: locator.to_string(),
            kind,
            table: None,
        })
    }

    /// Select a sheet or table inside the source
    pub fn with_table(mut self, table: Option<String>) -> Self {
        self.table = table.filter(|t| !t.trim().is_empty());
        self
    }

    /// The string handed to the engine when attaching or scanning the source.
    ///
    /// `duckdb://` is stripped; every other locator is passed through.
    pub fn target(&self) -> &str {
        self.locator
            .strip_prefix("duckdb://")
            .unwrap_or(&self.locator)
    }

    /// Lower-cased file extension with its leading dot, e.g. `.csv`
    pub fn file_type(&self) -> String {
        if self.kind.is_remote() {
            return self.kind.to_string();
        }
        Path::new(&self.locator)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default()
    }

    /// Dataset identifier derived from the file stem.
    ///
    /// Remote sources are named after the table read from them, which is only
    /// known once the catalog has been enumerated, so they return `None`.
    pub fn default_identifier(&self) -> Option<String> {
        if self.kind.is_remote() {
            return None;
        }
        let stem = Path::new(&self.locator)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset");
        Some(sanitize_identifier(stem))
    }
}

fn detect_kind(locator: &str) -> Result<SourceKind> {
    let lower = locator.to_lowercase();

    if lower.starts_with("mysql://") {
        return Ok(SourceKind::RemoteDatabase(RemoteDialect::MySql));
    }
    if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
        return Ok(SourceKind::RemoteDatabase(RemoteDialect::Postgres));
    }
    if ["duckdb://", "http://", "https://", "s3://", "gs://", "md:"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return Ok(SourceKind::RemoteDatabase(RemoteDialect::DuckDb));
    }

    let extension = Path::new(locator)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "csv" | "tsv" | "txt" => Ok(SourceKind::Delimited),
        "xlsx" => Ok(SourceKind::Spreadsheet),
        "parquet" => Ok(SourceKind::Columnar),
        "db" | "sqlite" | "sqlite3" | "duckdb" => Ok(SourceKind::EmbeddedDatabase),
        "" => Err(QueryBotError::UnsupportedFormat(format!(
            "{} has no file extension (supported: csv, tsv, txt, xlsx, parquet, db, sqlite, sqlite3, duckdb)",
            locator
        ))),
        other => Err(QueryBotError::UnsupportedFormat(format!(
            ".{} (supported: csv, tsv, txt, xlsx, parquet, db, sqlite, sqlite3, duckdb)",
            other
        ))),
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

/// Reject identifiers that are not plain SQL identifiers
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.len() > 128 || !identifier_pattern().is_match(identifier) {
        return Err(QueryBotError::InvalidIdentifier(format!(
            "'{}' must match [A-Za-z_][A-Za-z0-9_]* (max 128 chars)",
            identifier
        )));
    }
    Ok(())
}

/// Turn an arbitrary name (file stem, table name) into a legal identifier
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(120)
        .collect();

    if out.is_empty() {
        out.push_str("dataset");
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Quote a value as a SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote a name as a SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
