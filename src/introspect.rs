//! Schema introspection
//!
//! Turns any supported [`DataSource`] into a uniform schema description and
//! a handful of sample rows. Each call works on its own scratch in-memory
//! DuckDB connection: the source is materialised there as a table named
//! `scratch`, described with `DESCRIBE`, sampled, and the connection is dropped
//! on every exit path.
//!
//! Per-kind strategy:
//!
//! - delimited text: `read_csv_auto`, types inferred from content
//! - spreadsheet: `read_xlsx` on the first sheet, or the requested one
//! - columnar: `read_parquet`, types taken from the file
//! - embedded database: attached read-only as a nested catalog
//! - remote database: attached read-only through the matching scanner
//!
//! When a catalog holds several tables and none was requested, the first one
//! in `(schema, name)` order is used. That choice is a convenience, not a
//! claim that it is the table the caller meant; pass a table name to be
//! explicit.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use duckdb::Connection;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::execute::fetch_rows;
use crate::source::{quote_ident, quote_literal, sanitize_identifier, DataSource, RemoteDialect, SourceKind};
use crate::{QueryBotError, Result, DEFAULT_SAMPLE_ROWS};

/// Alias under which catalogs are attached on the scratch connection
const SOURCE_CATALOG: &str = "source_db";

/// Name of the scratch table holding the materialised source
const SCRATCH_TABLE: &str = "scratch";

/// Schema and sample extracted from a data source
#[derive(Debug, Clone, Serialize)]
pub struct Introspection {
    /// Dataset identifier (file stem, or table name for remote sources)
    pub name: String,
    /// Table read from an embedded or remote catalog
    pub table: Option<String>,
    /// `CREATE TABLE` style schema description
    pub schema: String,
    /// Column names with engine types, in source order
    pub columns: Vec<(String, String)>,
    /// First rows of the source
    pub sample: Vec<Vec<JsonValue>>,
}

/// Render `CREATE TABLE <name> (\n[col] TYPE,\n...\n);`
pub fn render_schema(name: &str, columns: &[(String, String)]) -> String {
    let body = columns
        .iter()
        .map(|(column, ty)| format!("[{}] {}", column, ty))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE {} (\n{}\n);", name, body)
}

/// Introspect a source with the default sample size
pub fn introspect(source: &DataSource) -> Result<Introspection> {
    introspect_with_sample(source, DEFAULT_SAMPLE_ROWS)
}

/// Introspect a source, keeping at most `sample_rows` sample rows
pub fn introspect_with_sample(source: &DataSource, sample_rows: usize) -> Result<Introspection> {
    let scratch = materialize(source)?;

    let describe = fetch_rows(&scratch.conn, &format!("DESCRIBE {}", SCRATCH_TABLE))
        .map_err(|e| QueryBotError::ReadFailure(format!("{}: {}", source.locator, e)))?;
    let columns: Vec<(String, String)> = describe
        .values
        .iter()
        .map(|row| (json_text(row.first()), json_text(row.get(1))))
        .collect();
    if columns.is_empty() {
        return Err(QueryBotError::EmptySource(format!(
            "{} has no columns",
            source.locator
        )));
    }

    let sample = fetch_rows(
        &scratch.conn,
        &format!("SELECT * FROM {} LIMIT {}", SCRATCH_TABLE, sample_rows),
    )
    .map_err(|e| QueryBotError::ReadFailure(format!("{}: {}", source.locator, e)))?
    .values;

    info!(
        "Introspected {} ({}) as '{}': {} column(s)",
        source.locator,
        source.kind,
        scratch.name,
        columns.len()
    );

    Ok(Introspection {
        schema: render_schema(&scratch.name, &columns),
        name: scratch.name,
        table: scratch.table,
        columns,
        sample,
    })
}

fn json_text(value: Option<&JsonValue>) -> String {
    match value {
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

// ============================================================================
// Scratch materialisation
// ============================================================================

/// A source materialised on a private connection.
///
/// Dropping it closes the connection and detaches any attached catalog.
pub(crate) struct Scratch {
    pub(crate) conn: Connection,
    /// Dataset identifier
    pub(crate) name: String,
    /// Table chosen inside an attached catalog
    pub(crate) table: Option<String>,
}

impl Scratch {
    /// Name of the table holding the source rows on [`Scratch::conn`]
    pub(crate) fn table_ref(&self) -> &'static str {
        SCRATCH_TABLE
    }
}

/// Copy the source into the scratch table of a fresh connection
pub(crate) fn materialize(source: &DataSource) -> Result<Scratch> {
    let conn = Connection::open_in_memory()
        .map_err(|e| QueryBotError::InternalError(format!("Failed to open DuckDB: {}", e)))?;

    match source.kind {
        SourceKind::Delimited => {
            ensure_readable_file(source)?;
            let path = quote_literal(&source.locator);
            if let Err(e) = create_scratch(&conn, source, &format!("read_csv_auto({})", path)) {
                if !is_encoding_error(&e) {
                    return Err(e);
                }
                debug!("{} is not UTF-8; reading it as Latin-1", source.locator);
                create_scratch(
                    &conn,
                    source,
                    &format!("read_csv_auto({}, encoding = 'latin-1')", path),
                )?;
            }
            scratch_for_file(conn, source)
        }
        SourceKind::Columnar => {
            ensure_readable_file(source)?;
            create_scratch(
                &conn,
                source,
                &format!("read_parquet({})", quote_literal(&source.locator)),
            )?;
            scratch_for_file(conn, source)
        }
        SourceKind::Spreadsheet => {
            ensure_readable_file(source)?;
            conn.execute_batch("INSTALL excel; LOAD excel;").map_err(|e| {
                QueryBotError::ReadFailure(format!("Excel support unavailable: {}", e))
            })?;
            let sheet = source
                .table
                .as_ref()
                .map(|s| format!(", sheet = {}", quote_literal(s)))
                .unwrap_or_default();
            create_scratch(
                &conn,
                source,
                &format!(
                    "read_xlsx({}, header = true{})",
                    quote_literal(&source.locator),
                    sheet
                ),
            )?;
            scratch_for_file(conn, source)
        }
        SourceKind::EmbeddedDatabase => {
            ensure_readable_file(source)?;
            let options = if is_sqlite_file(Path::new(&source.locator)) {
                "(TYPE sqlite, READ_ONLY)"
            } else {
                "(READ_ONLY)"
            };
            conn.execute_batch(&format!(
                "ATTACH {} AS {} {};",
                quote_literal(&source.locator),
                SOURCE_CATALOG,
                options
            ))
            .map_err(|e| QueryBotError::ReadFailure(format!("{}: {}", source.locator, e)))?;

            let table = copy_catalog_table(&conn, source)?;
            let name = source
                .default_identifier()
                .unwrap_or_else(|| sanitize_identifier(&table));
            Ok(Scratch {
                conn,
                name,
                table: Some(table),
            })
        }
        SourceKind::RemoteDatabase(dialect) => {
            attach_remote(&conn, source, dialect)?;
            let table = copy_catalog_table(&conn, source)?;
            Ok(Scratch {
                conn,
                name: sanitize_identifier(&table),
                table: Some(table),
            })
        }
    }
}

fn scratch_for_file(conn: Connection, source: &DataSource) -> Result<Scratch> {
    let name = source
        .default_identifier()
        .unwrap_or_else(|| "dataset".to_string());
    Ok(Scratch {
        conn,
        name,
        table: None,
    })
}

fn create_scratch(conn: &Connection, source: &DataSource, scan: &str) -> Result<()> {
    let sql = format!("CREATE TABLE {} AS SELECT * FROM {}", SCRATCH_TABLE, scan);
    debug!("{}", sql);
    conn.execute_batch(&sql)
        .map_err(|e| QueryBotError::ReadFailure(format!("{}: {}", source.locator, e)))
}

fn is_encoding_error(err: &QueryBotError) -> bool {
    match err {
        QueryBotError::ReadFailure(msg) => {
            let msg = msg.to_lowercase();
            msg.contains("invalid unicode") || msg.contains("not utf-8 encoded")
        }
        _ => false,
    }
}

pub(crate) fn ensure_readable_file(source: &DataSource) -> Result<()> {
    let path = Path::new(&source.locator);
    let metadata = std::fs::metadata(path)
        .map_err(|e| QueryBotError::ReadFailure(format!("File not found: {} ({})", source.locator, e)))?;
    if !metadata.is_file() {
        return Err(QueryBotError::ReadFailure(format!(
            "{} is not a file",
            source.locator
        )));
    }
    if metadata.len() == 0 {
        return Err(QueryBotError::EmptySource(format!(
            "{} is empty",
            source.locator
        )));
    }
    Ok(())
}

fn is_sqlite_file(path: &Path) -> bool {
    let mut header = [0u8; 16];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut header))
        .map(|_| &header == b"SQLite format 3\0")
        .unwrap_or(false)
}

fn attach_remote(conn: &Connection, source: &DataSource, dialect: RemoteDialect) -> Result<()> {
    let connect_err = |e: duckdb::Error| {
        QueryBotError::ConnectionFailure(format!("Could not connect to {}: {}", source.locator, e))
    };

    let options = match dialect.extension() {
        Some(extension) => {
            conn.execute_batch(&format!("INSTALL {ext}; LOAD {ext};", ext = extension))
                .map_err(connect_err)?;
            format!("(TYPE {}, READ_ONLY)", extension)
        }
        None => "(READ_ONLY)".to_string(),
    };

    conn.execute_batch(&format!(
        "ATTACH {} AS {} {};",
        quote_literal(source.target()),
        SOURCE_CATALOG,
        options
    ))
    .map_err(connect_err)
}

/// Tables of the attached catalog as `(schema, table)`, in catalog order
fn list_tables(conn: &Connection) -> duckdb::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT table_schema, table_name FROM information_schema.tables \
         WHERE table_catalog = ? ORDER BY table_schema, table_name",
    )?;
    let tables = stmt
        .query_map([SOURCE_CATALOG], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<duckdb::Result<Vec<(String, String)>>>()?;
    Ok(tables)
}

/// Pick a table from the attached catalog and copy it into the scratch table
fn copy_catalog_table(conn: &Connection, source: &DataSource) -> Result<String> {
    let tables = list_tables(conn).map_err(|e| {
        QueryBotError::ReadFailure(format!("Failed to list tables in {}: {}", source.locator, e))
    })?;

    if tables.is_empty() {
        return Err(QueryBotError::EmptySource(format!(
            "No tables found in {}",
            source.locator
        )));
    }

    let (schema, table) = match &source.table {
        Some(wanted) => tables
            .iter()
            .find(|(_, name)| name == wanted)
            .cloned()
            .ok_or_else(|| {
                QueryBotError::NotFound(format!("table '{}' in {}", wanted, source.locator))
            })?,
        None => {
            if tables.len() > 1 {
                warn!(
                    "{} holds {} tables; using '{}' (pass a table name to choose another)",
                    source.locator,
                    tables.len(),
                    tables[0].1
                );
            }
            tables[0].clone()
        }
    };

    create_scratch(
        conn,
        source,
        &format!(
            "{}.{}.{}",
            SOURCE_CATALOG,
            quote_ident(&schema),
            quote_ident(&table)
        ),
    )?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    fn duckdb_file(dir: &TempDir, name: &str, setup: &str) -> String {
        let path = dir.path().join(name);
        let conn = Connection::open(&path).unwrap();
        if !setup.is_empty() {
            conn.execute_batch(setup).unwrap();
        }
        drop(conn);
        path.to_string_lossy().to_string()
    }

    /// Whether a DuckDB extension can be loaded here (it may need a download)
    fn extension_available(name: &str) -> bool {
        let conn = Connection::open_in_memory().unwrap();
        let available = conn
            .execute_batch(&format!("INSTALL {name}; LOAD {name};", name = name))
            .is_ok();
        if !available {
            eprintln!("skipping: DuckDB extension '{}' is not installable", name);
        }
        available
    }

    fn fixture(name: &str) -> String {
        format!("{}/../data/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    #[test]
    fn test_render_schema_template() {
        let columns = vec![
            ("id".to_string(), "BIGINT".to_string()),
            ("name".to_string(), "VARCHAR".to_string()),
        ];
        assert_eq!(
            render_schema("people", &columns),
            "CREATE TABLE people (\n[id] BIGINT,\n[name] VARCHAR\n);"
        );
    }

    #[test]
    fn test_introspect_csv() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "people.csv", "id,name\n1,a\n2,b\n");
        let result = introspect(&DataSource::parse(&path).unwrap()).unwrap();

        assert_eq!(result.name, "people");
        assert_eq!(
            result.schema,
            "CREATE TABLE people (\n[id] BIGINT,\n[name] VARCHAR\n);"
        );
        assert_eq!(result.sample, vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]]);
        assert_eq!(result.table, None);
    }

    #[test]
    fn test_introspect_latin1_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("menu.csv");
        std::fs::write(&path, b"id,name\n1,caf\xe9\n").unwrap();

        let result = introspect(&DataSource::parse(&path.to_string_lossy()).unwrap()).unwrap();
        assert_eq!(
            result.schema,
            "CREATE TABLE menu (\n[id] BIGINT,\n[name] VARCHAR\n);"
        );
        assert_eq!(result.sample, vec![vec![json!(1), json!("café")]]);
    }

    #[test]
    fn test_sample_is_bounded() {
        let dir = TempDir::new().unwrap();
        let mut csv = String::from("n\n");
        for i in 0..20 {
            csv.push_str(&format!("{}\n", i));
        }
        let path = write_file(&dir, "numbers.csv", &csv);
        let result = introspect(&DataSource::parse(&path).unwrap()).unwrap();
        assert_eq!(result.sample.len(), 5);
        assert_eq!(result.sample[0], vec![json!(0)]);
    }

    #[test]
    fn test_introspect_parquet_preserves_column_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.parquet");
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!(
            "COPY (SELECT 'x' AS zeta, 1.5::DOUBLE AS alpha, true AS mid) TO {} (FORMAT parquet);",
            quote_literal(&path.to_string_lossy())
        ))
        .unwrap();

        let result = introspect(&DataSource::parse(&path.to_string_lossy()).unwrap()).unwrap();
        assert_eq!(
            result.schema,
            "CREATE TABLE events (\n[zeta] VARCHAR,\n[alpha] DOUBLE,\n[mid] BOOLEAN\n);"
        );
    }

    #[test]
    fn test_introspect_embedded_database_picks_first_table() {
        let dir = TempDir::new().unwrap();
        let path = duckdb_file(
            &dir,
            "shop.duckdb",
            "CREATE TABLE orders (id INTEGER, total DOUBLE);
             INSERT INTO orders VALUES (1, 9.5);
             CREATE TABLE customers (id INTEGER, name VARCHAR);",
        );

        let result = introspect(&DataSource::parse(&path).unwrap()).unwrap();
        assert_eq!(result.name, "shop");
        assert_eq!(result.table.as_deref(), Some("customers"));
        assert_eq!(
            result.schema,
            "CREATE TABLE shop (\n[id] INTEGER,\n[name] VARCHAR\n);"
        );

        let chosen = DataSource::parse(&path)
            .unwrap()
            .with_table(Some("orders".to_string()));
        let result = introspect(&chosen).unwrap();
        assert_eq!(result.table.as_deref(), Some("orders"));
        assert_eq!(result.sample, vec![vec![json!(1), json!(9.5)]]);
    }

    #[test]
    fn test_sqlite_header_detection() {
        let dir = TempDir::new().unwrap();
        let mut header = b"SQLite format 3\0".to_vec();
        header.extend_from_slice(&[0u8; 84]);
        let sqlite = dir.path().join("legacy.db");
        std::fs::write(&sqlite, &header).unwrap();
        assert!(is_sqlite_file(&sqlite));

        let duck = duckdb_file(&dir, "modern.db", "CREATE TABLE t (x INTEGER);");
        assert!(!is_sqlite_file(Path::new(&duck)));

        let short = write_file(&dir, "short.db", "SQLite");
        assert!(!is_sqlite_file(Path::new(&short)));
    }

    #[test]
    fn test_introspect_sqlite_file() {
        if !extension_available("sqlite") {
            return;
        }
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chinook.db");
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!(
            "INSTALL sqlite; LOAD sqlite;
             ATTACH {} AS lite (TYPE sqlite);
             CREATE TABLE lite.artists (id INTEGER, name VARCHAR);
             INSERT INTO lite.artists VALUES (1, 'AC/DC'), (2, 'Accept');
             DETACH lite;",
            quote_literal(&path.to_string_lossy())
        ))
        .unwrap();
        drop(conn);
        assert!(is_sqlite_file(&path));

        let result = introspect(&DataSource::parse(&path.to_string_lossy()).unwrap()).unwrap();
        assert_eq!(result.name, "chinook");
        assert_eq!(result.table.as_deref(), Some("artists"));
        assert_eq!(result.columns.len(), 2);
        assert_eq!(result.columns[1].0, "name");
        assert_eq!(result.sample[0][1], json!("AC/DC"));
    }

    #[test]
    fn test_introspect_spreadsheet() {
        if !extension_available("excel") {
            return;
        }
        let path = fixture("people.xlsx");

        let result = introspect(&DataSource::parse(&path).unwrap()).unwrap();
        assert_eq!(result.name, "people");
        let names: Vec<&str> = result.columns.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(result.columns[1].1, "VARCHAR");
        assert_eq!(result.sample.len(), 2);
        assert_eq!(result.sample[1][1], json!("bob"));

        // A named sheet is read instead of the first one
        let sales = DataSource::parse(&path)
            .unwrap()
            .with_table(Some("sales".to_string()));
        let result = introspect(&sales).unwrap();
        let names: Vec<&str> = result.columns.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(names, vec!["region", "amount"]);
        assert_eq!(result.sample[0][0], json!("EU"));
    }

    #[test]
    fn test_embedded_database_unknown_table() {
        let dir = TempDir::new().unwrap();
        let path = duckdb_file(&dir, "one.duckdb", "CREATE TABLE t (x INTEGER);");
        let source = DataSource::parse(&path)
            .unwrap()
            .with_table(Some("missing".to_string()));
        assert!(matches!(
            introspect(&source).unwrap_err(),
            QueryBotError::NotFound(_)
        ));
    }

    #[test]
    fn test_embedded_database_without_tables_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = duckdb_file(&dir, "blank.duckdb", "");
        assert!(matches!(
            introspect(&DataSource::parse(&path).unwrap()).unwrap_err(),
            QueryBotError::EmptySource(_)
        ));
    }

    #[test]
    fn test_remote_catalog_names_dataset_after_table() {
        let dir = TempDir::new().unwrap();
        let path = duckdb_file(
            &dir,
            "remote.duckdb",
            "CREATE TABLE test_remote_table (col_a INTEGER, col_b VARCHAR);
             INSERT INTO test_remote_table VALUES (1, 'value1'), (2, 'value2');",
        );

        let locator = format!("duckdb://{}", path);
        let result = introspect(&DataSource::parse(&locator).unwrap()).unwrap();
        assert_eq!(result.name, "test_remote_table");
        assert_eq!(
            result.schema,
            "CREATE TABLE test_remote_table (\n[col_a] INTEGER,\n[col_b] VARCHAR\n);"
        );
        assert_eq!(
            result.sample,
            vec![vec![json!(1), json!("value1")], vec![json!(2), json!("value2")]]
        );
    }

    #[test]
    fn test_remote_catalog_without_tables_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = duckdb_file(&dir, "empty.duckdb", "");
        let locator = format!("duckdb://{}", path);
        assert!(matches!(
            introspect(&DataSource::parse(&locator).unwrap()).unwrap_err(),
            QueryBotError::EmptySource(_)
        ));
    }

    #[test]
    fn test_unreachable_remote_is_connection_failure() {
        let dir = TempDir::new().unwrap();
        let locator = format!("duckdb://{}", dir.path().join("nowhere/missing.duckdb").display());
        let err = introspect(&DataSource::parse(&locator).unwrap()).unwrap_err();
        match err {
            QueryBotError::ConnectionFailure(msg) => assert!(msg.contains(&locator)),
            other => panic!("expected ConnectionFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_read_failure() {
        let source = DataSource::parse("/definitely/not/here.csv").unwrap();
        assert!(matches!(
            introspect(&source).unwrap_err(),
            QueryBotError::ReadFailure(_)
        ));
    }

    #[test]
    fn test_empty_file_is_empty_source() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "blank.csv", "");
        assert!(matches!(
            introspect(&DataSource::parse(&path).unwrap()).unwrap_err(),
            QueryBotError::EmptySource(_)
        ));
    }

    #[test]
    fn test_malformed_parquet_is_read_failure() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "broken.parquet", "this is not parquet");
        assert!(matches!(
            introspect(&DataSource::parse(&path).unwrap()).unwrap_err(),
            QueryBotError::ReadFailure(_)
        ));
    }
}
