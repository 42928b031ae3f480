/*!
# querybot - natural-language questions over tabular data

querybot ingests tabular data (CSV, spreadsheets, Parquet, embedded
databases, remote catalogs), describes its schema, asks a large language
model to translate a question into SQL and runs that SQL on an in-process
DuckDB engine.

## Pipeline

```text
locator ──► introspect ──► loader ──► registry          (ingestion)
question ─► prompt ─► gateway ─► extract ─► execute     (per query)
```

## Example

```rust,ignore
use std::sync::Arc;
use querybot::{ChatCompletionsGateway, DatasetRegistry, QueryBot, QueryRequest};

let registry = Arc::new(DatasetRegistry::in_memory()?);
let gateway = Arc::new(ChatCompletionsGateway::from_env());
let bot = QueryBot::new(registry, gateway);

bot.ingest("data/sales.csv", None).await?;
let answer = bot.ask(&QueryRequest::for_datasets(["sales"], "Total revenue by region?")).await?;
println!("{}", answer.generated_query);
```
*/

pub mod config;
pub mod execute;
pub mod extract;
pub mod gateway;
pub mod introspect;
pub mod loader;
pub mod pipeline;
pub mod prompt;
pub mod registry;
pub mod source;

pub use config::GatewaySettings;
pub use execute::QueryResult;
pub use gateway::{ChatCompletionsGateway, LlmGateway};
pub use introspect::Introspection;
pub use pipeline::{IngestedDataset, QueryBot, QueryRequest};
pub use prompt::{PromptEnvelope, SchemaBlock};
pub use registry::{Dataset, DatasetRegistry};
pub use source::{DataSource, SourceKind};

// Re-export the tabular data type used for registration
pub use polars::prelude::DataFrame;

/// Version of the querybot crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of sample rows collected per dataset unless configured otherwise
pub const DEFAULT_SAMPLE_ROWS: usize = 5;

/// Main library error type
#[derive(thiserror::Error, Debug)]
pub enum QueryBotError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Empty source: {0}")]
    EmptySource(String),

    #[error("Read failure: {0}")]
    ReadFailure(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Dataset not found: {0}")]
    NotFound(String),

    #[error("LLM gateway error: {0}")]
    GatewayError(String),

    #[error("Failed to extract SQL query from the LLM response: {0}")]
    ExtractionFailure(String),

    #[error("Query execution failed: {0}")]
    ExecutionFailure(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl QueryBotError {
    /// Variant name, used as the `type` field of API error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            QueryBotError::UnsupportedFormat(_) => "UnsupportedFormat",
            QueryBotError::ConnectionFailure(_) => "ConnectionFailure",
            QueryBotError::EmptySource(_) => "EmptySource",
            QueryBotError::ReadFailure(_) => "ReadFailure",
            QueryBotError::InvalidIdentifier(_) => "InvalidIdentifier",
            QueryBotError::InvalidRequest(_) => "InvalidRequest",
            QueryBotError::NotFound(_) => "NotFound",
            QueryBotError::GatewayError(_) => "GatewayError",
            QueryBotError::ExtractionFailure(_) => "ExtractionFailure",
            QueryBotError::ExecutionFailure(_) => "ExecutionFailure",
            QueryBotError::ConfigError(_) => "ConfigError",
            QueryBotError::IoError(_) => "IoError",
            QueryBotError::InternalError(_) => "InternalError",
        }
    }
}

impl From<std::io::Error> for QueryBotError {
    fn from(err: std::io::Error) -> Self {
        QueryBotError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueryBotError>;
