//! Ingestion and query orchestration
//!
//! Ingestion: introspect → load → suggest questions → register.
//! Query: (re-)register locators → prompt → gateway → extract → execute.
//!
//! Each stage returns its own [`QueryBotError`] variant and the first
//! failure ends the request. A gateway or extraction failure means no SQL
//! is run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::execute::{execute, QueryResult};
use crate::extract::extract_sql;
use crate::gateway::LlmGateway;
use crate::introspect::introspect_with_sample;
use crate::loader::{load, LoadedSource};
use crate::prompt::{self, SchemaBlock, SYSTEM_PROMPT};
use crate::registry::{Dataset, DatasetRegistry};
use crate::source::DataSource;
use crate::{QueryBotError, Result, DEFAULT_SAMPLE_ROWS};

/// Per-source result of an ingestion
#[derive(Debug, Clone, Serialize)]
pub struct IngestedDataset {
    pub dataset_name: String,
    /// Engine-typed `CREATE TABLE` description of the source
    pub schema: String,
    /// Free-text questions proposed by the model
    pub suggested_questions: String,
    /// Extension of the file (e.g. `.csv`) or remote kind
    pub file_type: String,
    /// Table read from a multi-table source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

/// A natural-language question over one or more datasets
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    /// Registered dataset identifiers, comma-separated
    #[serde(default)]
    pub dataset_name: Option<String>,
    /// The question
    pub query: String,
    /// Locators to (re-)ingest before answering, comma-separated
    #[serde(default)]
    pub file_path: Option<String>,
    /// Table or sheet to read from multi-table locators
    #[serde(default)]
    pub table: Option<String>,
}

impl QueryRequest {
    /// Ask `question` about already registered datasets
    pub fn for_datasets<I, S>(names: I, question: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|s| s.as_ref().to_string()).collect();
        Self {
            dataset_name: Some(names.join(",")).filter(|s| !s.is_empty()),
            query: question.to_string(),
            ..Self::default()
        }
    }

    /// Ask `question` about the data behind `locators`, ingesting them first
    pub fn for_locators<I, S>(locators: I, question: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let locators: Vec<String> = locators
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        Self {
            file_path: Some(locators.join(",")).filter(|s| !s.is_empty()),
            query: question.to_string(),
            ..Self::default()
        }
    }
}

/// Split a comma-joined list, dropping blanks
pub fn split_list(joined: Option<&str>) -> Vec<String> {
    joined
        .unwrap_or("")
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// The query service: registry, gateway and the stages that connect them
pub struct QueryBot {
    registry: Arc<DatasetRegistry>,
    gateway: Arc<dyn LlmGateway>,
    sample_rows: usize,
    samples_in_query_prompt: bool,
}

impl QueryBot {
    pub fn new(registry: Arc<DatasetRegistry>, gateway: Arc<dyn LlmGateway>) -> Self {
        Self {
            registry,
            gateway,
            sample_rows: DEFAULT_SAMPLE_ROWS,
            samples_in_query_prompt: false,
        }
    }

    /// Number of sample rows collected at ingestion
    pub fn with_sample_rows(mut self, sample_rows: usize) -> Self {
        self.sample_rows = sample_rows;
        self
    }

    /// Also show sample rows to the model when asking for SQL
    pub fn with_samples_in_query_prompt(mut self, enabled: bool) -> Self {
        self.samples_in_query_prompt = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<DatasetRegistry> {
        &self.registry
    }

    /// Ingest one locator: describe it, ask for suggested questions and register it.
    ///
    /// Nothing is registered unless every step succeeds.
    pub async fn ingest(&self, locator: &str, table: Option<String>) -> Result<IngestedDataset> {
        let source = DataSource::parse(locator)?.with_table(table);
        info!("Ingesting {} as {}", source.locator, source.kind);

        let introspection = introspect_with_sample(&source, self.sample_rows)?;
        let loaded = load(&source)?;

        let block = SchemaBlock::new(&introspection.name, &introspection.schema)
            .with_sample(introspection.sample.clone());
        let envelope = prompt::build_suggestions(SYSTEM_PROMPT, &block);
        let suggested_questions = self.gateway.complete(&envelope).await?;

        self.register_loaded(loaded)?;

        Ok(IngestedDataset {
            dataset_name: introspection.name,
            schema: introspection.schema,
            suggested_questions,
            file_type: source.file_type(),
            table: introspection.table,
        })
    }

    /// Ingest every locator of a comma-joined list, in order
    pub async fn ingest_all(
        &self,
        locators: &str,
        table: Option<String>,
    ) -> Result<Vec<IngestedDataset>> {
        let locators = split_list(Some(locators));
        if locators.is_empty() {
            return Err(QueryBotError::InvalidRequest(
                "no data source locator given".to_string(),
            ));
        }

        let mut ingested = Vec::with_capacity(locators.len());
        for locator in &locators {
            ingested.push(self.ingest(locator, table.clone()).await?);
        }
        Ok(ingested)
    }

    /// Load a locator and register it without asking the model anything
    pub fn register(&self, locator: &str, table: Option<String>) -> Result<Dataset> {
        let source = DataSource::parse(locator)?.with_table(table);
        self.register_source(&source)
    }

    fn register_source(&self, source: &DataSource) -> Result<Dataset> {
        self.register_loaded(load(source)?)
    }

    fn register_loaded(&self, loaded: LoadedSource) -> Result<Dataset> {
        self.registry.register(&loaded.identifier, loaded.frame)?;
        self.registry.get(&loaded.identifier)
    }

    /// Datasets a request refers to, ingesting its locators first
    fn resolve_datasets(&self, request: &QueryRequest) -> Result<Vec<Dataset>> {
        let mut datasets: Vec<Dataset> = Vec::new();

        for locator in split_list(request.file_path.as_deref()) {
            let source = DataSource::parse(&locator)?.with_table(request.table.clone());
            let dataset = self.register_source(&source)?;
            if !datasets.iter().any(|d| d.name.eq_ignore_ascii_case(&dataset.name)) {
                datasets.push(dataset);
            }
        }

        for name in split_list(request.dataset_name.as_deref()) {
            if datasets.iter().any(|d| d.name.eq_ignore_ascii_case(&name)) {
                continue;
            }
            datasets.push(self.registry.get(&name)?);
        }

        if datasets.is_empty() {
            datasets = self.registry.datasets()?;
        }
        if datasets.is_empty() {
            return Err(QueryBotError::NotFound(
                "no datasets are registered; upload data first".to_string(),
            ));
        }
        Ok(datasets)
    }

    /// Answer a natural-language question with SQL and its result
    pub async fn ask(&self, request: &QueryRequest) -> Result<QueryResult> {
        let question = request.query.trim();
        if question.is_empty() {
            return Err(QueryBotError::InvalidRequest(
                "the query must not be empty".to_string(),
            ));
        }

        let datasets = self.resolve_datasets(request)?;
        let blocks: Vec<SchemaBlock> = datasets
            .iter()
            .map(|dataset| {
                let block = SchemaBlock::from(dataset);
                if self.samples_in_query_prompt {
                    block.with_sample(dataset.sample.clone())
                } else {
                    block
                }
            })
            .collect();

        let envelope = prompt::build(SYSTEM_PROMPT, &blocks, question);
        info!(
            "Asking the model about {} dataset(s), prompt is {} chars",
            blocks.len(),
            envelope.user.len()
        );

        let llm_response = self.gateway.complete(&envelope).await?;
        let sql = extract_sql(&llm_response)?;
        let rows = execute(&self.registry, &sql)?;

        Ok(QueryResult {
            result: rows.into_records(),
            generated_query: sql,
            llm_response,
        })
    }
}
