//! Prompt construction
//!
//! Prompts are plain deterministic string templates. The same datasets and
//! question always produce byte-identical prompts; datasets appear in the
//! order they are given.
//!
//! There is no size limit on the rendered schemas: many or very wide
//! datasets make the prompt grow without bound.

use serde_json::Value as JsonValue;

use crate::registry::Dataset;

/// Instructions sent as the system message with every completion request
pub const SYSTEM_PROMPT: &str = "\
You are a helpful assistant. Your task is to analyze data from uploaded files. \
You will receive the schema for each dataset and a user query in natural language. \
If multiple datasets are available, observe the schemas of all of them. \
Join them only when necessary based on the user query, ensuring that all column names are used exactly as provided in the schema. \
Your goal is to convert the query into DuckDB SQL, paying close attention to the exact column names from the schema. \
Only perform joins if required by the query. \
Do not provide code templates or unnecessary explanations.

For the output, follow this structure:
1. Guess the objective of the user based on their query.
2. Describe the steps to achieve this objective in SQL.
3. Build the logic for the SQL query by identifying the necessary tables and relationships. Select the appropriate columns based on the user's question and the dataset.
4. Write SQL to answer the question. Use DuckDB syntax and put the query in a single ```sql fenced block.
5. Possible explanation of the query and results.";

/// One dataset as shown to the model
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaBlock {
    pub name: String,
    pub schema: String,
    /// Sample rows to include, if any. Rendered in full; the caller bounds it.
    pub sample: Option<Vec<Vec<JsonValue>>>,
}

impl SchemaBlock {
    pub fn new(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            sample: None,
        }
    }

    pub fn with_sample(mut self, sample: Vec<Vec<JsonValue>>) -> Self {
        self.sample = Some(sample);
        self
    }
}

impl From<&Dataset> for SchemaBlock {
    fn from(dataset: &Dataset) -> Self {
        SchemaBlock::new(&dataset.name, &dataset.schema)
    }
}

/// System instructions plus the rendered user message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptEnvelope {
    pub system: String,
    pub user: String,
}

impl PromptEnvelope {
    /// The whole prompt as one string
    pub fn render(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

fn render_sample(out: &mut String, sample: &[Vec<JsonValue>]) {
    out.push_str(&format!("Sample data (first {} rows):\n", sample.len()));
    for row in sample {
        out.push_str(&JsonValue::Array(row.clone()).to_string());
        out.push('\n');
    }
}

fn render_block(out: &mut String, block: &SchemaBlock) {
    out.push_str(&format!("Dataset name: {}\nSchema: {}\n", block.name, block.schema));
    if let Some(sample) = &block.sample {
        render_sample(out, sample);
    }
}

/// Build the prompt asking for a SQL query answering `question`
pub fn build(system_instructions: &str, blocks: &[SchemaBlock], question: &str) -> PromptEnvelope {
    let mut user = String::from("Here are the datasets available:\n");
    for block in blocks {
        render_block(&mut user, block);
        user.push('\n');
    }
    user.push_str("Please write an SQL query for the following question:\n");
    user.push_str(question);

    PromptEnvelope {
        system: system_instructions.to_string(),
        user,
    }
}

/// Build the prompt asking for five questions that SQL could answer on a dataset
pub fn build_suggestions(system_instructions: &str, block: &SchemaBlock) -> PromptEnvelope {
    let mut user = String::new();
    render_block(&mut user, block);
    user.push_str(
        "Please provide 5 suggested questions that can be answered using SQL queries on this dataset.",
    );

    PromptEnvelope {
        system: system_instructions.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_single_dataset() {
        let blocks = vec![SchemaBlock::new("people", "CREATE TABLE people (\n[id] INTEGER\n);")];
        let envelope = build("SYS", &blocks, "How many people?");

        assert_eq!(envelope.system, "SYS");
        assert_eq!(
            envelope.user,
            "Here are the datasets available:\n\
             Dataset name: people\n\
             Schema: CREATE TABLE people (\n[id] INTEGER\n);\n\
             \n\
             Please write an SQL query for the following question:\n\
             How many people?"
        );
    }

    #[test]
    fn test_build_keeps_dataset_order_and_is_deterministic() {
        let blocks = vec![
            SchemaBlock::new("zeta", "CREATE TABLE zeta (\n[a] TEXT\n);"),
            SchemaBlock::new("alpha", "CREATE TABLE alpha (\n[b] TEXT\n);"),
        ];
        let first = build(SYSTEM_PROMPT, &blocks, "q");
        let second = build(SYSTEM_PROMPT, &blocks, "q");
        assert_eq!(first, second);

        let zeta = first.user.find("Dataset name: zeta").unwrap();
        let alpha = first.user.find("Dataset name: alpha").unwrap();
        assert!(zeta < alpha);
    }

    #[test]
    fn test_sample_block_renders_every_given_row() {
        let sample: Vec<Vec<JsonValue>> = (0..10).map(|i| vec![json!(i), json!("x")]).collect();
        let blocks = vec![SchemaBlock::new("t", "CREATE TABLE t (\n[n] INTEGER\n);").with_sample(sample)];
        let envelope = build("SYS", &blocks, "q");

        assert!(envelope.user.contains("Sample data (first 10 rows):\n[0,\"x\"]\n"));
        assert!(envelope.user.contains("[9,\"x\"]\n"));
    }

    #[test]
    fn test_build_suggestions() {
        let block = SchemaBlock::new("t", "CREATE TABLE t (\n[n] INTEGER\n);")
            .with_sample(vec![vec![json!(1)]]);
        let envelope = build_suggestions(SYSTEM_PROMPT, &block);
        assert!(envelope.user.starts_with("Dataset name: t\nSchema: "));
        assert!(envelope.user.contains("Sample data (first 1 rows):\n[1]\n"));
        assert!(envelope.user.ends_with("on this dataset."));
    }

    #[test]
    fn test_system_prompt_requests_fenced_sql() {
        assert!(SYSTEM_PROMPT.contains("```sql"));
        let envelope = build(SYSTEM_PROMPT, &[], "q");
        assert!(envelope.render().starts_with(SYSTEM_PROMPT));
        assert!(envelope.render().ends_with("question:\nq"));
    }
}
