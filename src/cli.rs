/*!
querybot Command Line Interface

Describes data sources, asks questions about them and extracts SQL from
saved LLM responses.
*/

use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use querybot::config::load_env_file;
use querybot::extract::extract_sql;
use querybot::introspect::introspect_with_sample;
use querybot::{
    ChatCompletionsGateway, DataSource, DatasetRegistry, QueryBot, QueryRequest,
    DEFAULT_SAMPLE_ROWS, VERSION,
};

#[derive(Parser)]
#[command(name = "querybot")]
#[command(about = "Ask questions about tabular data in plain language")]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the schema and sample rows of a data source
    Schema {
        /// File path or connection string
        locator: String,

        /// Table or sheet to read from multi-table sources
        #[arg(long)]
        table: Option<String>,

        /// Number of sample rows to show
        #[arg(long, default_value_t = DEFAULT_SAMPLE_ROWS)]
        sample_rows: usize,
    },

    /// Answer a question with SQL over one or more data sources
    Ask {
        /// The question, in plain language
        question: String,

        /// Data source(s) to ingest before asking
        #[arg(long = "data", required = true)]
        data: Vec<String>,

        /// Table or sheet to read from multi-table sources
        #[arg(long)]
        table: Option<String>,
    },

    /// Print the SQL block of a saved LLM response (`-` reads stdin)
    Extract {
        /// File holding the response text
        file: PathBuf,
    },
}

/// Log filter used when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "querybot=warn";

/// Subscriber writing formatted events to `writer`
fn log_subscriber<W>(filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
}

fn read_input(file: &Path) -> anyhow::Result<String> {
    if file.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        std::fs::read_to_string(file)
            .map_err(|e| anyhow::anyhow!("Failed to read file {}: {}", file.display(), e))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays clean for piping
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    log_subscriber(filter, std::io::stderr).init();

    load_env_file();
    let cli = Cli::parse();

    match cli.command {
        Commands::Schema {
            locator,
            table,
            sample_rows,
        } => {
            let source = DataSource::parse(&locator)?.with_table(table);
            let introspection = introspect_with_sample(&source, sample_rows)?;

            println!("Dataset: {}", introspection.name);
            if let Some(table) = &introspection.table {
                println!("Table: {}", table);
            }
            println!("Type: {}", source.file_type());
            println!("\n{}", introspection.schema);
            println!("\nSample data (first {} rows):", introspection.sample.len());
            for row in &introspection.sample {
                println!("{}", serde_json::Value::Array(row.clone()));
            }
        }

        Commands::Ask {
            question,
            data,
            table,
        } => {
            let registry = Arc::new(DatasetRegistry::in_memory()?);
            let gateway = Arc::new(ChatCompletionsGateway::from_env());
            let bot = QueryBot::new(registry, gateway);

            let mut request = QueryRequest::for_locators(&data, &question);
            request.table = table;
            let answer = bot.ask(&request).await?;

            println!("SQL:\n{}", answer.generated_query);
            println!(
                "\nResult ({} rows):\n{}",
                answer.result.len(),
                serde_json::to_string_pretty(&answer.result)?
            );
            println!("\nExplanation:\n{}", answer.llm_response);
        }

        Commands::Extract { file } => {
            let text = read_input(&file)?;
            println!("{}", extract_sql(&text)?);
        }
    }

    Ok(())
}
