/*!
querybot REST API Server

Ingests tabular data and answers natural-language questions about it with
generated SQL.

## Usage

```bash
LLM_API_TOKEN=... querybot-rest --host 127.0.0.1 --port 8020 --load-data data/sales.csv
```

## Endpoints

- `POST /upload` - Ingest comma-joined locators (`{file_path, table?}`)
- `POST /upload_csv` - Ingest uploaded files (multipart, `files` parts)
- `POST /query` - Answer a question (`{dataset_name?, query, file_path?, table?}`)
- `GET /download/{name}` - Registered table as CSV
- `GET /datasets` - Registered datasets and their schema
- `POST /settings` - Replace the LLM token and API base (`{key?, base?}`)
- `GET /health` - Health check
*/

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use querybot::config::load_env_file;
use querybot::{
    ChatCompletionsGateway, DatasetRegistry, IngestedDataset, QueryBot, QueryBotError,
    QueryRequest, QueryResult, VERSION,
};

/// Largest accepted multipart upload
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// CLI arguments for the REST API server
#[derive(Parser)]
#[command(name = "querybot-rest")]
#[command(about = "querybot REST API Server")]
#[command(version = VERSION)]
struct Cli {
    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port number to bind to
    #[arg(long, env = "PORT", default_value = "8020")]
    port: u16,

    /// CORS allowed origins (comma-separated)
    #[arg(long, default_value = "*")]
    cors_origin: String,

    /// Directory receiving multipart uploads (default: system temp dir)
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Serve static files (e.g. a web UI) from this directory
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Ingest data source(s) at startup
    /// Example: --load-data sales.csv --load-data shop.duckdb
    #[arg(long = "load-data")]
    load_data: Vec<String>,

    /// Sample rows collected per dataset
    #[arg(long, default_value = "5")]
    sample_rows: usize,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    bot: Arc<QueryBot>,
    /// Gateway whose settings `/settings` replaces
    settings: Arc<ChatCompletionsGateway>,
    upload_dir: PathBuf,
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for /upload
#[derive(Debug, Deserialize)]
struct UploadRequest {
    /// Comma-joined data source locators
    file_path: String,
    #[serde(default)]
    table: Option<String>,
}

/// Request body for /settings
#[derive(Debug, Deserialize)]
struct SettingsRequest {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    base: Option<String>,
}

#[derive(Debug, Serialize)]
struct SettingsResponse {
    status: String,
    api_base: String,
    model: String,
    token_configured: bool,
}

/// Ingestion response: `{"uploaded_datasets": [...]}`
#[derive(Debug, Serialize)]
struct UploadResponse {
    uploaded_datasets: Vec<IngestedDataset>,
}

#[derive(Debug, Serialize)]
struct DatasetSummary {
    dataset_name: String,
    schema: String,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    datasets: usize,
}

// ============================================================================
// Error Handling
// ============================================================================

/// Error payload: `{"error": ..., "type": ...}`
#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
    #[serde(rename = "type")]
    error_type: String,
}

struct ApiErrorResponse {
    status: StatusCode,
    error: ApiError,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

impl From<QueryBotError> for ApiErrorResponse {
    fn from(err: QueryBotError) -> Self {
        let status = match &err {
            QueryBotError::UnsupportedFormat(_)
            | QueryBotError::ConnectionFailure(_)
            | QueryBotError::EmptySource(_)
            | QueryBotError::ReadFailure(_)
            | QueryBotError::InvalidIdentifier(_)
            | QueryBotError::InvalidRequest(_)
            | QueryBotError::ExtractionFailure(_)
            | QueryBotError::ExecutionFailure(_) => StatusCode::BAD_REQUEST,
            QueryBotError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryBotError::GatewayError(_) => StatusCode::BAD_GATEWAY,
            QueryBotError::ConfigError(_)
            | QueryBotError::IoError(_)
            | QueryBotError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            warn!("{}", err);
        }

        ApiErrorResponse {
            status,
            error: ApiError {
                error: err.to_string(),
                error_type: err.kind().to_string(),
            },
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// File name of an uploaded part, stripped of any directory components
fn upload_file_name(raw: &str) -> Option<String> {
    Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty() && n != "." && n != "..")
}

async fn ingest_startup_data(bot: &QueryBot, locators: &[String]) -> anyhow::Result<()> {
    info!("Loading {} data source(s)", locators.len());
    for locator in locators {
        match bot.ingest(locator, None).await {
            Ok(dataset) => info!("Loaded {} as '{}'", locator, dataset.dataset_name),
            // Suggestions need the LLM; register the data without them
            Err(e @ (QueryBotError::ConfigError(_) | QueryBotError::GatewayError(_))) => {
                warn!("No suggested questions for {}: {}", locator, e);
                let dataset = bot.register(locator, None)?;
                info!("Loaded {} as '{}'", locator, dataset.name);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

// ============================================================================
// Handler Functions
// ============================================================================

/// POST /upload - Ingest data sources by locator
async fn upload_handler(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, ApiErrorResponse> {
    info!("Upload request for: {}", request.file_path);
    let uploaded_datasets = state.bot.ingest_all(&request.file_path, request.table).await?;
    Ok(Json(UploadResponse { uploaded_datasets }))
}

/// POST /upload_csv - Store uploaded files and ingest them
async fn upload_csv_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiErrorResponse> {
    let bad_part = |e: axum::extract::multipart::MultipartError| {
        QueryBotError::InvalidRequest(format!("Malformed multipart body: {}", e))
    };

    let mut stored: Vec<PathBuf> = Vec::new();
    let mut table: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_part)? {
        match field.name() {
            Some("table") => table = Some(field.text().await.map_err(bad_part)?),
            _ => {
                let Some(name) = field.file_name().and_then(upload_file_name) else {
                    continue;
                };
                let bytes = field.bytes().await.map_err(bad_part)?;
                tokio::fs::create_dir_all(&state.upload_dir)
                    .await
                    .map_err(QueryBotError::from)?;
                let target = state.upload_dir.join(&name);
                tokio::fs::write(&target, &bytes)
                    .await
                    .map_err(QueryBotError::from)?;
                info!("Stored upload {} ({} bytes)", target.display(), bytes.len());
                stored.push(target);
            }
        }
    }

    if stored.is_empty() {
        return Err(QueryBotError::InvalidRequest("no files were uploaded".to_string()).into());
    }

    let mut uploaded_datasets = Vec::with_capacity(stored.len());
    for path in &stored {
        uploaded_datasets.push(
            state
                .bot
                .ingest(&path.to_string_lossy(), table.clone())
                .await?,
        );
    }
    Ok(Json(UploadResponse { uploaded_datasets }))
}

/// POST /query - Answer a natural-language question
async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResult>, ApiErrorResponse> {
    info!("Query: {} chars", request.query.len());
    let result = state.bot.ask(&request).await?;
    info!("Query returned {} row(s)", result.result.len());
    Ok(Json(result))
}

/// GET /download/{name} - Registered table as CSV
async fn download_handler(
    State(state): State<AppState>,
    UrlPath(name): UrlPath<String>,
) -> Result<Response, ApiErrorResponse> {
    let csv = state.bot.registry().export_csv(&name)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.csv\"", name),
            ),
        ],
        csv,
    )
        .into_response())
}

/// GET /datasets - Registered datasets
async fn datasets_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<DatasetSummary>>, ApiErrorResponse> {
    let datasets = state.bot.registry().datasets()?;
    Ok(Json(
        datasets
            .into_iter()
            .map(|d| DatasetSummary {
                dataset_name: d.name,
                schema: d.schema,
            })
            .collect(),
    ))
}

/// POST /settings - Replace the LLM token and/or API base
async fn settings_handler(
    State(state): State<AppState>,
    Json(request): Json<SettingsRequest>,
) -> Result<Json<SettingsResponse>, ApiErrorResponse> {
    state.settings.update(request.key, request.base)?;
    let settings = state.settings.settings()?;
    Ok(Json(SettingsResponse {
        status: "ok".to_string(),
        api_base: settings.api_base,
        model: settings.model,
        token_configured: settings.token.is_some(),
    }))
}

/// GET /health - Health check
async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, ApiErrorResponse> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: VERSION.to_string(),
        datasets: state.bot.registry().list()?.len(),
    }))
}

/// Root handler when no static directory is served
async fn root_handler() -> &'static str {
    "querybot REST API Server - See /health for status"
}

fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let app = Router::new()
        .route("/upload", post(upload_handler))
        .route(
            "/upload_csv",
            post(upload_csv_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/query", post(query_handler))
        .route("/download/:name", get(download_handler))
        .route("/datasets", get(datasets_handler))
        .route("/settings", post(settings_handler))
        .route("/health", get(health_handler));

    let app = match static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app.route("/", get(root_handler)),
    };

    app.with_state(state)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env_file();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "querybot=info,querybot_rest=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    let registry = Arc::new(DatasetRegistry::in_memory()?.with_sample_rows(cli.sample_rows));
    let gateway = Arc::new(ChatCompletionsGateway::from_env());
    let bot = Arc::new(QueryBot::new(registry, gateway.clone()).with_sample_rows(cli.sample_rows));

    if !cli.load_data.is_empty() {
        ingest_startup_data(&bot, &cli.load_data).await?;
    } else {
        info!("Starting with an empty registry (no data pre-loaded)");
    }

    let upload_dir = cli
        .upload_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("querybot-uploads"));

    let state = AppState {
        bot,
        settings: gateway,
        upload_dir,
    };

    // Configure CORS
    let cors = if cli.cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    } else {
        let origins: Vec<_> = cli
            .cors_origin
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    };

    let app = build_router(state, cli.static_dir.as_deref())
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid host or port: {}", e))?;

    info!("Starting querybot REST API server on {}", addr);
    info!("API documentation:");
    info!("  POST /upload          - Ingest data sources by locator");
    info!("  POST /upload_csv      - Ingest uploaded files");
    info!("  POST /query           - Answer a question with SQL");
    info!("  GET  /download/{{name}} - Download a dataset as CSV");
    info!("  GET  /datasets        - List datasets");
    info!("  POST /settings        - Update LLM settings");
    info!("  GET  /health          - Health check");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
