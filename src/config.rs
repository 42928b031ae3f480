//! Runtime configuration
//!
//! Values come from the process environment (optionally seeded from a
//! `.env` file). The LLM settings can be replaced at runtime, so they are
//! read on every completion call rather than captured at startup.

use std::env;
use std::time::Duration;

use tracing::{debug, warn};

/// Environment variable holding the bearer token for the LLM endpoint
pub const TOKEN_VAR: &str = "LLM_API_TOKEN";
/// Environment variable holding the LLM API base URL
pub const API_BASE_VAR: &str = "LLM_API_BASE";
/// Environment variable holding the model identifier
pub const MODEL_VAR: &str = "LLM_MODEL";

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Upper bound on a single completion call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for the chat-completions endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Bearer token; `None` until configured
    pub token: Option<String>,
    /// Base URL, without the `/chat/completions` suffix
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl GatewaySettings {
    /// Read settings from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let settings = Self {
            token: non_empty_var(TOKEN_VAR),
            api_base: non_empty_var(API_BASE_VAR).unwrap_or(defaults.api_base),
            model: non_empty_var(MODEL_VAR).unwrap_or(defaults.model),
            timeout: defaults.timeout,
        };
        if settings.token.is_none() {
            warn!("{} is not set; LLM calls will fail until it is configured", TOKEN_VAR);
        }
        settings
    }

    /// Full URL of the chat-completions endpoint
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load a `.env` file from the working directory or its parents, if any
pub fn load_env_file() {
    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Ignoring unreadable .env file: {}", e),
    }
}
