//! LLM gateway
//!
//! Sends one system message and one user message to an OpenAI-compatible
//! chat-completions endpoint and returns the text of the first choice.
//!
//! - One attempt per call, bounded by the configured timeout (30 s by
//!   default). Nothing is retried; the caller decides.
//! - Non-2xx responses and bodies without `choices[0].message.content`
//!   are [`QueryBotError::GatewayError`].
//! - A missing token is a [`QueryBotError::ConfigError`] and no request is
//!   sent.

use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::GatewaySettings;
use crate::prompt::PromptEnvelope;
use crate::{QueryBotError, Result};

/// A text-completion backend
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Complete the prompt and return the raw response text
    async fn complete(&self, prompt: &PromptEnvelope) -> Result<String>;
}

/// Gateway for OpenAI-compatible `/chat/completions` endpoints
pub struct ChatCompletionsGateway {
    client: reqwest::Client,
    settings: RwLock<GatewaySettings>,
}

impl ChatCompletionsGateway {
    pub fn new(settings: GatewaySettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings: RwLock::new(settings),
        }
    }

    /// Gateway configured from the process environment
    pub fn from_env() -> Self {
        Self::new(GatewaySettings::from_env())
    }

    /// Snapshot of the current settings
    pub fn settings(&self) -> Result<GatewaySettings> {
        self.settings
            .read()
            .map(|s| s.clone())
            .map_err(|e| QueryBotError::InternalError(format!("Settings unavailable: {}", e)))
    }

    /// Replace the token and/or API base used by subsequent calls
    pub fn update(&self, token: Option<String>, api_base: Option<String>) -> Result<()> {
        let mut settings = self
            .settings
            .write()
            .map_err(|e| QueryBotError::InternalError(format!("Settings unavailable: {}", e)))?;
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            settings.token = Some(token.trim().to_string());
        }
        if let Some(base) = api_base.filter(|b| !b.trim().is_empty()) {
            settings.api_base = base.trim().to_string();
        }
        info!("LLM settings updated (api base: {})", settings.api_base);
        Ok(())
    }
}

/// Pull `choices[0].message.content` out of a completion response
pub fn parse_completion(body: &Value) -> Result<String> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            QueryBotError::GatewayError(
                "response has no choices[0].message.content".to_string(),
            )
        })
}

#[async_trait]
impl LlmGateway for ChatCompletionsGateway {
    async fn complete(&self, prompt: &PromptEnvelope) -> Result<String> {
        let settings = self.settings()?;
        let token = settings.token.clone().ok_or_else(|| {
            QueryBotError::ConfigError(format!(
                "{} is not set; configure the LLM credential first",
                crate::config::TOKEN_VAR
            ))
        })?;

        let payload = json!({
            "model": settings.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
        });

        let started = Instant::now();
        let response = self
            .client
            .post(settings.completions_url())
            .bearer_auth(token)
            .timeout(settings.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| QueryBotError::GatewayError(format!("request failed: {}", e)))?;

        let status = response.status();
        info!(
            "LLM call to {} ({}) returned {} in {:?}",
            settings.completions_url(),
            settings.model,
            status,
            started.elapsed()
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            warn!("LLM endpoint rejected the request: {}", snippet);
            return Err(QueryBotError::GatewayError(format!(
                "HTTP {}: {}",
                status, snippet
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| QueryBotError::GatewayError(format!("invalid JSON response: {}", e)))?;
        parse_completion(&body)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn envelope() -> PromptEnvelope {
        PromptEnvelope {
            system: "SYS".to_string(),
            user: "USER".to_string(),
        }
    }

    /// Serve a single canned HTTP response; returns the API base and the captured request
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{}/v1", addr), handle)
    }

    fn gateway_for(api_base: String) -> ChatCompletionsGateway {
        ChatCompletionsGateway::new(GatewaySettings {
            token: Some("secret-token".to_string()),
            api_base,
            ..GatewaySettings::default()
        })
    }

    #[test]
    fn test_parse_completion() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]});
        assert_eq!(parse_completion(&body).unwrap(), "hello");

        for bad in [
            json!({}),
            json!({"choices": []}),
            json!({"choices": [{"message": {}}]}),
            json!({"choices": [{"message": {"content": 42}}]}),
        ] {
            assert!(matches!(
                parse_completion(&bad).unwrap_err(),
                QueryBotError::GatewayError(_)
            ));
        }
    }

    #[tokio::test]
    async fn test_missing_token_is_config_error() {
        let gateway = ChatCompletionsGateway::new(GatewaySettings::default());
        let err = gateway.complete(&envelope()).await.unwrap_err();
        assert!(matches!(err, QueryBotError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_complete_success_sends_request_shape() {
        let (base, handle) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"choices":[{"message":{"content":"```sql\nSELECT 1;\n```"}}]}"#,
        )
        .await;
        let gateway = gateway_for(base);

        let text = gateway.complete(&envelope()).await.unwrap();
        assert_eq!(text, "```sql\nSELECT 1;\n```");

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.to_lowercase().contains("authorization: bearer secret-token"));
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let payload: Value = serde_json::from_str(body).unwrap();
        assert_eq!(payload["model"], "gpt-4o-mini");
        assert_eq!(payload["messages"][0], json!({"role": "system", "content": "SYS"}));
        assert_eq!(payload["messages"][1], json!({"role": "user", "content": "USER"}));
    }

    #[tokio::test]
    async fn test_complete_non_success_status() {
        let (base, _handle) =
            serve_once("HTTP/1.1 401 Unauthorized", r#"{"error":"bad token"}"#).await;
        let err = gateway_for(base).complete(&envelope()).await.unwrap_err();
        match err {
            QueryBotError::GatewayError(msg) => {
                assert!(msg.contains("401"));
                assert!(msg.contains("bad token"));
            }
            other => panic!("expected GatewayError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_malformed_shape() {
        let (base, _handle) = serve_once("HTTP/1.1 200 OK", r#"{"data": []}"#).await;
        let err = gateway_for(base).complete(&envelope()).await.unwrap_err();
        assert!(matches!(err, QueryBotError::GatewayError(_)));
    }

    #[test]
    fn test_update_settings() {
        let gateway = ChatCompletionsGateway::new(GatewaySettings::default());
        gateway
            .update(Some(" key ".to_string()), Some("http://localhost:9/v1".to_string()))
            .unwrap();
        let settings = gateway.settings().unwrap();
        assert_eq!(settings.token.as_deref(), Some("key"));
        assert_eq!(settings.api_base, "http://localhost:9/v1");

        // Blank values leave settings untouched
        gateway.update(Some("".to_string()), None).unwrap();
        assert_eq!(gateway.settings().unwrap().token.as_deref(), Some("key"));
    }
}
