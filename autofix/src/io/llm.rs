//! Text-generation client.
//!
//! [`TextGenerator`] is the seam the scaffolder and the model-backed strategy
//! call through; [`AnthropicClient`] implements it over the Messages API with
//! a blocking HTTP client. There is no retry: a failed request fails the
//! attempt that made it.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::FixError;
use crate::io::config::ModelConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ERROR_BODY_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One generation call: system instruction, ordered turns, model, output bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system: String,
    pub turns: Vec<Turn>,
    pub model: String,
    pub max_tokens: u32,
}

pub trait TextGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [Turn],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API client.
#[derive(Debug)]
pub struct AnthropicClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
}

impl AnthropicClient {
    /// Build a client with the key from the environment variable named in
    /// `cfg`. Fails with [`FixError::Config`] when it is unset or empty; no
    /// request is made.
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        Self::from_config_with(cfg, |name| std::env::var(name).ok())
    }

    pub fn from_config_with(
        cfg: &ModelConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_key = lookup(&cfg.api_key_env)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                FixError::config(format!(
                    "environment variable {} is not set (required for model calls)",
                    cfg.api_key_env
                ))
            })?;
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/messages", cfg.provider_url.trim_end_matches('/')),
            api_key,
        })
    }
}

impl TextGenerator for AnthropicClient {
    #[instrument(skip_all, fields(model = %request.model, max_tokens = request.max_tokens))]
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = MessagesBody {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: &request.turns,
        };
        debug!(turns = request.turns.len(), "sending generation request");
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        let text = response.text().context("read model response body")?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "model request failed");
            return Err(anyhow!(
                "model request failed with HTTP {}: {}",
                status.as_u16(),
                truncate_text(&text, ERROR_BODY_PREVIEW_CHARS)
            ));
        }
        extract_text(&text)
    }
}

/// Concatenate the text blocks of a Messages API response.
fn extract_text(body: &str) -> Result<String> {
    let parsed: MessagesResponse =
        serde_json::from_str(body).context("decode model response json")?;
    let text: String = parsed
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect();
    if parsed.stop_reason.as_deref() == Some("max_tokens") {
        warn!("model response hit max_tokens and may be cut off");
    }
    if text.is_empty() {
        return Err(anyhow!("model response contained no text blocks"));
    }
    Ok(text)
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_a_config_error() {
        let err = AnthropicClient::from_config_with(&ModelConfig::default(), |_| None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FixError>(),
            Some(FixError::Config { .. })
        ));
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let result = AnthropicClient::from_config_with(&ModelConfig::default(), |_| {
            Some("  ".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn endpoint_joins_provider_url() {
        let cfg = ModelConfig {
            provider_url: "http://localhost:9999/v1/".to_string(),
            ..ModelConfig::default()
        };
        let client =
            AnthropicClient::from_config_with(&cfg, |_| Some("key".to_string())).expect("client");
        assert_eq!(client.endpoint, "http://localhost:9999/v1/messages");
    }

    #[test]
    fn extracts_text_blocks_in_order() {
        let body = r#"{"content":[{"type":"text","text":"=== FILE: a.js ===\n"},{"type":"text","text":"x\n=== END ===\n"}],"stop_reason":"end_turn"}"#;
        assert_eq!(
            extract_text(body).expect("text"),
            "=== FILE: a.js ===\nx\n=== END ===\n"
        );
    }

    #[test]
    fn response_without_text_is_an_error() {
        assert!(extract_text(r#"{"content":[]}"#).is_err());
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abcdef", 3), "abc...");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
