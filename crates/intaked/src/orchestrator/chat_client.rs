//! HTTP chat client for the reasoning oracle.
//!
//! Speaks either the Ollama `/api/chat` protocol or an OpenAI-compatible
//! `/v1/chat/completions` endpoint. Both are asked for JSON output; the reply
//! is parsed with `parse_proposal` and token usage is read from the response.

use super::oracle::{parse_proposal, OracleError, OracleReply, OracleRequest, ReasoningOracle, TokenUsage};
use super::prompts::{render_user_prompt, SYSTEM_PROMPT};
use async_trait::async_trait;
use intake_common::config::{OracleBackend, OracleConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Reasoning oracle backed by a chat completion endpoint
pub struct ChatOracle {
    http_client: reqwest::Client,
    backend: OracleBackend,
    url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl ChatOracle {
    /// Build from config. The API key, if any, is read from the configured environment variable.
    pub fn from_config(config: &OracleConfig) -> Result<Self, OracleError> {
        if config.backend == OracleBackend::Disabled {
            return Err(OracleError::Unavailable("oracle backend is disabled".to_string()));
        }
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if config.backend == OracleBackend::Openai && api_key.is_none() {
            return Err(OracleError::Unavailable(format!(
                "${} is not set",
                config.api_key_env
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            backend: config.backend,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    fn messages(request: &OracleRequest) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system".to_string(),
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: render_user_prompt(request),
            },
        ]
    }

    async fn call_ollama(&self, request: &OracleRequest) -> Result<(String, TokenUsage), OracleError> {
        let body = OllamaChatRequest {
            model: &self.model,
            messages: Self::messages(request),
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };
        let response = self
            .http_client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        let response = check_status(response).await?;

        let chat: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::schema(format!("unreadable Ollama response: {}", e), TokenUsage::default()))?;
        let usage = TokenUsage {
            prompt_tokens: chat.prompt_eval_count.unwrap_or(0),
            completion_tokens: chat.eval_count.unwrap_or(0),
        };
        Ok((chat.message.content, usage))
    }

    async fn call_openai(&self, request: &OracleRequest) -> Result<(String, TokenUsage), OracleError> {
        let body = OpenAiChatRequest {
            model: &self.model,
            messages: Self::messages(request),
            temperature: self.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };
        let mut builder = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = check_status(builder.send().await.map_err(map_transport)?).await?;

        let chat: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::schema(format!("unreadable completion response: {}", e), TokenUsage::default()))?;
        let usage = chat
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OracleError::schema("completion has no choices", usage))?;
        Ok((content, usage))
    }
}

#[async_trait]
impl ReasoningOracle for ChatOracle {
    async fn propose(&self, request: &OracleRequest) -> Result<OracleReply, OracleError> {
        let focus = request.focus.as_deref().unwrap_or("narrative");
        info!(
            "[>]  ORACLE CALL [{}] focus={} steps={}",
            self.model,
            focus,
            request.trace.len()
        );
        let start = std::time::Instant::now();

        let (content, usage) = match self.backend {
            OracleBackend::Ollama => self.call_ollama(request).await?,
            OracleBackend::Openai => self.call_openai(request).await?,
            OracleBackend::Disabled => {
                return Err(OracleError::Unavailable("oracle backend is disabled".to_string()))
            }
        };

        info!(
            "[<]  ORACLE RESPONSE ({} chars, {} tokens) in {:.2}s",
            content.len(),
            usage.total(),
            start.elapsed().as_secs_f64()
        );
        debug!("oracle raw reply: {}", content.chars().take(1000).collect::<String>());

        let proposal =
            parse_proposal(&content).map_err(|reason| OracleError::schema(reason, usage))?;
        Ok(OracleReply { proposal, usage })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn map_transport(e: reqwest::Error) -> OracleError {
    if e.is_timeout() {
        OracleError::Timeout
    } else if e.is_connect() {
        OracleError::Connection(e.to_string())
    } else {
        OracleError::Connection(format!("request failed: {}", e))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, OracleError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!("[-]  Oracle error {}: {}", status, body);
    Err(OracleError::Http {
        status: status.as_u16(),
        body,
    })
}
