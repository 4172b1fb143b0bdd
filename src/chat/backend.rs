use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::transcript::Turn;
use crate::config::Config;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Together,
    OpenAi,
}

impl ProviderKind {
    pub fn from_env() -> Self {
        Self::parse(&std::env::var("CHAT_PROVIDER").unwrap_or_else(|_| "together".to_string()))
    }

    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "openai" => ProviderKind::OpenAi,
            _ => ProviderKind::Together,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Together => "together",
            ProviderKind::OpenAi => "openai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Together => "deepseek-ai/DeepSeek-V3",
            ProviderKind::OpenAi => "gpt-4o-mini",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Together => "https://api.together.xyz/v1",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
        }
    }

    /// Provider-specific credential variables, checked in order.
    pub fn api_key_from_env(&self) -> Option<String> {
        let names: &[&str] = match self {
            ProviderKind::Together => &["TOGETHER_API_KEY", "together_api_key"],
            ProviderKind::OpenAi => &["OPENAI_API_KEY"],
        };
        names.iter().find_map(|n| std::env::var(n).ok())
    }

    pub fn build(self, cfg: &Config) -> Box<dyn ChatBackend> {
        Box::new(CompletionClient::new(self, cfg))
    }
}

/// Anything that can turn a message list into one assistant reply.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, messages: &[Turn]) -> Result<String>;
}

#[derive(Serialize, Debug)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize, Debug)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize, Debug)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize, Debug)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct CompletionClient {
    client: Client,
    provider: ProviderKind,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl CompletionClient {
    pub fn new(provider: ProviderKind, cfg: &Config) -> Self {
        Self {
            client: Client::new(),
            provider,
            base_url: cfg.chat_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.chat_api_key.clone(),
            model: cfg.chat_model.clone(),
            max_tokens: Some(cfg.chat_max_tokens),
            temperature: Some(cfg.chat_temperature),
        }
    }
}

#[async_trait]
impl ChatBackend for CompletionClient {
    fn name(&self) -> &str {
        self.provider.as_str()
    }

    async fn complete(&self, messages: &[Turn]) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("no API key configured for {}", self.provider.as_str()))?;
        let url = format!("{}/chat/completions", self.base_url);
        let body = CompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            bail!("{} returned {}: {}", self.provider.as_str(), status, detail);
        }

        let parsed: CompletionResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("completion response had no message content"))
    }
}
