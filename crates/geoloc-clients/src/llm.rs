use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use geoloc_core::collaborators::{exception_sentinel, NO_VALID_RESPONSE};
use geoloc_core::{ChatMessage, GeolocError, TextGenerator};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEEPSEEK_MODEL: &str = "deepseek-chat";
pub const QWEN_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const QWEN_MODEL: &str = "qwen2.5-72b-instruct";

/// Configuration for an OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatClientConfig {
    /// Provider name for logs and failure records
    pub provider_name: String,
    /// Base URL, without the trailing `/chat/completions`
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self::deepseek()
    }
}

impl ChatClientConfig {
    pub fn deepseek() -> Self {
        Self {
            provider_name: "deepseek".to_string(),
            base_url: DEEPSEEK_BASE_URL.to_string(),
            model: DEEPSEEK_MODEL.to_string(),
            api_key_env: Some("DEEPSEEK_API_KEY".to_string()),
            temperature: Some(0.7),
            top_p: None,
            timeout_secs: 60,
        }
    }

    /// Qwen through DashScope's OpenAI-compatible mode
    pub fn qwen() -> Self {
        Self {
            provider_name: "qwen".to_string(),
            base_url: QWEN_BASE_URL.to_string(),
            model: QWEN_MODEL.to_string(),
            api_key_env: Some("DASHSCOPE_API_KEY".to_string()),
            temperature: Some(0.7),
            top_p: Some(0.8),
            timeout_secs: 60,
        }
    }

    pub fn custom(base_url: String, model: String, provider_name: String) -> Self {
        Self {
            provider_name,
            base_url,
            model,
            api_key_env: None,
            temperature: Some(0.7),
            top_p: None,
            timeout_secs: 60,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionsResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionsResponse {
    /// Content of the first choice, if it has any text.
    pub fn reply(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Chat client over the OpenAI chat-completions wire shape
pub struct ChatCompletionsClient {
    config: ChatClientConfig,
    api_key: Option<String>,
    client: Client,
}

impl ChatCompletionsClient {
    /// Builds the client, reading the API key from `config.api_key_env`.
    pub fn new(config: ChatClientConfig) -> Result<Self> {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                provider = %config.provider_name,
                env = ?config.api_key_env,
                "no API key found, requests are sent unauthenticated"
            );
        }
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: ChatClientConfig, api_key: Option<String>) -> Result<Self> {
        let client = crate::http_client(config.timeout_secs)?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    /// One chat-completions round trip. `Ok(None)` when the backend answered
    /// without usable content.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<Option<String>> {
        let request = ChatCompletionsRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            stream: false,
        };

        let mut request_builder = self.client.post(self.config.endpoint()).json(&request);
        if let Some(api_key) = &self.api_key {
            request_builder = request_builder.bearer_auth(api_key);
        }

        let response = request_builder.send().await.context(format!(
            "Failed to send request to {} at {}",
            self.config.provider_name, self.config.base_url
        ))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "{} API error ({}): {}",
                self.config.provider_name,
                status,
                error_text
            ));
        }

        let body: ChatCompletionsResponse = response.json().await.context(format!(
            "Failed to parse {} chat completions response",
            self.config.provider_name
        ))?;

        Ok(body.reply().map(str::to_string))
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsClient {
    /// Never fails: transport and API errors come back as sentinel replies.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, GeolocError> {
        match self.complete(messages).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => {
                tracing::warn!(provider = %self.config.provider_name, "empty completion");
                Ok(NO_VALID_RESPONSE.to_string())
            }
            Err(err) => {
                tracing::warn!(provider = %self.config.provider_name, error = %format!("{:#}", err), "completion failed");
                Ok(exception_sentinel(format!("{:#}", err)))
            }
        }
    }

    fn name(&self) -> &str {
        &self.config.provider_name
    }
}
