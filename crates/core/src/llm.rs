use crate::error::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// A system instruction plus the user's question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ModelError>;
}

/// Sampling temperature used unless overridden.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// OpenAI-compatible chat completions client; Groq is the default provider.
pub struct ChatCompletionModel {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: String,
    temperature: f32,
}

impl ChatCompletionModel {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ModelError::InvalidRequest(
                "missing language model API key".to_string(),
            ));
        }
        let endpoint = Url::parse(&format!(
            "{}/chat/completions",
            base_url.trim_end_matches('/')
        ))?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            model: model.into(),
            api_key,
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for ChatCompletionModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ModelError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ModelError::BackendResponse {
                provider: self.model.clone(),
                details: format!("{status}: {text}"),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| ModelError::EmptyResponse(self.model.clone()))
    }
}
