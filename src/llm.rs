//! Language-model providers
//!
//! [`LanguageModel`] is the only thing the agent knows about a model. One
//! type per hosted API implements it, and [`from_config`] picks one at
//! startup. There is no retry here: a failed completion fails the question.

use crate::config::{ModelConfig, ProviderKind};
use crate::error::ModelError;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_BASE_URL: &str = "https://api.openai.com";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Completions for NL2SQL prompts can take a while on large schemas
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest provider error body kept in a [`ModelError::Status`]
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub text: String,

    /// Model identifier that answered
    pub model: String,

    pub usage: Option<TokenUsage>,
}

/// A hosted model that turns a system prompt and a question into text
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name, for logs
    fn provider(&self) -> &'static str;

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ModelError>;
}

/// Build the provider selected in `config`
pub fn from_config(config: &ModelConfig) -> Result<Arc<dyn LanguageModel>, ModelError> {
    let api_key = config
        .api_key
        .clone()
        .ok_or(ModelError::MissingApiKey(config.provider.as_str()))?;
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

    let model: Arc<dyn LanguageModel> = match config.provider {
        ProviderKind::Anthropic => Arc::new(AnthropicModel {
            client,
            api_key,
            model: config.model.clone().unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            base_url: ANTHROPIC_BASE_URL.to_string(),
        }),
        ProviderKind::OpenAi => Arc::new(OpenAiModel {
            client,
            api_key,
            model: config.model.clone().unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: OPENAI_BASE_URL.to_string(),
        }),
        ProviderKind::Gemini => Arc::new(GeminiModel {
            client,
            api_key,
            model: config.model.clone().unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            base_url: GEMINI_BASE_URL.to_string(),
        }),
    };

    log::info!("Using {} model provider", model.provider());
    Ok(model)
}

/// Send a prepared request and decode a JSON body, mapping non-2xx to [`ModelError::Status`]
async fn send_json<R: DeserializeOwned>(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<R, ModelError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        return Err(ModelError::Status {
            provider,
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<R>().await?)
}

// Anthropic Messages API

pub struct AnthropicModel {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
    model: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

fn anthropic_completion(body: AnthropicResponse, requested_model: &str) -> Result<CompletionResponse, ModelError> {
    let text = body
        .content
        .into_iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text)
        .ok_or(ModelError::EmptyResponse("anthropic"))?;
    Ok(CompletionResponse {
        text,
        model: body.model.unwrap_or_else(|| requested_model.to_string()),
        usage: body.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }),
    })
}

#[async_trait]
impl LanguageModel for AnthropicModel {
    fn provider(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ModelError> {
        let payload = AnthropicRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: &request.system_prompt,
            messages: [ChatMessage {
                role: "user",
                content: &request.user_message,
            }],
        };
        let http = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload);

        let body: AnthropicResponse = send_json(self.provider(), http).await?;
        anthropic_completion(body, &self.model)
    }
}

// OpenAI Chat Completions API

pub struct OpenAiModel {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    model: Option<String>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

fn openai_completion(body: OpenAiResponse, requested_model: &str) -> Result<CompletionResponse, ModelError> {
    let text = body
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|text| !text.is_empty())
        .ok_or(ModelError::EmptyResponse("openai"))?;
    Ok(CompletionResponse {
        text,
        model: body.model.unwrap_or_else(|| requested_model.to_string()),
        usage: body.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
    })
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn provider(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ModelError> {
        let payload = OpenAiRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_message,
                },
            ],
        };
        let http = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload);

        let body: OpenAiResponse = send_json(self.provider(), http).await?;
        openai_completion(body, &self.model)
    }
}

// Google Gemini generateContent API

pub struct GeminiModel {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    system_instruction: GeminiContent<'a>,
    contents: [GeminiContent<'a>; 1],
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: [GeminiPart<'a>; 1],
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

fn gemini_completion(body: GeminiResponse, requested_model: &str) -> Result<CompletionResponse, ModelError> {
    let text: String = body
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(ModelError::EmptyResponse("gemini"));
    }
    Ok(CompletionResponse {
        text,
        model: body.model_version.unwrap_or_else(|| requested_model.to_string()),
        usage: body.usage_metadata.map(|u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        }),
    })
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn provider(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ModelError> {
        let payload = GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: [GeminiPart {
                    text: &request.system_prompt,
                }],
            },
            contents: [GeminiContent {
                role: Some("user"),
                parts: [GeminiPart {
                    text: &request.user_message,
                }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: request.max_tokens,
            },
        };
        let http = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&payload);

        let body: GeminiResponse = send_json(self.provider(), http).await?;
        gemini_completion(body, &self.model)
    }
}
