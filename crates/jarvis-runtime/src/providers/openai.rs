//! OpenAI Completions API Provider
//!
//! Implements the AIProvider trait for the prompt-based `/completions`
//! endpoint, served either by OpenAI directly or by an Azure OpenAI
//! deployment.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::{AIProvider, CompletionRequest, CompletionResponse, ProviderError};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-davinci-003";
const DEFAULT_AZURE_API_VERSION: &str = "2022-12-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Which URL layout and auth header the endpoint expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFlavor {
    /// `{base}/completions` with a bearer token.
    OpenAI,
    /// `{base}/openai/deployments/{model}/completions?api-version=..` with an `api-key` header.
    Azure { api_version: String },
}

impl ApiFlavor {
    /// Parses the `OPENAI_API_TYPE` convention (`azure`, `open_ai`, `openai`).
    pub fn parse(api_type: &str, api_version: Option<String>) -> Result<Self, ProviderError> {
        match api_type.trim().to_ascii_lowercase().as_str() {
            "" | "open_ai" | "openai" => Ok(Self::OpenAI),
            "azure" | "azure_ad" => Ok(Self::Azure {
                api_version: api_version
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            }),
            other => Err(ProviderError::Configuration(format!(
                "unsupported api type '{other}'"
            ))),
        }
    }
}

#[derive(Debug)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    flavor: ApiFlavor,
    timeout: Duration,
    pub default_model: String,
}

impl OpenAIProvider {
    /// Reads `OPENAI_API_KEY`, `OPENAI_API_BASE`, `OPENAI_API_TYPE`,
    /// `OPENAI_API_VERSION` and `ENGINE`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            ProviderError::Configuration(
                "OPENAI_API_KEY environment variable must be set".to_string(),
            )
        })?;

        let base_url = env::var("OPENAI_API_BASE").unwrap_or_else(|_| OPENAI_API_BASE.to_string());

        let default_model = env::var("ENGINE").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let flavor = ApiFlavor::parse(
            &env::var("OPENAI_API_TYPE").unwrap_or_default(),
            env::var("OPENAI_API_VERSION").ok(),
        )?;

        Self::new(api_key, base_url, default_model).map(|provider| provider.with_flavor(flavor))
    }

    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(DEFAULT_TIMEOUT)?,
            api_key: api_key.into(),
            base_url: base_url.into(),
            flavor: ApiFlavor::OpenAI,
            timeout: DEFAULT_TIMEOUT,
            default_model: default_model.into(),
        })
    }

    pub fn with_flavor(mut self, flavor: ApiFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = build_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    pub fn flavor(&self) -> &ApiFlavor {
        &self.flavor
    }

    pub fn endpoint(&self, model: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        match &self.flavor {
            ApiFlavor::OpenAI => format!("{base}/completions"),
            ApiFlavor::Azure { api_version } => format!(
                "{base}/openai/deployments/{model}/completions?api-version={api_version}"
            ),
        }
    }

    pub fn get_model(&self, req: &CompletionRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.default_model.clone())
    }

    fn body<'a>(&self, req: &'a CompletionRequest, model: &'a str) -> CompletionsBody<'a> {
        CompletionsBody {
            // Azure routes by deployment in the URL and rejects a model field.
            model: match self.flavor {
                ApiFlavor::OpenAI => Some(model),
                ApiFlavor::Azure { .. } => None,
            },
            prompt: &req.prompt,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            frequency_penalty: req.frequency_penalty,
            presence_penalty: req.presence_penalty,
            stop: req.stop.as_deref(),
            user: req.user.as_deref(),
        }
    }
}

fn build_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Configuration(format!("failed to create HTTP client: {e}")))
}

/// Maps a failed HTTP exchange onto the provider taxonomy. A 413, or a 400
/// naming the context length, is the only shape treated as "prompt too large".
fn classify_status(status: StatusCode, body: String) -> ProviderError {
    let mentions_context_length = body.contains("context_length_exceeded")
        || body.to_ascii_lowercase().contains("maximum context length");

    if status == StatusCode::PAYLOAD_TOO_LARGE
        || (status == StatusCode::BAD_REQUEST && mentions_context_length)
    {
        return ProviderError::PromptTooLarge(body);
    }

    ProviderError::HttpStatus {
        status: status.as_u16(),
        body,
    }
}

// ============================================================================
// Completions API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionsBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CompletionsResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    text: String,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[async_trait]
impl AIProvider for OpenAIProvider {
    fn name(&self) -> &'static str {
        match self.flavor {
            ApiFlavor::OpenAI => "openai",
            ApiFlavor::Azure { .. } => "azure-openai",
        }
    }

    async fn generate(&self, req: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = self.get_model(&req);
        let request = self.client.post(self.endpoint(&model));
        let request = match self.flavor {
            ApiFlavor::OpenAI => request.bearer_auth(&self.api_key),
            ApiFlavor::Azure { .. } => request.header("api-key", &self.api_key),
        };

        let response = request
            .json(&self.body(&req, &model))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    ProviderError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unable to read body>".to_string());
            return Err(classify_status(status, body));
        }

        let completion: CompletionsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Decode("response contained no choices".to_string()))?;

        tracing::debug!(
            provider = self.name(),
            model = %model,
            finish_reason = ?choice.finish_reason,
            "completion received"
        );

        Ok(CompletionResponse {
            content: choice.text,
            model: completion.model.or(Some(model)),
            finish_reason: choice.finish_reason,
        })
    }
}
