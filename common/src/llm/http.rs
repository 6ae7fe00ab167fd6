use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

use crate::error::AppError;

use super::ChatMessage;

/// Per-call HTTP timeout, independent of the request-level envelope.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const POOL_MAX_IDLE_PER_HOST: usize = 20;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts per embedding batch (one initial call plus retries).
const EMBED_MAX_RETRIES: usize = 2;

/// Client for any OpenAI-compatible chat/embedding gateway. One long-lived
/// connection pool is shared across all calls.
#[derive(Clone)]
pub struct HttpLlmBackend {
    client: reqwest::Client,
    api_key: String,
    chat_endpoint: String,
    embedding_endpoint: String,
}

#[derive(Debug)]
struct UpstreamError {
    status: Option<StatusCode>,
    message: String,
}

impl UpstreamError {
    fn retryable(&self) -> bool {
        match self.status {
            // Auth and billing failures never heal on retry.
            Some(StatusCode::UNAUTHORIZED | StatusCode::PAYMENT_REQUIRED | StatusCode::FORBIDDEN) => {
                false
            }
            Some(
                StatusCode::TOO_MANY_REQUESTS
                | StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT,
            ) => true,
            Some(_) => false,
            // Transport-level failure, worth retrying.
            None => true,
        }
    }
}

/// Both response shapes seen in the wild: the OpenAI envelope and a bare list.
#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Object { data: Vec<EmbeddingItem> },
    List(Vec<EmbeddingItem>),
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_vectors(self) -> Vec<Vec<f32>> {
        let items = match self {
            Self::Object { data } => data,
            Self::List(items) => items,
        };
        items.into_iter().map(|item| item.embedding).collect()
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl HttpLlmBackend {
    pub fn new(api_key: String, base_url: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()?;

        let base = base_url.trim_end_matches('/');
        Ok(Self {
            client,
            api_key,
            chat_endpoint: format!("{base}/chat/completions"),
            embedding_endpoint: format!("{base}/embeddings"),
        })
    }

    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, AppError> {
        let response = self
            .client
            .post(&self.chat_endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": model,
                "messages": messages,
                "temperature": temperature,
                "max_tokens": max_tokens,
            }))
            .send()
            .await?
            .error_for_status()?;

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AppError::LLMParsing("Chat response contained no choices".into()))
    }

    /// One embedding batch with the retry policy applied: up to three
    /// attempts, exponential backoff starting at one second.
    pub async fn embed_batch(
        &self,
        model: &str,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(500)
            .map(jitter)
            .take(EMBED_MAX_RETRIES);

        RetryIf::spawn(
            strategy,
            || self.embed_batch_once(model, batch),
            |err: &UpstreamError| {
                let retry = err.retryable();
                if retry {
                    warn!(error = %err.message, "embedding batch failed, will retry");
                }
                retry
            },
        )
        .await
        .map_err(|err| AppError::external("LLM", err.message))
    }

    async fn embed_batch_once(
        &self,
        model: &str,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, UpstreamError> {
        let response = self
            .client
            .post(&self.embedding_endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": model,
                "input": batch,
            }))
            .send()
            .await
            .map_err(|e| UpstreamError {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError {
                status: Some(status),
                message: format!("embedding endpoint returned {status}: {body}"),
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| UpstreamError {
            // A 2xx with an unparseable body is not retryable.
            status: Some(StatusCode::OK),
            message: format!("unexpected embedding response format: {e}"),
        })?;

        Ok(parsed.into_vectors())
    }
}
