pub mod artifacts;
mod http;
mod mock;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::storage::cache::CacheProvider;
use crate::storage::types::quiz::QuizQuestion;
use crate::utils::config::AppConfig;

pub use artifacts::{Mindmap, MindmapArtifact, MindmapFormat, MindmapNode};
pub use http::HttpLlmBackend;
pub use mock::MockLlmBackend;

/// Chat responses are only cached at or below this temperature.
const CHAT_CACHE_MAX_TEMPERATURE: f32 = 0.7;

/// Longest content slice forwarded to the derived-artifact prompts.
const QUIZ_CONTENT_CHARS: usize = 4_000;
const SUMMARY_CONTENT_CHARS: usize = 6_000;
const GUIDE_CONTENT_CHARS: usize = 8_000;
const MINDMAP_CONTENT_CHARS: usize = 6_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Clone)]
enum LlmBackend {
    Http(HttpLlmBackend),
    Mock(MockLlmBackend),
}

impl LlmBackend {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, AppError> {
        match self {
            Self::Http(backend) => backend.chat(messages, model, temperature, max_tokens).await,
            Self::Mock(backend) => backend.chat(messages),
        }
    }

    async fn embed_batch(&self, model: &str, batch: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        match self {
            Self::Http(backend) => backend.embed_batch(model, batch).await,
            Self::Mock(backend) => backend.embed_batch(batch),
        }
    }
}

/// Key material hashed for the chat cache. Field order is fixed by the
/// struct, which keeps the JSON encoding stable.
#[derive(Serialize)]
struct ChatKeyMaterial<'a> {
    messages: &'a [ChatMessage],
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
}

fn chat_cache_key(
    messages: &[ChatMessage],
    model: &str,
    temperature: f32,
    max_tokens: u32,
) -> String {
    let material = ChatKeyMaterial {
        messages,
        model,
        temperature,
        max_tokens,
    };
    let encoded = serde_json::to_string(&material).unwrap_or_default();
    format!("llm:chat:{:x}", md5::compute(encoded.as_bytes()))
}

fn embedding_cache_key(model: &str, text: &str) -> String {
    format!("embed:{model}:{:x}", md5::compute(text.as_bytes()))
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((offset, _)) => text.get(..offset).unwrap_or(text),
        None => text,
    }
}

/// Resilient client for chat completions and embedding generation, with a
/// two-tier response cache and bounded-concurrency embedding batching.
#[derive(Clone)]
pub struct LlmClient {
    backend: LlmBackend,
    cache: CacheProvider,
    model: String,
    embedding_model: String,
    chat_ttl: Duration,
    embedding_ttl: Duration,
    batch_size: usize,
    max_concurrent_batches: usize,
}

impl LlmClient {
    /// Real backend when an API key is configured, deterministic mock
    /// otherwise (logged as degraded).
    pub fn from_config(cfg: &AppConfig, cache: CacheProvider) -> Result<Self, AppError> {
        let backend = match cfg.llm_api_key.as_deref().filter(|key| !key.is_empty()) {
            Some(key) => LlmBackend::Http(HttpLlmBackend::new(key.to_string(), &cfg.llm_base_url)?),
            None => {
                warn!("no LLM api key configured, using deterministic mock backend");
                LlmBackend::Mock(MockLlmBackend::new(cfg.embedding_dimension))
            }
        };

        Ok(Self {
            backend,
            cache,
            model: cfg.llm_model.clone(),
            embedding_model: cfg.embedding_model.clone(),
            chat_ttl: Duration::from_secs(cfg.cache_ttl_chat_seconds),
            embedding_ttl: Duration::from_secs(cfg.cache_ttl_embedding_seconds),
            batch_size: cfg.embedding_batch_size.max(1),
            max_concurrent_batches: cfg.embedding_max_concurrent_batches.max(1),
        })
    }

    /// Client over an explicit mock backend; tests keep the backend handle
    /// to observe upstream traffic.
    pub fn with_mock(backend: MockLlmBackend, cache: CacheProvider, cfg: &AppConfig) -> Self {
        Self {
            backend: LlmBackend::Mock(backend),
            cache,
            model: cfg.llm_model.clone(),
            embedding_model: cfg.embedding_model.clone(),
            chat_ttl: Duration::from_secs(cfg.cache_ttl_chat_seconds),
            embedding_ttl: Duration::from_secs(cfg.cache_ttl_embedding_seconds),
            batch_size: cfg.embedding_batch_size.max(1),
            max_concurrent_batches: cfg.embedding_max_concurrent_batches.max(1),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Chat completion with read-through caching for reproducible calls.
    pub async fn generate_chat(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, AppError> {
        let mut chat_messages = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system_prompt {
            chat_messages.push(ChatMessage::system(system));
        }
        chat_messages.extend_from_slice(messages);

        let cache_key = (temperature <= CHAT_CACHE_MAX_TEMPERATURE)
            .then(|| chat_cache_key(&chat_messages, &self.model, temperature, max_tokens));

        if let Some(key) = &cache_key {
            if let Some(cached) = self.cache.get::<String>(key).await {
                debug!("chat cache hit");
                return Ok(cached);
            }
        }

        let reply = self
            .backend
            .chat(&chat_messages, &self.model, temperature, max_tokens)
            .await?;

        if let Some(key) = &cache_key {
            self.cache.set(key, &reply, Some(self.chat_ttl)).await;
        }

        Ok(reply)
    }

    /// Generate embeddings for all texts, preserving input order. Cached
    /// texts never reach the upstream; the rest are batched and processed
    /// concurrently under the batch semaphore. The first batch to exhaust
    /// its retries aborts every batch that has not started yet.
    pub async fn generate_embeddings(
        &self,
        texts: &[String],
        model: Option<&str>,
        batch_size: Option<usize>,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = model.unwrap_or(&self.embedding_model).to_string();
        let batch_size = batch_size.unwrap_or(self.batch_size).max(1);

        let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut pending: Vec<(usize, String)> = Vec::new();
        for (index, text) in texts.iter().enumerate() {
            let key = embedding_cache_key(&model, text);
            match self.cache.get::<Vec<f32>>(&key).await {
                Some(hit) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(hit);
                    }
                }
                None => pending.push((index, text.clone())),
            }
        }

        let cached = texts.len() - pending.len();
        if cached > 0 {
            debug!(cached, total = texts.len(), "embedding cache hits");
        }

        if !pending.is_empty() {
            let batches: Vec<Vec<(usize, String)>> =
                pending.chunks(batch_size).map(<[_]>::to_vec).collect();
            let semaphore = Arc::new(Semaphore::new(self.max_concurrent_batches));
            let aborted = Arc::new(AtomicBool::new(false));

            let mut handles = Vec::with_capacity(batches.len());
            for batch in batches {
                let semaphore = Arc::clone(&semaphore);
                let aborted = Arc::clone(&aborted);
                let backend = self.backend.clone();
                let cache = self.cache.clone();
                let model = model.clone();
                let ttl = self.embedding_ttl;

                handles.push(tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| AppError::InternalError("embedding semaphore closed".into()))?;

                    // A sibling batch already failed; do not start.
                    if aborted.load(Ordering::SeqCst) {
                        return Ok(None);
                    }

                    let inputs: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
                    match backend.embed_batch(&model, &inputs).await {
                        Ok(vectors) => {
                            let mut resolved = Vec::with_capacity(batch.len());
                            for ((index, text), vector) in batch.into_iter().zip(vectors) {
                                // Cache writes are best-effort.
                                cache
                                    .set(&embedding_cache_key(&model, &text), &vector, Some(ttl))
                                    .await;
                                resolved.push((index, vector));
                            }
                            Ok(Some(resolved))
                        }
                        Err(err) => {
                            aborted.store(true, Ordering::SeqCst);
                            Err(err)
                        }
                    }
                }));
            }

            let mut first_error: Option<AppError> = None;
            for handle in handles {
                match handle.await {
                    Ok(Ok(Some(resolved))) => {
                        for (index, vector) in resolved {
                            if let Some(slot) = slots.get_mut(index) {
                                *slot = Some(vector);
                            }
                        }
                    }
                    Ok(Ok(None)) => {}
                    Ok(Err(err)) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                    Err(join_err) => {
                        if first_error.is_none() {
                            first_error = Some(AppError::Join(join_err));
                        }
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| {
                    AppError::external("LLM", "embedding response missing an input's vector")
                })
            })
            .collect()
    }

    pub async fn generate_quiz(
        &self,
        content: &str,
        num_questions: u32,
        difficulty: &str,
    ) -> Result<Vec<QuizQuestion>, AppError> {
        let prompt = artifacts::quiz_prompt(
            truncate_chars(content, QUIZ_CONTENT_CHARS),
            num_questions,
            difficulty,
        );
        let reply = self
            .generate_chat(&[ChatMessage::user(prompt)], None, 0.7, 2_000)
            .await?;
        Ok(artifacts::parse_quiz_questions(&reply))
    }

    pub async fn generate_summary(
        &self,
        content: &str,
        max_length: usize,
        style: &str,
    ) -> Result<String, AppError> {
        let prompt = artifacts::summary_prompt(
            truncate_chars(content, SUMMARY_CONTENT_CHARS),
            max_length,
            style,
        );
        let max_tokens = u32::try_from((max_length / 2).min(1_000)).unwrap_or(1_000);
        let reply = self
            .generate_chat(&[ChatMessage::user(prompt)], None, 0.3, max_tokens)
            .await?;
        Ok(reply.trim().to_string())
    }

    pub async fn generate_study_guide(
        &self,
        content: &str,
        topic: Option<&str>,
        format: &str,
    ) -> Result<String, AppError> {
        let prompt = artifacts::study_guide_prompt(
            truncate_chars(content, GUIDE_CONTENT_CHARS),
            topic,
            format,
        );
        let reply = self
            .generate_chat(&[ChatMessage::user(prompt)], None, 0.5, 4_000)
            .await?;
        Ok(reply.trim().to_string())
    }

    pub async fn generate_mindmap(
        &self,
        content: &str,
        format: MindmapFormat,
    ) -> Result<MindmapArtifact, AppError> {
        let prompt =
            artifacts::mindmap_prompt(truncate_chars(content, MINDMAP_CONTENT_CHARS), format);
        let reply = self
            .generate_chat(&[ChatMessage::user(prompt)], None, 0.6, 2_000)
            .await?;

        Ok(match format {
            MindmapFormat::Json => MindmapArtifact::Tree(artifacts::parse_mindmap(&reply)),
            MindmapFormat::Mermaid | MindmapFormat::Markdown => MindmapArtifact::Text {
                content: reply.trim().to_string(),
            },
        })
    }

    pub async fn health_check(&self) -> bool {
        self.generate_chat(
            &[ChatMessage::user("Say 'OK' if you can read this.")],
            None,
            0.0,
            10,
        )
        .await
        .map(|reply| !reply.is_empty())
        .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn test_client() -> (LlmClient, MockLlmBackend) {
        let cfg = AppConfig::default();
        let backend = MockLlmBackend::new(8);
        let client = LlmClient::with_mock(backend.clone(), CacheProvider::memory(), &cfg);
        (client, backend)
    }

    #[tokio::test]
    async fn chat_cache_collapses_identical_calls() {
        let (client, backend) = test_client();
        let messages = [ChatMessage::user("What is A?")];

        let first = client
            .generate_chat(&messages, Some("Be terse."), 0.7, 256)
            .await
            .expect("first call");
        let second = client
            .generate_chat(&messages, Some("Be terse."), 0.7, 256)
            .await
            .expect("second call");

        assert_eq!(first, second);
        assert_eq!(backend.chat_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chat_above_cache_temperature_always_hits_upstream() {
        let (client, backend) = test_client();
        let messages = [ChatMessage::user("brainstorm")];

        for _ in 0..2 {
            client
                .generate_chat(&messages, None, 0.9, 256)
                .await
                .expect("call");
        }
        assert_eq!(backend.chat_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn different_parameters_use_different_cache_entries() {
        let (client, backend) = test_client();
        let messages = [ChatMessage::user("same text")];

        client
            .generate_chat(&messages, None, 0.2, 100)
            .await
            .expect("call");
        client
            .generate_chat(&messages, None, 0.2, 200)
            .await
            .expect("call");
        assert_eq!(backend.chat_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn embeddings_come_back_in_input_order() {
        let (client, _backend) = test_client();
        let texts: Vec<String> = (0..7).map(|i| format!("text {i}")).collect();

        let vectors = client
            .generate_embeddings(&texts, None, Some(2))
            .await
            .expect("embed");
        assert_eq!(vectors.len(), texts.len());

        // Each vector must equal the deterministic single-text embedding.
        for (text, vector) in texts.iter().zip(&vectors) {
            let single = client
                .generate_embeddings(std::slice::from_ref(text), None, None)
                .await
                .expect("single embed");
            assert_eq!(&single[0], vector);
        }
    }

    #[tokio::test]
    async fn repeated_texts_hit_upstream_once_within_ttl() {
        let (client, backend) = test_client();
        let texts = vec!["X.".to_string(), "X.".to_string(), "Y.".to_string()];

        client
            .generate_embeddings(&texts, None, Some(1))
            .await
            .expect("first pass");
        // Only two distinct texts ever reach the upstream.
        assert_eq!(backend.unique_embedded_texts(), 2);

        let batches_after_first = backend.embedding_batches.load(Ordering::SeqCst);

        client
            .generate_embeddings(&texts, None, Some(1))
            .await
            .expect("second pass");
        assert_eq!(
            backend.embedding_batches.load(Ordering::SeqCst),
            batches_after_first,
            "second identical request must be served from cache"
        );
    }

    #[tokio::test]
    async fn embedding_failure_surfaces_external_service_error() {
        let (client, backend) = test_client();
        backend.fail_embeddings.store(true, Ordering::SeqCst);

        let result = client
            .generate_embeddings(&["a".to_string()], None, None)
            .await;
        assert!(matches!(
            result,
            Err(AppError::ExternalService { .. })
        ));
    }

    #[tokio::test]
    async fn empty_input_is_a_noop() {
        let (client, backend) = test_client();
        let vectors = client
            .generate_embeddings(&[], None, None)
            .await
            .expect("noop");
        assert!(vectors.is_empty());
        assert_eq!(backend.embedding_batches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn quiz_parse_failure_degrades_to_empty() {
        // The mock chat reply is prose, not JSON, so the parser must fall
        // back instead of raising.
        let (client, _backend) = test_client();
        let questions = client
            .generate_quiz("Some content", 5, "novice")
            .await
            .expect("quiz");
        assert!(questions.is_empty());
    }

    #[tokio::test]
    async fn mindmap_falls_back_on_unparseable_reply() {
        let (client, _backend) = test_client();
        let artifact = client
            .generate_mindmap("Some content", MindmapFormat::Json)
            .await
            .expect("mindmap");
        assert_eq!(artifact, MindmapArtifact::Tree(Mindmap::fallback()));

        let text = client
            .generate_mindmap("Some content", MindmapFormat::Markdown)
            .await
            .expect("mindmap");
        assert!(matches!(text, MindmapArtifact::Text { .. }));
    }

    #[test]
    fn cache_keys_are_stable_and_distinct() {
        let messages = [ChatMessage::user("hello")];
        let a = chat_cache_key(&messages, "m", 0.5, 100);
        let b = chat_cache_key(&messages, "m", 0.5, 100);
        assert_eq!(a, b);
        assert!(a.starts_with("llm:chat:"));

        let c = chat_cache_key(&messages, "m", 0.6, 100);
        assert_ne!(a, c);

        let e1 = embedding_cache_key("m", "text");
        let e2 = embedding_cache_key("m", "text");
        let e3 = embedding_cache_key("other", "text");
        assert_eq!(e1, e2);
        assert_ne!(e1, e3);
    }
}
