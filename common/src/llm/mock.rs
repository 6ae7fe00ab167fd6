use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::AppError;

use super::ChatMessage;

/// Deterministic offline backend, selected when no API key is configured.
/// Embeddings are a pure function of the input text so retrieval behaves
/// consistently across runs; counters let tests observe upstream traffic.
#[derive(Clone)]
pub struct MockLlmBackend {
    dimension: usize,
    pub chat_calls: Arc<AtomicUsize>,
    pub embedding_batches: Arc<AtomicUsize>,
    pub embedded_texts: Arc<Mutex<Vec<String>>>,
    pub fail_chat: Arc<AtomicBool>,
    pub fail_embeddings: Arc<AtomicBool>,
}

impl MockLlmBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            chat_calls: Arc::new(AtomicUsize::new(0)),
            embedding_batches: Arc::new(AtomicUsize::new(0)),
            embedded_texts: Arc::new(Mutex::new(Vec::new())),
            fail_chat: Arc::new(AtomicBool::new(false)),
            fail_embeddings: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn chat(&self, messages: &[ChatMessage]) -> Result<String, AppError> {
        if self.fail_chat.load(Ordering::SeqCst) {
            return Err(AppError::external("LLM", "mock chat failure"));
        }
        self.chat_calls.fetch_add(1, Ordering::SeqCst);

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map_or("", |m| m.content.as_str());
        Ok(format!("Canned response to: {last_user}"))
    }

    pub fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if self.fail_embeddings.load(Ordering::SeqCst) {
            return Err(AppError::external("LLM", "mock embedding failure"));
        }
        self.embedding_batches.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.embedded_texts.lock() {
            seen.extend(batch.iter().cloned());
        }

        Ok(batch.iter().map(|text| self.embed_text(text)).collect())
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let digest = md5::compute(text.as_bytes());
        let mut vector: Vec<f32> = (0..self.dimension)
            .map(|i| {
                let byte = digest.0[(i.wrapping_mul(7).wrapping_add(3)) % 16];
                f32::from(byte) - 127.5
            })
            .collect();

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    pub fn unique_embedded_texts(&self) -> usize {
        self.embedded_texts.lock().map_or(0, |seen| {
            let mut texts = seen.clone();
            texts.sort();
            texts.dedup();
            texts.len()
        })
    }
}
