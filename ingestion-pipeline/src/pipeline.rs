use std::sync::Arc;

use common::{
    error::AppError,
    llm::LlmClient,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            chunk::Chunk,
            source::{Source, SourceKind, SourceStatus},
        },
    },
    utils::config::AppConfig,
};
use tracing::{info, warn};

use crate::{
    chunker::Chunker,
    extract::{
        extract_pdf_text, extract_url_article, fetch_source_bytes, key_extension,
        normalize_storage_key,
    },
};

/// Drives one uploaded source from raw bytes to searchable chunks. The state
/// machine is terminal: after a run the source is `completed` or `failed`,
/// never left in `processing`.
pub struct SourcePipeline {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    llm: LlmClient,
    config: AppConfig,
}

impl SourcePipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        llm: LlmClient,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            storage,
            llm,
            config,
        }
    }

    #[tracing::instrument(skip_all, fields(source_id = %source_id))]
    pub async fn process_source(&self, source_id: &str) -> Result<(), AppError> {
        let Some(source) = Source::get(source_id, &self.db).await? else {
            warn!("source disappeared before processing");
            return Ok(());
        };

        Source::set_status(source_id, SourceStatus::Processing, &self.db).await?;

        match self.run(&source).await {
            Ok(chunk_count) => {
                Source::mark_completed(source_id, &self.db).await?;
                info!(chunk_count, "source processing completed");
                Ok(())
            }
            Err(err) => {
                let reason = categorize_failure(&err);
                warn!(error = %err, reason = %reason, "source processing failed");
                Source::mark_failed(source_id, &reason, &self.db).await?;
                Err(err)
            }
        }
    }

    async fn run(&self, source: &Source) -> Result<usize, AppError> {
        let text = self.extract_text(source).await?;

        if text.trim().is_empty() {
            return Err(AppError::Processing(
                "No text extracted from file".to_string(),
            ));
        }

        let chunker = Chunker::new(self.config.chunk_size, self.config.chunk_overlap);
        let windows = chunker.chunk(&text);
        if windows.is_empty() {
            return Err(AppError::Processing(
                "No text extracted from file".to_string(),
            ));
        }

        let texts: Vec<String> = windows.iter().map(|w| w.text.clone()).collect();
        let embeddings = self
            .llm
            .generate_embeddings(&texts, None, None)
            .await
            .map_err(|err| match err {
                external @ AppError::ExternalService { .. } => external,
                other => AppError::external("LLM", other),
            })?;

        let expected = self.config.embedding_dimension;
        if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
            return Err(AppError::Processing(format!(
                "Embedding dimension {} does not match configured {expected}",
                bad.len()
            )));
        }

        let metadata = serde_json::json!({
            "storage_key": source.storage_key,
            "file_type": source
                .storage_key
                .as_deref()
                .map(key_extension)
                .unwrap_or_default(),
            "text_length": text.len(),
        });

        let chunks: Vec<Chunk> = windows
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (window, embedding))| {
                Chunk::new(
                    source.id.clone(),
                    source.notebook_id.clone(),
                    window.text,
                    u32::try_from(index).unwrap_or(u32::MAX),
                    window.start as u64,
                    window.end as u64,
                    embedding,
                    metadata.clone(),
                )
            })
            .collect();

        let chunk_count = chunks.len();
        Chunk::bulk_create(chunks, &self.db).await?;

        Ok(chunk_count)
    }

    async fn extract_text(&self, source: &Source) -> Result<String, AppError> {
        match source.kind {
            SourceKind::Url => {
                let url = source.original_url.as_deref().ok_or_else(|| {
                    AppError::Processing("Source has no original URL".to_string())
                })?;
                extract_url_article(url).await
            }
            SourceKind::Pdf | SourceKind::Text => {
                let storage_key = source
                    .storage_key
                    .as_deref()
                    .ok_or_else(|| AppError::Processing("Storage key is missing".to_string()))?;
                let key = normalize_storage_key(storage_key);

                let bytes = fetch_source_bytes(&self.storage, &key).await?;

                match key_extension(&key).as_str() {
                    "pdf" => extract_pdf_text(bytes.to_vec()).await,
                    "txt" | "md" => Ok(String::from_utf8_lossy(&bytes).into_owned()),
                    other => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => Ok(text),
                        Err(_) => Err(AppError::Processing(format!(
                            "Unsupported file type: {other}"
                        ))),
                    },
                }
            }
        }
    }
}

/// Reduce an error to the reason recorded on the failed source row.
fn categorize_failure(err: &AppError) -> String {
    match err {
        AppError::Validation(msg) => format!("Validation error: {msg}"),
        AppError::Processing(msg) => msg.clone(),
        AppError::ExternalService { .. } => format!("Processing error: {err}"),
        other => format!("Unexpected system error: {other}"),
    }
}
