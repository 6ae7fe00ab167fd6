use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{source_object_key, StorageManager},
        types::source::{Source, SourceKind, SourceStatus},
    },
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Extensions accepted for direct file uploads.
const ALLOWED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];
const ALLOWED_CONTENT_TYPES: [&str; 3] = ["application/pdf", "text/plain", "text/markdown"];

pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReceipt {
    pub source_id: String,
    pub title: String,
    pub status: SourceStatus,
    /// True when an existing source was returned instead of a new row.
    pub reused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedFile {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct UploadOutcome {
    pub receipts: Vec<SourceReceipt>,
    pub rejected: Vec<RejectedFile>,
}

impl UploadOutcome {
    /// Ids of newly created sources that need a processing run dispatched.
    /// Reused sources are excluded: their original run owns the state
    /// machine and a competing run would trip the chunk unique index.
    pub fn pending_source_ids(&self) -> Vec<String> {
        self.receipts
            .iter()
            .filter(|r| !r.reused && r.status == SourceStatus::Processing)
            .map(|r| r.source_id.clone())
            .collect()
    }
}

/// Accepts uploads, validates them, persists the bytes and creates Source
/// rows in `processing`. Rejected files are skipped without failing the
/// batch. Actual processing happens in the background dispatcher.
pub struct UploadService {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    max_upload_bytes: usize,
}

impl UploadService {
    pub fn new(db: Arc<SurrealDbClient>, storage: StorageManager, max_upload_bytes: usize) -> Self {
        Self {
            db,
            storage,
            max_upload_bytes,
        }
    }

    pub async fn ingest_upload(
        &self,
        notebook_id: &str,
        user_id: &str,
        files: Vec<UploadedFile>,
        url: Option<String>,
        text: Option<String>,
        title: Option<String>,
    ) -> Result<UploadOutcome, AppError> {
        let has_url = url.as_deref().is_some_and(|u| !u.trim().is_empty());
        let has_text = text.as_deref().is_some_and(|t| !t.trim().is_empty());
        if files.is_empty() && !has_url && !has_text {
            return Err(AppError::Validation(
                "At least one of files, url or text is required".to_string(),
            ));
        }

        let mut outcome = UploadOutcome::default();

        for file in files {
            match self.accept_file(notebook_id, user_id, &file).await {
                Ok(receipt) => outcome.receipts.push(receipt),
                Err(AppError::Validation(reason)) => {
                    warn!(file = %file.file_name, %reason, "rejected upload");
                    outcome.rejected.push(RejectedFile {
                        file_name: file.file_name.clone(),
                        reason,
                    });
                }
                Err(other) => return Err(other),
            }
        }

        if has_url {
            let url = url.unwrap_or_default();
            let source = Source::new(
                notebook_id.to_string(),
                SourceKind::Url,
                title.clone().unwrap_or_else(|| url.clone()),
                Some(url),
                None,
                serde_json::json!({}),
            );
            outcome.receipts.push(self.persist_source(source).await?);
        }

        if has_text {
            let body = text.unwrap_or_default();
            let receipt = self
                .accept_file(
                    notebook_id,
                    user_id,
                    &UploadedFile {
                        file_name: "pasted-text.txt".to_string(),
                        content_type: Some("text/plain".to_string()),
                        bytes: Bytes::from(body.into_bytes()),
                    },
                )
                .await?;
            // Pasted text carries the request title when one was given.
            let receipt = match &title {
                Some(title) if !receipt.reused && receipt.status == SourceStatus::Processing => {
                    self.retitle(&receipt.source_id, title).await?;
                    SourceReceipt {
                        title: title.clone(),
                        ..receipt
                    }
                }
                _ => receipt,
            };
            outcome.receipts.push(receipt);
        }

        Ok(outcome)
    }

    async fn accept_file(
        &self,
        notebook_id: &str,
        user_id: &str,
        file: &UploadedFile,
    ) -> Result<SourceReceipt, AppError> {
        self.validate_file(file)?;

        let sha256 = format!("{:x}", Sha256::digest(&file.bytes));
        if let Some(existing) = Source::find_by_content_hash(notebook_id, &sha256, &self.db).await?
        {
            info!(source_id = %existing.id, "duplicate upload, reusing existing source");
            return Ok(SourceReceipt {
                source_id: existing.id,
                title: existing.title,
                status: existing.status,
                reused: true,
            });
        }

        let sanitized = sanitize_file_name(&file.file_name);
        let key = source_object_key(
            user_id,
            notebook_id,
            Utc::now().timestamp_millis(),
            &sanitized,
        );

        self.storage
            .put(&key, file.bytes.clone())
            .await
            .map_err(|e| AppError::external("StorageProvider", e))?;

        let extension = extension_of(&file.file_name);
        let kind = if extension == "pdf" {
            SourceKind::Pdf
        } else {
            SourceKind::Text
        };

        let source = Source::new(
            notebook_id.to_string(),
            kind,
            file.file_name.clone(),
            None,
            Some(key),
            serde_json::json!({
                "sha256": sha256,
                "file_type": extension,
                "size_bytes": file.bytes.len(),
            }),
        );

        self.persist_source(source).await
    }

    async fn persist_source(&self, source: Source) -> Result<SourceReceipt, AppError> {
        let receipt = SourceReceipt {
            source_id: source.id.clone(),
            title: source.title.clone(),
            status: source.status,
            reused: false,
        };
        self.db.store_item(source).await?;
        Ok(receipt)
    }

    async fn retitle(&self, source_id: &str, title: &str) -> Result<(), AppError> {
        self.db
            .client
            .query("UPDATE type::thing('source', $id) SET title = $title")
            .bind(("id", source_id.to_string()))
            .bind(("title", title.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    fn validate_file(&self, file: &UploadedFile) -> Result<(), AppError> {
        if file.bytes.len() > self.max_upload_bytes {
            return Err(AppError::Validation(format!(
                "File exceeds the {} byte limit",
                self.max_upload_bytes
            )));
        }

        let extension = extension_of(&file.file_name);
        let extension_ok = ALLOWED_EXTENSIONS.contains(&extension.as_str());
        let content_type_ok = file
            .content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
            .is_some_and(|ct| ALLOWED_CONTENT_TYPES.contains(&ct));

        if !extension_ok && !content_type_ok {
            return Err(AppError::Validation(format!(
                "Unsupported file type: {}",
                file.file_name
            )));
        }

        Ok(())
    }
}

fn extension_of(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Replace anything outside `[A-Za-z0-9_]` in the stem with underscores,
/// keeping the extension readable.
fn sanitize_file_name(file_name: &str) -> String {
    let sanitize = |part: &str| -> String {
        part.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };

    match file_name.rsplit_once('.') {
        Some((stem, ext)) => {
            format!("{}.{}", sanitize(stem), sanitize(&ext.to_ascii_lowercase()))
        }
        None => sanitize(file_name),
    }
}
