use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use bytes::Bytes;
use common::storage::types::{notebook::Notebook, source::Source, user::User};
use ingestion_pipeline::{spawn_source_processing, SourceReceipt, UploadedFile};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    #[form_data(limit = "52428800")]
    #[form_data(default)]
    pub files: Vec<FieldData<Bytes>>,
    pub url: Option<String>,
    pub text: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceUploadData {
    source_id: String,
    source_title: String,
    status: common::storage::types::source::SourceStatus,
    message: String,
}

impl From<&SourceReceipt> for SourceUploadData {
    fn from(receipt: &SourceReceipt) -> Self {
        Self {
            source_id: receipt.source_id.clone(),
            source_title: receipt.title.clone(),
            status: receipt.status,
            message: "Source accepted for processing".to_string(),
        }
    }
}

pub async fn upload_sources(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(notebook_id): Path<String>,
    TypedMultipart(params): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    Notebook::get_owned(&notebook_id, &user.id, &state.db, false)
        .await
        .map_err(ApiError::from)?;

    let files: Vec<UploadedFile> = params
        .files
        .into_iter()
        .map(|field| UploadedFile {
            file_name: field
                .metadata
                .file_name
                .unwrap_or_else(|| "upload".to_string()),
            content_type: field.metadata.content_type,
            bytes: field.contents,
        })
        .collect();

    let outcome = state
        .upload_service()
        .ingest_upload(
            &notebook_id,
            &user.id,
            files,
            params.url,
            params.text,
            params.title,
        )
        .await
        .map_err(ApiError::from)?;

    // Processing continues after this response returns.
    for source_id in outcome.pending_source_ids() {
        info!(%source_id, "dispatching source processing");
        spawn_source_processing(state.pipeline.clone(), source_id);
    }

    let entries: Vec<SourceUploadData> =
        outcome.receipts.iter().map(SourceUploadData::from).collect();
    let data = if entries.len() == 1 {
        serde_json::to_value(&entries[0]).unwrap_or_default()
    } else {
        serde_json::to_value(&entries).unwrap_or_default()
    };

    Ok(Json(json!({
        "success": true,
        "data": data,
        "rejected": outcome.rejected,
    })))
}

pub async fn list_sources(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(notebook_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Notebook::get_owned(&notebook_id, &user.id, &state.db, false)
        .await
        .map_err(ApiError::from)?;

    let sources = Source::list_by_notebook(&notebook_id, &state.db)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(sources))
}
