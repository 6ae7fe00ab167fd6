use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Pdf,
    Url,
    Text,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Processing,
    Completed,
    Failed,
}

stored_object!(Source, "source", {
    notebook_id: String,
    kind: SourceKind,
    title: String,
    original_url: Option<String>,
    storage_key: Option<String>,
    metadata: serde_json::Value,
    status: SourceStatus,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    deleted_at: Option<DateTime<Utc>>
});

impl Source {
    pub fn new(
        notebook_id: String,
        kind: SourceKind,
        title: String,
        original_url: Option<String>,
        storage_key: Option<String>,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            notebook_id,
            kind,
            title,
            original_url,
            storage_key,
            metadata,
            status: SourceStatus::Processing,
            deleted_at: None,
        }
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        Ok(db.get_item(id).await?)
    }

    pub async fn list_by_notebook(
        notebook_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let sources: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM source WHERE notebook_id = $notebook_id AND deleted_at IS NONE ORDER BY created_at ASC",
            )
            .bind(("notebook_id", notebook_id.to_string()))
            .await?
            .take(0)?;
        Ok(sources)
    }

    pub async fn set_status(
        id: &str,
        status: SourceStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _source: Option<Self> = db
            .client
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", status))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;
        Ok(())
    }

    pub async fn mark_completed(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        Self::set_status(id, SourceStatus::Completed, db).await
    }

    /// Terminal failure: records the categorized reason under `metadata.error`
    /// so a source is never left stuck in processing.
    pub async fn mark_failed(
        id: &str,
        reason: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let source: Option<Self> = db.get_item(id).await?;
        let Some(mut source) = source else {
            return Ok(());
        };

        source.status = SourceStatus::Failed;
        source.updated_at = Utc::now();
        if let Some(map) = source.metadata.as_object_mut() {
            map.insert("error".to_string(), serde_json::Value::from(reason));
        } else {
            source.metadata = serde_json::json!({ "error": reason });
        }

        let _updated: Option<Self> = db
            .client
            .update((Self::table_name(), id))
            .content(source)
            .await?;
        Ok(())
    }

    /// Duplicate-upload detection within a notebook by content hash.
    pub async fn find_by_content_hash(
        notebook_id: &str,
        sha256: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let source: Option<Self> = db
            .client
            .query(
                "SELECT * FROM source WHERE notebook_id = $notebook_id AND metadata.sha256 = $sha256 AND deleted_at IS NONE LIMIT 1",
            )
            .bind(("notebook_id", notebook_id.to_string()))
            .bind(("sha256", sha256.to_string()))
            .await?
            .take(0)?;
        Ok(source)
    }

    pub async fn soft_delete(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .client
            .update((Self::table_name(), id))
            .patch(PatchOp::replace(
                "/deleted_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;
        Ok(())
    }
}
