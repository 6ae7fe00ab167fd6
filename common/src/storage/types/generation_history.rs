use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Audit rows older than this are no longer surfaced by reads. There is no
/// background sweeper; retention is enforced at query time.
pub const RETENTION_DAYS: i64 = 90;

/// Characters of content kept in the preview column.
const PREVIEW_CHARS: usize = 200;

stored_object!(GenerationHistory, "generation_history", {
    user_id: String,
    notebook_id: Option<String>,
    history_type: String,
    title: String,
    content: String,
    content_preview: String,
    resource_id: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    deleted_at: Option<DateTime<Utc>>
});

impl GenerationHistory {
    pub fn new(
        user_id: String,
        notebook_id: Option<String>,
        history_type: String,
        title: String,
        content: String,
        resource_id: Option<String>,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        let content_preview = content.chars().take(PREVIEW_CHARS).collect();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            notebook_id,
            history_type,
            title,
            content,
            content_preview,
            resource_id,
            metadata,
            deleted_at: None,
        }
    }

    pub async fn record(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.store_item(self).await?;
        Ok(())
    }

    /// Rows for a user within the retention window, newest first.
    pub async fn list_recent_for_user(
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let cutoff = Utc::now() - chrono::Duration::days(RETENTION_DAYS);
        let rows: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM generation_history WHERE user_id = $user_id AND deleted_at IS NONE AND created_at > $cutoff ORDER BY created_at DESC",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("cutoff", surrealdb::sql::Datetime::from(cutoff)))
            .await?
            .take(0)?;
        Ok(rows)
    }
}
