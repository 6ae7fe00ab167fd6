use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(StudyGuide, "study_guide", {
    notebook_id: String,
    user_id: String,
    source_id: Option<String>,
    title: String,
    content: String,
    format: String,
    model: String,
    version: u32,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    deleted_at: Option<DateTime<Utc>>
});

impl StudyGuide {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        notebook_id: String,
        user_id: String,
        source_id: Option<String>,
        title: String,
        content: String,
        format: String,
        model: String,
        version: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            notebook_id,
            user_id,
            source_id,
            title,
            content,
            format,
            model,
            version,
            deleted_at: None,
        }
    }

    pub async fn next_version(notebook_id: &str, db: &SurrealDbClient) -> Result<u32, AppError> {
        let max: Option<u32> = db
            .client
            .query("RETURN math::max((SELECT VALUE version FROM study_guide WHERE notebook_id = $notebook_id))")
            .bind(("notebook_id", notebook_id.to_string()))
            .await?
            .take(0)?;
        Ok(max.unwrap_or(0) + 1)
    }
}
