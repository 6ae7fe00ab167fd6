use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ChatMode {
    Chat,
    Tutor,
    FactChecker,
    Brainstormer,
}

impl Default for ChatMode {
    fn default() -> Self {
        Self::Chat
    }
}

stored_object!(Conversation, "conversation", {
    notebook_id: String,
    user_id: String,
    title: Option<String>,
    #[serde(default)]
    mode: ChatMode,
    source_id: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    deleted_at: Option<DateTime<Utc>>
});

impl Conversation {
    pub fn new(
        notebook_id: String,
        user_id: String,
        title: Option<String>,
        mode: ChatMode,
        source_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            notebook_id,
            user_id,
            title,
            mode,
            source_id,
            deleted_at: None,
        }
    }

    /// Fetch a conversation for a user. Anything the user does not own is
    /// reported as NotFound, never as a permission error.
    pub async fn get_for_user(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let conversation: Option<Self> = db.get_item(id).await?;

        conversation
            .filter(|c| c.user_id == user_id && c.deleted_at.is_none())
            .ok_or_else(|| AppError::NotFound(format!("Conversation {id} not found")))
    }

    pub async fn list_by_notebook(
        notebook_id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let conversations: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM conversation WHERE notebook_id = $notebook_id AND user_id = $user_id AND deleted_at IS NONE ORDER BY created_at DESC",
            )
            .bind(("notebook_id", notebook_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;
        Ok(conversations)
    }
}
