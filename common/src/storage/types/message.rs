#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

stored_object!(Message, "message", {
    conversation_id: String,
    role: MessageRole,
    content: String,
    #[serde(default)]
    chunk_ids: Vec<String>,
    #[serde(default)]
    metadata: serde_json::Value
});

impl Message {
    pub fn new(
        conversation_id: String,
        role: MessageRole,
        content: String,
        chunk_ids: Vec<String>,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            conversation_id,
            role,
            content,
            chunk_ids,
            metadata,
        }
    }

    /// Persist one conversational turn: the user message and the assistant
    /// reply land in a single transaction, user first.
    pub async fn store_turn(
        user_message: Message,
        assistant_message: Message,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "CREATE type::thing('{table}', $user_id) CONTENT $user_message;",
                table = Self::table_name(),
            ))
            .query(format!(
                "CREATE type::thing('{table}', $assistant_id) CONTENT $assistant_message;",
                table = Self::table_name(),
            ))
            .query("COMMIT TRANSACTION;")
            .bind(("user_id", user_message.id.clone()))
            .bind(("user_message", user_message))
            .bind(("assistant_id", assistant_message.id.clone()))
            .bind(("assistant_message", assistant_message))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn list_by_conversation(
        conversation_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let messages: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM message WHERE conversation_id = $conversation_id ORDER BY created_at ASC",
            )
            .bind(("conversation_id", conversation_id.to_string()))
            .await?
            .take(0)?;
        Ok(messages)
    }

    /// The most recent `limit` messages in chronological order.
    pub async fn recent_for_conversation(
        conversation_id: &str,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut messages = Self::list_by_conversation(conversation_id, db).await?;
        if messages.len() > limit {
            messages = messages.split_off(messages.len() - limit);
        }
        Ok(messages)
    }
}
