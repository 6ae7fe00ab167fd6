use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use common::storage::types::{
    conversation::{ChatMode, Conversation},
    user::User,
};
use serde::Deserialize;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub notebook_id: String,
    pub title: Option<String>,
    #[serde(default)]
    pub mode: ChatMode,
    pub source_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    pub notebook_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default = "default_use_rag")]
    pub use_rag: bool,
}

fn default_use_rag() -> bool {
    true
}

pub async fn create_conversation(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(body): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .chat_service()
        .create_conversation(
            &body.notebook_id,
            &user.id,
            body.title,
            body.mode,
            body.source_id,
        )
        .await
        .map_err(ApiError::from)?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn list_conversations(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListConversationsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = Conversation::list_by_notebook(&query.notebook_id, &user.id, &state.db)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = Conversation::get_for_user(&id, &user.id, &state.db)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(conversation))
}

pub async fn send_message(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.content.trim().is_empty() {
        return Err(ApiError::Validation(
            "Message content must not be empty".to_string(),
        ));
    }

    let service = state.chat_service();
    let message = if body.use_rag {
        service
            .send_message_with_rag(&id, &user.id, &body.content)
            .await
    } else {
        service
            .send_message_with_context(&id, &user.id, &body.content)
            .await
    }
    .map_err(ApiError::from)?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn list_messages(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .chat_service()
        .list_messages(&id, &user.id)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(messages))
}
