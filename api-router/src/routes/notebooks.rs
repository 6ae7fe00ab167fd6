use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use common::storage::types::{notebook::Notebook, user::User};
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct CreateNotebookRequest {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNotebookRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

pub async fn create_notebook(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(body): Json<CreateNotebookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.title.trim().is_empty() {
        return Err(ApiError::Validation("Title must not be empty".to_string()));
    }

    let notebook = Notebook::new(user.id, body.title, body.description);
    state
        .db
        .store_item(notebook.clone())
        .await
        .map_err(common::error::AppError::from)
        .map_err(ApiError::from)?;

    Ok((StatusCode::CREATED, Json(notebook)))
}

pub async fn list_notebooks(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    let notebooks = Notebook::list_by_owner(&user.id, &state.db)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(notebooks))
}

pub async fn get_notebook(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let notebook = Notebook::get_owned(&id, &user.id, &state.db, false)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(notebook))
}

pub async fn update_notebook(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Json(body): Json<UpdateNotebookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let notebook = Notebook::update_details(&id, &user.id, body.title, body.description, &state.db)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(notebook))
}

pub async fn delete_notebook(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Notebook::soft_delete(&id, &user.id, &state.db)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(json!({ "success": true })))
}

pub async fn restore_notebook(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let notebook = Notebook::restore(&id, &user.id, &state.db)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(notebook))
}
