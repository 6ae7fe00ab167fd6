use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use common::{llm::MindmapFormat, storage::types::user::User};
use retrieval_pipeline::generation::GenerationTarget;
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

const QUIZ_SIZES: [u32; 5] = [10, 20, 30, 40, 50];
const DIFFICULTIES: [&str; 6] = ["novice", "intermediate", "master", "easy", "medium", "hard"];

#[derive(Debug, Default, Deserialize)]
pub struct GenerateParams {
    pub num_questions: Option<u32>,
    pub difficulty: Option<String>,
    pub max_length: Option<usize>,
    pub style: Option<String>,
    pub topic: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MindmapFromTextRequest {
    pub text: String,
    #[serde(default = "default_mindmap_format")]
    pub format: String,
}

fn default_mindmap_format() -> String {
    "json".to_string()
}

pub async fn generate_for_source(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path((source_id, kind)): Path<(String, String)>,
    Json(params): Json<GenerateParams>,
) -> Result<impl IntoResponse, ApiError> {
    run_generation(
        &state,
        &user,
        GenerationTarget::Source(source_id),
        &kind,
        params,
    )
    .await
}

pub async fn generate_for_notebook(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path((notebook_id, kind)): Path<(String, String)>,
    Json(params): Json<GenerateParams>,
) -> Result<impl IntoResponse, ApiError> {
    run_generation(
        &state,
        &user,
        GenerationTarget::Notebook(notebook_id),
        &kind,
        params,
    )
    .await
}

pub async fn generate_mindmap_from_text(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(body): Json<MindmapFromTextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let format = parse_mindmap_format(&body.format)?;
    let artifact = state
        .generation_service()
        .generate_mindmap_from_text(&user.id, &body.text, format)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(json!({ "success": true, "mindmap": artifact })))
}

async fn run_generation(
    state: &ApiState,
    user: &User,
    target: GenerationTarget,
    kind: &str,
    params: GenerateParams,
) -> Result<axum::response::Response, ApiError> {
    let service = state.generation_service();

    let response = match kind {
        "summary" => {
            let summary = service
                .generate_summary(
                    target,
                    &user.id,
                    params.max_length.unwrap_or(500),
                    params.style.as_deref().unwrap_or("concise"),
                )
                .await
                .map_err(ApiError::from)?;
            Json(json!({ "success": true, "summary": summary })).into_response()
        }
        "quiz" => {
            let num_questions = params.num_questions.unwrap_or(10);
            if !QUIZ_SIZES.contains(&num_questions) {
                return Err(ApiError::Validation(format!(
                    "num_questions must be one of {QUIZ_SIZES:?}"
                )));
            }
            let difficulty = params
                .difficulty
                .unwrap_or_else(|| "intermediate".to_string());
            if !DIFFICULTIES.contains(&difficulty.to_ascii_lowercase().as_str()) {
                return Err(ApiError::Validation(format!(
                    "difficulty must be one of {DIFFICULTIES:?}"
                )));
            }

            let quiz = service
                .generate_quiz(target, &user.id, num_questions, &difficulty)
                .await
                .map_err(ApiError::from)?;
            Json(json!({ "success": true, "quiz": quiz })).into_response()
        }
        "guide" => {
            let guide = service
                .generate_study_guide(
                    target,
                    &user.id,
                    params.topic.as_deref(),
                    params.format.as_deref().unwrap_or("structured"),
                )
                .await
                .map_err(ApiError::from)?;
            Json(json!({ "success": true, "guide": guide })).into_response()
        }
        "mindmap" => {
            let format = parse_mindmap_format(params.format.as_deref().unwrap_or("json"))?;
            let artifact = service
                .generate_mindmap(target, &user.id, format)
                .await
                .map_err(ApiError::from)?;
            Json(json!({ "success": true, "mindmap": artifact })).into_response()
        }
        other => {
            return Err(ApiError::NotFound(format!(
                "Unknown generation kind: {other}"
            )));
        }
    };

    Ok(response)
}

fn parse_mindmap_format(raw: &str) -> Result<MindmapFormat, ApiError> {
    raw.parse::<MindmapFormat>().map_err(ApiError::Validation)
}
