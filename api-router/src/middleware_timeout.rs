use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::{api_state::ApiState, error::error_body};

/// Enforce the per-request deadline. When it elapses the in-flight handler
/// future is dropped, which cancels its pending I/O cooperatively, and the
/// client receives a 504 envelope. Background work dispatched by handlers
/// is detached and unaffected.
pub async fn timeout_envelope(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let deadline = Duration::from_secs(state.config.request_timeout_seconds.max(1));
    let path = request.uri().path().to_string();

    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            error!(path, timeout_secs = deadline.as_secs(), "request timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                error_body(
                    "REQUEST_TIMEOUT",
                    &format!(
                        "Request processing timed out after {} seconds.",
                        deadline.as_secs()
                    ),
                    None,
                ),
            )
                .into_response()
        }
    }
}
