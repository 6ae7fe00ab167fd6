use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use common::storage::{cache::WindowDecision, types::user::User};
use tracing::error;

use crate::{api_state::ApiState, error::error_body};

/// Probe and docs paths are never rate limited.
const EXEMPT_SUFFIXES: [&str; 6] = [
    "/health",
    "/readiness",
    "/live",
    "/openapi.json",
    "/docs",
    "/redoc",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub period: Duration,
}

/// Parse a `N/period` limit string (period in second/minute/hour/day).
/// Unparseable input falls back to 100/hour.
pub fn parse_rate_limit(raw: &str) -> RateLimit {
    let fallback = RateLimit {
        limit: 100,
        period: Duration::from_secs(3_600),
    };

    let Some((count, period_name)) = raw.split_once('/') else {
        error!(raw, "failed to parse rate limit string, using 100/hour");
        return fallback;
    };
    let Ok(limit) = count.trim().parse::<u64>() else {
        error!(raw, "failed to parse rate limit count, using 100/hour");
        return fallback;
    };

    let period_secs = match period_name.trim().to_ascii_lowercase().as_str() {
        "second" => 1,
        "minute" => 60,
        "hour" => 3_600,
        "day" => 86_400,
        _ => 3_600,
    };

    RateLimit {
        limit,
        period: Duration::from_secs(period_secs),
    }
}

fn is_exempt(path: &str) -> bool {
    EXEMPT_SUFFIXES.iter().any(|suffix| path.ends_with(suffix))
}

/// Identity for the counter key: the authenticated user when the auth layer
/// already ran, else the first hop of X-Forwarded-For, else the bare peer.
/// This middleware sits outside auth, so the user extension is usually
/// absent and the address fallback is the common case.
fn identity_of(request: &Request) -> String {
    if let Some(user) = request.extensions().get::<User>() {
        return format!("user:{}", user.id);
    }

    if let Some(forwarded) = request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first_hop) = forwarded.split(',').next() {
            return format!("ip:{}", first_hop.trim());
        }
    }

    "ip:unknown".to_string()
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn apply_headers(response: &mut Response, limit: u64, decision: &WindowDecision) {
    let headers = response.headers_mut();
    headers.insert(
        "X-RateLimit-Limit",
        HeaderValue::from_str(&limit.to_string()).unwrap_or(HeaderValue::from_static("0")),
    );
    headers.insert(
        "X-RateLimit-Remaining",
        HeaderValue::from_str(&decision.remaining.to_string())
            .unwrap_or(HeaderValue::from_static("0")),
    );
    headers.insert(
        "X-RateLimit-Reset",
        HeaderValue::from_str(&decision.reset_epoch_secs.to_string())
            .unwrap_or(HeaderValue::from_static("0")),
    );
}

pub async fn rate_limit(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_exempt(&path) {
        return next.run(request).await;
    }

    // Source uploads get their own, stricter budget.
    let policy = if request.method() == Method::POST && path.ends_with("/sources") {
        parse_rate_limit(&state.config.rate_limit_document_upload)
    } else {
        parse_rate_limit(&state.config.rate_limit_default)
    };

    let identity = identity_of(&request);
    let key = format!("rate_limit:{identity}:{path}");

    match state
        .cache
        .incr_fixed_window(&key, policy.limit, policy.period)
        .await
    {
        Ok(decision) if !decision.allowed => {
            let retry_after = decision.reset_epoch_secs.saturating_sub(now_epoch_secs());
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                error_body(
                    "RATE_LIMIT_EXCEEDED",
                    "Too many requests. Please try again later.",
                    Some(serde_json::json!({ "retry_after": retry_after })),
                ),
            )
                .into_response();
            apply_headers(&mut response, policy.limit, &decision);
            response
        }
        Ok(decision) => {
            let mut response = next.run(request).await;
            apply_headers(&mut response, policy.limit, &decision);
            response
        }
        Err(err) => {
            // Availability outranks strict enforcement: on cache failure the
            // request is allowed and the error logged.
            error!(error = %err, "rate limit check failed, failing open");
            next.run(request).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_periods() {
        assert_eq!(
            parse_rate_limit("100/hour"),
            RateLimit {
                limit: 100,
                period: Duration::from_secs(3_600)
            }
        );
        assert_eq!(
            parse_rate_limit("10/day"),
            RateLimit {
                limit: 10,
                period: Duration::from_secs(86_400)
            }
        );
        assert_eq!(
            parse_rate_limit("2/minute"),
            RateLimit {
                limit: 2,
                period: Duration::from_secs(60)
            }
        );
        assert_eq!(
            parse_rate_limit("5/second"),
            RateLimit {
                limit: 5,
                period: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn malformed_limits_fall_back() {
        let fallback = RateLimit {
            limit: 100,
            period: Duration::from_secs(3_600),
        };
        assert_eq!(parse_rate_limit("garbage"), fallback);
        assert_eq!(parse_rate_limit("x/hour"), fallback);
        assert_eq!(
            parse_rate_limit("7/fortnight"),
            RateLimit {
                limit: 7,
                period: Duration::from_secs(3_600)
            }
        );
    }

    #[test]
    fn probe_paths_are_exempt() {
        assert!(is_exempt("/api/v1/health"));
        assert!(is_exempt("/api/v1/readiness"));
        assert!(is_exempt("/api/v1/live"));
        assert!(is_exempt("/docs"));
        assert!(!is_exempt("/api/v1/notebooks"));
    }

    #[test]
    fn forwarded_for_uses_first_hop() {
        let request = Request::builder()
            .uri("/api/v1/notebooks")
            .header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(identity_of(&request), "ip:203.0.113.7");
    }

    #[test]
    fn missing_identity_falls_back_to_unknown() {
        let request = Request::builder()
            .uri("/api/v1/notebooks")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(identity_of(&request), "ip:unknown");
    }
}
