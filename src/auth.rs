use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{http_objects::ApiError, routes::RouteState};

/// Bearer-token authentication for management endpoints.
///
/// Checks the `Authorization` header against the configured token list.
/// When no list is configured, authentication is disabled and every
/// request passes. This is request-level authentication only; upload
/// capability is the bucket-scoped upload token, resolved separately.
pub async fn bearer_auth(
    State(state): State<RouteState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(tokens) = state.api_tokens.as_ref() else {
        return next.run(request).await;
    };
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if authorized(header, tokens) {
        next.run(request).await
    } else {
        ApiError::unauthorized().into_response()
    }
}

fn authorized(header: Option<&str>, tokens: &[String]) -> bool {
    header
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| tokens.iter().any(|t| t == token))
        .unwrap_or(false)
}
