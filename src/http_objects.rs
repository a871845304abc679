use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use data_model::{AssetId, AssetMetadata};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Error surfaced to HTTP clients. Messages stay generic; backend detail
/// is logged, never returned.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status_code: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn forbidden(message: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn internal_server_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "An error occurred.")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("API Error: {} - {}", self.status_code, self.message);
        (self.status_code, self.message).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("internal error: {:?}", e);
        Self::internal_server_error()
    }
}

/// One row of the operational `GET /assets` listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct AssetListEntry {
    pub asset_id: AssetId,
    pub metadata: AssetMetadata,
}
