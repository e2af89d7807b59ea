use axum::{
    http::{header::ALLOW, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use crate::error::RegenError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Missing or invalid trigger secret")]
    Unauthorized,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Regeneration cycle failed: {0}")]
    CycleFailed(#[from] RegenError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "error": self.to_string() })),
            )
                .into_response(),

            ApiError::MethodNotAllowed => {
                let mut response = (
                    StatusCode::METHOD_NOT_ALLOWED,
                    Json(json!({ "success": false, "error": self.to_string() })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(ALLOW, HeaderValue::from_static("GET"));
                response
            }

            // Nothing was mutated, so the counts are known to be zero.
            ApiError::CycleFailed(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "status": "failed",
                    "error": self.to_string(),
                    "accountsUpdated": 0,
                    "bonusesGranted": 0,
                    "errors": [],
                    "timestamp": Utc::now(),
                })),
            )
                .into_response(),
        }
    }
}
