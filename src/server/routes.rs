use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Method},
    Json,
};
use serde::Serialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::{
    regen::{CycleOutcome, CycleSummary},
    server::{error::ApiError, AppState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    /// Accounts were updated but the audit trail is incomplete.
    Partial,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleResponse {
    pub success: bool,
    pub status: CycleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(flatten)]
    pub summary: CycleSummary,
}

impl From<CycleOutcome> for CycleResponse {
    fn from(outcome: CycleOutcome) -> Self {
        match outcome {
            CycleOutcome::Completed(summary) => Self {
                success: true,
                status: CycleStatus::Completed,
                warning: None,
                summary,
            },
            CycleOutcome::AuditIncomplete { summary, error } => Self {
                success: true,
                status: CycleStatus::Partial,
                warning: Some(format!("Accounts were updated but the audit trail is incomplete: {}", error)),
                summary,
            },
        }
    }
}

pub async fn regenerate_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
) -> Result<Json<CycleResponse>, ApiError> {
    // `get` routes also answer HEAD
    if method != Method::GET {
        return Err(ApiError::MethodNotAllowed);
    }
    authorize(&headers, state.secret.as_deref())?;

    info!("Regeneration triggered over HTTP");
    let cancel = state.shutdown.child_token();
    let outcome = state.service.run_cycle(&cancel).await?;

    Ok(Json(outcome.into()))
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Accepts either `Bearer <secret>` or the bare secret. With no secret
/// configured every caller is accepted.
fn authorize(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim());

    match presented {
        Some(value) if bool::from(expected.as_bytes().ct_eq(value.as_bytes())) => Ok(()),
        Some(_) => {
            warn!("Rejected trigger with invalid secret");
            Err(ApiError::Unauthorized)
        }
        None => {
            warn!("Rejected trigger without Authorization header");
            Err(ApiError::Unauthorized)
        }
    }
}
