use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::message::{CloseReason, Outbound};
use crate::models::request::{RequestId, RequestStatus};

/// Every failure is reported back to the session that triggered it; none of
/// these variants ever aborts the dispatch loop.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request {0} not found")]
    NotFound(RequestId),

    #[error("request {id} is no longer pending ({status:?})")]
    InvalidState {
        id: RequestId,
        status: RequestStatus,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no providers available with a known location")]
    NoCandidates,

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Wire reason reported for this failure.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            DispatchError::NotFound(_) => CloseReason::NotFound,
            DispatchError::InvalidState { status, .. } => match status {
                RequestStatus::Accepted => CloseReason::AlreadyAssigned,
                RequestStatus::Expired => CloseReason::Expired,
                _ => CloseReason::NotFound,
            },
            DispatchError::InvalidInput(_) => CloseReason::InvalidInput,
            DispatchError::NoCandidates => CloseReason::NoCandidates,
            DispatchError::Internal(_) => CloseReason::Internal,
        }
    }

    /// Wire-level event delivered to the triggering session. Failed accepts
    /// become `requestClosed` with a reason distinguishing not-found,
    /// already-assigned, and expired; the rest surface as typed errors.
    pub fn into_outbound(self) -> Outbound {
        let reason = self.close_reason();
        match self {
            DispatchError::NotFound(request_id)
            | DispatchError::InvalidState {
                id: request_id, ..
            } => Outbound::RequestClosed { request_id, reason },
            other => Outbound::Error {
                reason,
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::InvalidState { .. } => StatusCode::CONFLICT,
            DispatchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            DispatchError::NoCandidates => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
