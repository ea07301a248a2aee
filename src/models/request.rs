use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::provider::{GeoPoint, SessionId};

/// Unique per request; uniqueness is the requirement, not secrecy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    RejectedAll,
    Expired,
    Completed,
    Canceled,
}

impl RequestStatus {
    /// Terminal states admit no further transition.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending | RequestStatus::Accepted)
    }
}

/// An in-flight service request. Owned exclusively by the request store;
/// the dispatch engine mutates it only through store operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: RequestId,
    pub requester: SessionId,
    pub origin: GeoPoint,
    pub dest: GeoPoint,
    pub status: RequestStatus,
    /// Set exactly once, on the transition to `Accepted`.
    pub assigned_provider: Option<SessionId>,
    /// Providers notified about this request, fixed at creation time.
    pub candidates: Vec<SessionId>,
    /// Candidates that have declined so far.
    pub rejected: Vec<SessionId>,
    pub requester_info: Option<Value>,
    pub provider_info: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
