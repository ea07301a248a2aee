use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Connection-scoped identity, minted by the channel bridge when a socket
/// connects. Stable only for the lifetime of that session; a reconnect gets a
/// fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// A connected tow operator. `info` is an opaque payload (name, contact,
/// vehicle attributes) relayed to requesters but never validated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: SessionId,
    pub location: Option<GeoPoint>,
    pub info: Option<Value>,
    /// Monotonic registration order, used as the matcher's tie-break.
    #[serde(skip)]
    pub registered_seq: u64,
    pub updated_at: DateTime<Utc>,
}
