//! Wire contract carried by the channel bridge. Inbound messages arrive from
//! provider and requester sessions; outbound events are pushed back out on a
//! session's queue. Transport mechanics live in `api::rest::ws`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::provider::{GeoPoint, SessionId};
use crate::models::request::{RequestId, RequestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Inbound {
    RegisterProvider {
        #[serde(default)]
        info: Option<Value>,
    },
    UpdateProviderInfo {
        info: Value,
    },
    UpdateProviderLocation {
        lat: f64,
        lng: f64,
    },
    RequestService {
        origin: GeoPoint,
        dest: GeoPoint,
        #[serde(default)]
        requester_info: Option<Value>,
    },
    RequestUpdate {
        request_id: RequestId,
        decision: Decision,
        #[serde(default)]
        provider_info: Option<Value>,
    },
    CancelTrip {
        request_id: RequestId,
    },
    EndTrip {
        request_id: RequestId,
    },
    RequesterLocation {
        lat: f64,
        lng: f64,
    },
}

/// Status values carried on `requestUpdate` notifications to the requester.
/// `Rejected` is informational (one candidate declined, request still open)
/// and is never stored on the request itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeStatus {
    Accepted,
    Rejected,
    RejectedAll,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    NotFound,
    AlreadyAssigned,
    Expired,
    Taken,
    NoCandidates,
    InvalidInput,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outbound {
    RequestCreated {
        request_id: RequestId,
        status: RequestStatus,
    },
    ReceiveRequest {
        request_id: RequestId,
        origin: GeoPoint,
        dest: GeoPoint,
        #[serde(skip_serializing_if = "Option::is_none")]
        requester_info: Option<Value>,
    },
    RequestUpdate {
        request_id: RequestId,
        status: NoticeStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider_id: Option<SessionId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider_info: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider_location: Option<GeoPoint>,
    },
    RequestClosed {
        request_id: RequestId,
        reason: CloseReason,
    },
    TripEnded {
        request_id: RequestId,
    },
    TripCanceled {
        request_id: RequestId,
    },
    ProviderLocationUpdate {
        request_id: RequestId,
        location: GeoPoint,
    },
    Error {
        reason: CloseReason,
        message: String,
    },
}
