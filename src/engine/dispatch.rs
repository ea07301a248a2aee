//! Orchestration layer: one handler per inbound message. Handlers mutate
//! state only through the registry and request store, and push notifications
//! through the session map; a failed delivery never rolls a transition back.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::engine::{expiry, matcher};
use crate::error::DispatchError;
use crate::models::message::{CloseReason, Decision, Inbound, NoticeStatus, Outbound};
use crate::models::provider::{GeoPoint, SessionId};
use crate::models::request::{RequestId, RequestStatus};
use crate::state::AppState;

/// Entry point for every inbound message on a session. Errors are returned to
/// the channel bridge, which reports them to the sender alone.
pub fn handle_message(
    state: &Arc<AppState>,
    session: SessionId,
    message: Inbound,
) -> Result<(), DispatchError> {
    match message {
        Inbound::RegisterProvider { info } => {
            register_provider(state, session, info);
            Ok(())
        }
        Inbound::UpdateProviderInfo { info } => {
            state.registry.update_info(session, info);
            Ok(())
        }
        Inbound::UpdateProviderLocation { lat, lng } => {
            update_provider_location(state, session, GeoPoint { lat, lng })
        }
        Inbound::RequestService {
            origin,
            dest,
            requester_info,
        } => request_service(state, session, origin, dest, requester_info),
        Inbound::RequestUpdate {
            request_id,
            decision,
            provider_info,
        } => match decision {
            Decision::Accepted => accept_request(state, session, request_id, provider_info),
            Decision::Rejected => reject_request(state, session, request_id),
        },
        Inbound::CancelTrip { request_id } => cancel_trip(state, request_id),
        Inbound::EndTrip { request_id } => end_trip(state, request_id),
        Inbound::RequesterLocation { lat, lng } => {
            requester_location(state, session, GeoPoint { lat, lng })
        }
    }
}

/// Disconnect of either party. The provider (if it was one) leaves the
/// registry; requests referencing the session are deliberately left to their
/// own lifecycle, to be resolved by TTL or by the surviving party.
pub fn handle_disconnect(state: &Arc<AppState>, session: SessionId) {
    if state.registry.unregister(&session) {
        state
            .metrics
            .providers_online
            .set(state.registry.len() as i64);
        info!(session = %session, "provider unregistered on disconnect");
    }
}

fn register_provider(state: &Arc<AppState>, session: SessionId, info: Option<Value>) {
    state.registry.register(session, info);
    state
        .metrics
        .providers_online
        .set(state.registry.len() as i64);
    info!(session = %session, "provider registered");
}

fn update_provider_location(
    state: &Arc<AppState>,
    session: SessionId,
    location: GeoPoint,
) -> Result<(), DispatchError> {
    validate_point(&location)?;
    state.registry.update_location(session, location);
    Ok(())
}

fn request_service(
    state: &Arc<AppState>,
    session: SessionId,
    origin: GeoPoint,
    dest: GeoPoint,
    requester_info: Option<Value>,
) -> Result<(), DispatchError> {
    validate_point(&origin)?;
    validate_point(&dest)?;

    let snapshot = state.registry.snapshot();
    let candidates = matcher::select_candidates(&origin, &snapshot, state.config.fanout_size);
    let request = state.requests.create(
        session,
        origin,
        dest,
        requester_info.clone(),
        candidates.clone(),
        state.config.request_ttl,
    );
    expiry::schedule_expiry(state.clone(), request.id, state.config.request_ttl);

    state.metrics.requests_pending.inc();
    state
        .metrics
        .request_fanout_size
        .observe(candidates.len() as f64);

    for candidate in &candidates {
        state.notify(
            candidate,
            Outbound::ReceiveRequest {
                request_id: request.id,
                origin,
                dest,
                requester_info: requester_info.clone(),
            },
        );
    }

    state.notify(
        &session,
        Outbound::RequestCreated {
            request_id: request.id,
            status: RequestStatus::Pending,
        },
    );

    // distinct from "all candidates rejected": nobody was even asked
    if candidates.is_empty() {
        let err = DispatchError::NoCandidates;
        warn!(request_id = %request.id, error = %err, "request created with nobody to ask");
        state.notify(
            &session,
            Outbound::RequestClosed {
                request_id: request.id,
                reason: err.close_reason(),
            },
        );
    }

    info!(
        request_id = %request.id,
        candidates = candidates.len(),
        "service request dispatched"
    );
    Ok(())
}

fn accept_request(
    state: &Arc<AppState>,
    session: SessionId,
    request_id: RequestId,
    provider_info: Option<Value>,
) -> Result<(), DispatchError> {
    let accepted = state
        .requests
        .try_accept(&request_id, session, provider_info)?;

    state.metrics.requests_pending.dec();
    state
        .metrics
        .requests_total
        .with_label_values(&["accepted"])
        .inc();

    let provider = state.registry.get(&session);
    let provider_info = accepted
        .provider_info
        .clone()
        .or_else(|| provider.as_ref().and_then(|p| p.info.clone()));
    let provider_location = provider.as_ref().and_then(|p| p.location);

    state.notify(
        &accepted.requester,
        Outbound::RequestUpdate {
            request_id,
            status: NoticeStatus::Accepted,
            provider_id: Some(session),
            provider_info,
            provider_location,
        },
    );

    // Close out the notified candidates plus, conservatively, every other
    // currently registered provider; the winner's identity is not revealed.
    let mut losers: HashSet<SessionId> = accepted.candidates.iter().copied().collect();
    losers.extend(state.registry.session_ids());
    losers.remove(&session);

    for loser in losers {
        state.notify(
            &loser,
            Outbound::RequestClosed {
                request_id,
                reason: CloseReason::Taken,
            },
        );
    }

    info!(request_id = %request_id, provider = %session, "request accepted");
    Ok(())
}

fn reject_request(
    state: &Arc<AppState>,
    session: SessionId,
    request_id: RequestId,
) -> Result<(), DispatchError> {
    let (request, all_rejected) = state.requests.record_reject(&request_id, session)?;

    if all_rejected {
        state.metrics.requests_pending.dec();
        state
            .metrics
            .requests_total
            .with_label_values(&["rejected-all"])
            .inc();
        state.notify(
            &request.requester,
            Outbound::RequestUpdate {
                request_id,
                status: NoticeStatus::RejectedAll,
                provider_id: None,
                provider_info: None,
                provider_location: None,
            },
        );
        info!(request_id = %request_id, "all candidates declined");
    } else {
        // informational relay; the request stays open to the other candidates
        state.notify(
            &request.requester,
            Outbound::RequestUpdate {
                request_id,
                status: NoticeStatus::Rejected,
                provider_id: Some(session),
                provider_info: None,
                provider_location: None,
            },
        );
    }
    Ok(())
}

fn cancel_trip(state: &Arc<AppState>, request_id: RequestId) -> Result<(), DispatchError> {
    let request = state.requests.cancel(&request_id)?;

    if request.assigned_provider.is_none() {
        state.metrics.requests_pending.dec();
    }
    state
        .metrics
        .requests_total
        .with_label_values(&["canceled"])
        .inc();

    state.notify(&request.requester, Outbound::TripCanceled { request_id });
    if let Some(provider) = request.assigned_provider {
        state.notify(&provider, Outbound::TripCanceled { request_id });
    }

    info!(request_id = %request_id, "trip canceled");
    Ok(())
}

fn end_trip(state: &Arc<AppState>, request_id: RequestId) -> Result<(), DispatchError> {
    let request = state.requests.complete(&request_id)?;

    if request.assigned_provider.is_none() {
        state.metrics.requests_pending.dec();
    }
    state
        .metrics
        .requests_total
        .with_label_values(&["completed"])
        .inc();

    state.notify(&request.requester, Outbound::TripEnded { request_id });
    if let Some(provider) = request.assigned_provider {
        state.notify(&provider, Outbound::TripEnded { request_id });
    }

    info!(request_id = %request_id, "trip ended");
    Ok(())
}

/// Live requester location goes to the assigned provider of the requester's
/// accepted request only, never broadcast. Without an active trip the report
/// is dropped.
fn requester_location(
    state: &Arc<AppState>,
    session: SessionId,
    location: GeoPoint,
) -> Result<(), DispatchError> {
    validate_point(&location)?;

    if let Some(request) = state.requests.find_accepted_by_requester(&session) {
        if let Some(provider) = request.assigned_provider {
            state.notify(
                &provider,
                Outbound::ProviderLocationUpdate {
                    request_id: request.id,
                    location,
                },
            );
        }
    }
    Ok(())
}

fn validate_point(point: &GeoPoint) -> Result<(), DispatchError> {
    let lat_ok = point.lat.is_finite() && (-90.0..=90.0).contains(&point.lat);
    let lng_ok = point.lng.is_finite() && (-180.0..=180.0).contains(&point.lng);

    if lat_ok && lng_ok {
        Ok(())
    } else {
        Err(DispatchError::InvalidInput(format!(
            "coordinates out of range: lat={}, lng={}",
            point.lat, point.lng
        )))
    }
}
