use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use tow_dispatch::api::rest::router;
use tow_dispatch::engine::dispatch;
use tow_dispatch::error::DispatchError;
use tow_dispatch::models::message::{CloseReason, Decision, Inbound, NoticeStatus, Outbound};
use tow_dispatch::models::provider::{GeoPoint, SessionId};
use tow_dispatch::models::request::{RequestId, RequestStatus};
use tow_dispatch::state::{AppState, DispatchConfig};

const TTL_MS: u64 = 30_000;

fn test_state() -> Arc<AppState> {
    Arc::new(AppState::new(DispatchConfig {
        fanout_size: 3,
        request_ttl: Duration::from_millis(TTL_MS),
    }))
}

fn connect(state: &Arc<AppState>) -> (SessionId, mpsc::UnboundedReceiver<Outbound>) {
    let session = SessionId::new();
    let rx = state.connect(session);
    (session, rx)
}

fn provider_at(
    state: &Arc<AppState>,
    lat: f64,
    lng: f64,
) -> (SessionId, mpsc::UnboundedReceiver<Outbound>) {
    let (session, rx) = connect(state);
    dispatch::handle_message(state, session, Inbound::RegisterProvider { info: None }).unwrap();
    dispatch::handle_message(
        state,
        session,
        Inbound::UpdateProviderLocation { lat, lng },
    )
    .unwrap();
    (session, rx)
}

fn request_at(state: &Arc<AppState>, requester: SessionId, lat: f64, lng: f64) {
    dispatch::handle_message(
        state,
        requester,
        Inbound::RequestService {
            origin: GeoPoint { lat, lng },
            dest: GeoPoint {
                lat: lat + 0.1,
                lng: lng + 0.1,
            },
            requester_info: Some(json!({ "name": "stranded" })),
        },
    )
    .unwrap();
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn created_id(events: &[Outbound]) -> RequestId {
    events
        .iter()
        .find_map(|event| match event {
            Outbound::RequestCreated { request_id, .. } => Some(*request_id),
            _ => None,
        })
        .expect("requestCreated event")
}

fn accept(state: &Arc<AppState>, session: SessionId, id: RequestId) -> Result<(), DispatchError> {
    dispatch::handle_message(
        state,
        session,
        Inbound::RequestUpdate {
            request_id: id,
            decision: Decision::Accepted,
            provider_info: Some(json!({ "name": "tow" })),
        },
    )
}

fn reject(state: &Arc<AppState>, session: SessionId, id: RequestId) -> Result<(), DispatchError> {
    dispatch::handle_message(
        state,
        session,
        Inbound::RequestUpdate {
            request_id: id,
            decision: Decision::Rejected,
            provider_info: None,
        },
    )
}

#[tokio::test]
async fn fan_out_is_bounded_and_nearest_first() {
    let state = test_state();

    let mut providers = Vec::new();
    for i in 0..10 {
        // each one a little farther north of the origin
        providers.push(provider_at(&state, 10.0 + 0.001 * i as f64, 10.0));
    }
    let (requester, mut requester_rx) = connect(&state);

    request_at(&state, requester, 10.0, 10.0);

    let notified: Vec<bool> = providers
        .iter_mut()
        .map(|(_, rx)| {
            drain(rx)
                .iter()
                .any(|e| matches!(e, Outbound::ReceiveRequest { .. }))
        })
        .collect();

    assert_eq!(notified.iter().filter(|n| **n).count(), 3);
    assert_eq!(&notified[..3], &[true, true, true]);

    let events = drain(&mut requester_rx);
    assert!(matches!(
        events[0],
        Outbound::RequestCreated {
            status: RequestStatus::Pending,
            ..
        }
    ));
}

#[tokio::test]
async fn candidates_are_ranked_by_distance_from_origin() {
    let state = test_state();
    let (provider_a, _rx_a) = provider_at(&state, 10.0, 10.0);
    let (provider_b, _rx_b) = provider_at(&state, 10.01, 10.01);
    let (requester, mut requester_rx) = connect(&state);

    request_at(&state, requester, 10.0, 10.0);

    let id = created_id(&drain(&mut requester_rx));
    let request = state.requests.get(&id).unwrap();

    // A sits on the origin (0 km) and outranks B (~1.5 km)
    assert_eq!(request.candidates, vec![provider_a, provider_b]);
}

#[tokio::test]
async fn first_accept_wins_and_loser_is_closed_out() {
    let state = test_state();
    let (winner, mut winner_rx) = provider_at(&state, 10.0, 10.0);
    let (loser, mut loser_rx) = provider_at(&state, 10.01, 10.01);
    let (requester, mut requester_rx) = connect(&state);

    request_at(&state, requester, 10.0, 10.0);
    let id = created_id(&drain(&mut requester_rx));
    drain(&mut winner_rx);
    drain(&mut loser_rx);

    accept(&state, winner, id).unwrap();
    let err = accept(&state, loser, id).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::InvalidState {
            status: RequestStatus::Accepted,
            ..
        }
    ));

    let accepted_updates: Vec<_> = drain(&mut requester_rx)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                Outbound::RequestUpdate {
                    status: NoticeStatus::Accepted,
                    ..
                }
            )
        })
        .collect();
    assert_eq!(accepted_updates.len(), 1);

    match &accepted_updates[0] {
        Outbound::RequestUpdate {
            provider_id,
            provider_info,
            provider_location,
            ..
        } => {
            assert_eq!(*provider_id, Some(winner));
            assert!(provider_info.is_some());
            assert!(provider_location.is_some());
        }
        _ => unreachable!(),
    }

    assert!(drain(&mut loser_rx).iter().any(|e| matches!(
        e,
        Outbound::RequestClosed {
            reason: CloseReason::Taken,
            ..
        }
    )));

    assert_eq!(state.requests.get(&id).unwrap().assigned_provider, Some(winner));
}

#[tokio::test]
async fn rejection_keeps_request_open_for_other_candidates() {
    let state = test_state();
    let (decliner, _rx_a) = provider_at(&state, 10.0, 10.0);
    let (other, _rx_b) = provider_at(&state, 10.01, 10.01);
    let (requester, mut requester_rx) = connect(&state);

    request_at(&state, requester, 10.0, 10.0);
    let id = created_id(&drain(&mut requester_rx));

    reject(&state, decliner, id).unwrap();

    let events = drain(&mut requester_rx);
    assert!(events.iter().any(|e| matches!(
        e,
        Outbound::RequestUpdate {
            status: NoticeStatus::Rejected,
            provider_id: Some(p),
            ..
        } if *p == decliner
    )));
    assert_eq!(state.requests.get(&id).unwrap().status, RequestStatus::Pending);

    accept(&state, other, id).unwrap();
    assert_eq!(state.requests.get(&id).unwrap().assigned_provider, Some(other));
}

#[tokio::test]
async fn all_candidates_rejecting_yields_rejected_all() {
    let state = test_state();
    let (first, _rx_a) = provider_at(&state, 10.0, 10.0);
    let (second, _rx_b) = provider_at(&state, 10.01, 10.01);
    let (requester, mut requester_rx) = connect(&state);

    request_at(&state, requester, 10.0, 10.0);
    let id = created_id(&drain(&mut requester_rx));

    reject(&state, first, id).unwrap();
    reject(&state, second, id).unwrap();

    let events = drain(&mut requester_rx);
    assert!(events.iter().any(|e| matches!(
        e,
        Outbound::RequestUpdate {
            status: NoticeStatus::RejectedAll,
            ..
        }
    )));
    assert!(state.requests.get(&id).is_none());
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_expires_after_ttl() {
    let state = test_state();
    let (_provider, mut provider_rx) = provider_at(&state, 10.0, 10.0);
    let (requester, mut requester_rx) = connect(&state);

    request_at(&state, requester, 10.0, 10.0);
    let id = created_id(&drain(&mut requester_rx));

    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(TTL_MS + 1)).await;

    let events = drain(&mut requester_rx);
    assert!(events.iter().any(|e| matches!(
        e,
        Outbound::RequestUpdate {
            status: NoticeStatus::Expired,
            ..
        }
    )));
    assert!(state.requests.get(&id).is_none());

    // a late accept sees the request as gone
    let (late, _late_rx) = connect(&state);
    let err = accept(&state, late, id).unwrap_err();
    assert!(matches!(err, DispatchError::NotFound(_)));
    drain(&mut provider_rx);
}

#[tokio::test(start_paused = true)]
async fn acceptance_cancels_the_expiry_timer() {
    let state = test_state();
    let (provider, mut provider_rx) = provider_at(&state, 10.0, 10.0);
    let (requester, mut requester_rx) = connect(&state);

    request_at(&state, requester, 10.0, 10.0);
    let id = created_id(&drain(&mut requester_rx));
    drain(&mut provider_rx);

    accept(&state, provider, id).unwrap();
    drain(&mut requester_rx);

    tokio::time::sleep(Duration::from_millis(TTL_MS + 1)).await;

    let late_events = drain(&mut requester_rx);
    assert!(
        !late_events.iter().any(|e| matches!(
            e,
            Outbound::RequestUpdate {
                status: NoticeStatus::Expired,
                ..
            }
        )),
        "accepted request must not expire"
    );
    assert_eq!(state.requests.get(&id).unwrap().status, RequestStatus::Accepted);
}

#[tokio::test]
async fn cancel_is_not_repeatable() {
    let state = test_state();
    let (provider, mut provider_rx) = provider_at(&state, 10.0, 10.0);
    let (requester, mut requester_rx) = connect(&state);

    request_at(&state, requester, 10.0, 10.0);
    let id = created_id(&drain(&mut requester_rx));
    drain(&mut provider_rx);

    accept(&state, provider, id).unwrap();
    drain(&mut requester_rx);
    drain(&mut provider_rx);

    dispatch::handle_message(&state, requester, Inbound::CancelTrip { request_id: id }).unwrap();

    let err = dispatch::handle_message(&state, requester, Inbound::CancelTrip { request_id: id })
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotFound(_)));

    let canceled = |events: Vec<Outbound>| {
        events
            .into_iter()
            .filter(|e| matches!(e, Outbound::TripCanceled { .. }))
            .count()
    };
    assert_eq!(canceled(drain(&mut requester_rx)), 1);
    assert_eq!(canceled(drain(&mut provider_rx)), 1);
}

#[tokio::test]
async fn end_trip_notifies_both_parties() {
    let state = test_state();
    let (provider, mut provider_rx) = provider_at(&state, 10.0, 10.0);
    let (requester, mut requester_rx) = connect(&state);

    request_at(&state, requester, 10.0, 10.0);
    let id = created_id(&drain(&mut requester_rx));
    drain(&mut provider_rx);

    accept(&state, provider, id).unwrap();
    drain(&mut requester_rx);
    drain(&mut provider_rx);

    dispatch::handle_message(&state, requester, Inbound::EndTrip { request_id: id }).unwrap();

    assert!(drain(&mut requester_rx)
        .iter()
        .any(|e| matches!(e, Outbound::TripEnded { .. })));
    assert!(drain(&mut provider_rx)
        .iter()
        .any(|e| matches!(e, Outbound::TripEnded { .. })));
    assert!(state.requests.get(&id).is_none());
}

#[tokio::test]
async fn requester_location_goes_to_assigned_provider_only() {
    let state = test_state();
    let (assigned, mut assigned_rx) = provider_at(&state, 10.0, 10.0);
    let (bystander, mut bystander_rx) = provider_at(&state, 10.01, 10.01);
    let (requester, mut requester_rx) = connect(&state);

    request_at(&state, requester, 10.0, 10.0);
    let id = created_id(&drain(&mut requester_rx));
    accept(&state, assigned, id).unwrap();
    drain(&mut assigned_rx);
    drain(&mut bystander_rx);

    dispatch::handle_message(
        &state,
        requester,
        Inbound::RequesterLocation {
            lat: 10.02,
            lng: 10.02,
        },
    )
    .unwrap();

    assert!(drain(&mut assigned_rx).iter().any(|e| matches!(
        e,
        Outbound::ProviderLocationUpdate { request_id, .. } if *request_id == id
    )));
    assert!(drain(&mut bystander_rx).is_empty());
}

#[tokio::test]
async fn provider_info_update_keeps_location_and_reaches_requester() {
    let state = test_state();
    let (provider, mut provider_rx) = provider_at(&state, 10.0, 10.0);

    dispatch::handle_message(
        &state,
        provider,
        Inbound::UpdateProviderInfo {
            info: json!({ "plate": "22-J-314" }),
        },
    )
    .unwrap();

    // unlike re-registration, an info update leaves the location alone
    let stored = state.registry.get(&provider).unwrap();
    assert_eq!(stored.info, Some(json!({ "plate": "22-J-314" })));
    assert_eq!(
        stored.location,
        Some(GeoPoint {
            lat: 10.0,
            lng: 10.0
        })
    );

    // the refreshed info is what a requester sees on acceptance
    let (requester, mut requester_rx) = connect(&state);
    request_at(&state, requester, 10.0, 10.0);
    let id = created_id(&drain(&mut requester_rx));
    drain(&mut provider_rx);

    dispatch::handle_message(
        &state,
        provider,
        Inbound::RequestUpdate {
            request_id: id,
            decision: Decision::Accepted,
            provider_info: None,
        },
    )
    .unwrap();

    assert!(drain(&mut requester_rx).iter().any(|e| matches!(
        e,
        Outbound::RequestUpdate {
            status: NoticeStatus::Accepted,
            provider_info: Some(info),
            ..
        } if info["plate"] == "22-J-314"
    )));
}

#[tokio::test]
async fn no_candidates_is_reported_distinctly() {
    let state = test_state();
    // one provider connected but without a known location
    let (unlocated, mut unlocated_rx) = connect(&state);
    dispatch::handle_message(&state, unlocated, Inbound::RegisterProvider { info: None }).unwrap();

    let (requester, mut requester_rx) = connect(&state);
    request_at(&state, requester, 10.0, 10.0);

    let events = drain(&mut requester_rx);
    assert!(matches!(
        events[0],
        Outbound::RequestCreated {
            status: RequestStatus::Pending,
            ..
        }
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        Outbound::RequestClosed {
            reason: CloseReason::NoCandidates,
            ..
        }
    )));
    assert!(drain(&mut unlocated_rx).is_empty());
}

#[tokio::test]
async fn out_of_range_coordinates_are_rejected() {
    let state = test_state();
    let (session, _rx) = connect(&state);

    let err = dispatch::handle_message(
        &state,
        session,
        Inbound::UpdateProviderLocation {
            lat: 200.0,
            lng: 0.0,
        },
    )
    .unwrap_err();

    assert!(matches!(err, DispatchError::InvalidInput(_)));
}

#[tokio::test]
async fn disconnect_unregisters_provider_but_keeps_request() {
    let state = test_state();
    let (provider, mut provider_rx) = provider_at(&state, 10.0, 10.0);
    let (requester, mut requester_rx) = connect(&state);

    request_at(&state, requester, 10.0, 10.0);
    let id = created_id(&drain(&mut requester_rx));
    drain(&mut provider_rx);
    accept(&state, provider, id).unwrap();

    dispatch::handle_disconnect(&state, provider);
    state.disconnect(&provider);

    assert!(state.registry.get(&provider).is_none());
    // the accepted request is left to the surviving party or its own lifecycle
    assert_eq!(state.requests.get(&id).unwrap().status, RequestStatus::Accepted);
}

// HTTP surface

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let app = router(test_state());
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["providers"], 0);
    assert_eq!(body["requests"], 0);
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let app = router(test_state());
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("requests_pending"));
    assert!(body.contains("providers_online"));
}

#[tokio::test]
async fn get_unknown_request_returns_404() {
    let app = router(test_state());
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/requests/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn registered_providers_are_listed() {
    let state = test_state();
    let (session, _rx) = provider_at(&state, 10.0, 10.0);
    let app = router(state);

    let response = app.oneshot(get_request("/providers")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let providers = body.as_array().unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0]["id"], session.to_string());
    assert_eq!(providers[0]["location"]["lat"], 10.0);
}

#[tokio::test]
async fn pending_request_is_readable_over_http() {
    let state = test_state();
    let (_provider, _provider_rx) = provider_at(&state, 10.0, 10.0);
    let (requester, mut requester_rx) = connect(&state);

    request_at(&state, requester, 10.0, 10.0);
    let id = created_id(&drain(&mut requester_rx));

    let app = router(state);
    let response = app
        .oneshot(get_request(&format!("/requests/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "pending");
    assert!(body["assigned_provider"].is_null());
    assert_eq!(body["candidates"].as_array().unwrap().len(), 1);
}
