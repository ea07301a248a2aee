use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::models::message::{NoticeStatus, Outbound};
use crate::models::request::RequestId;
use crate::state::AppState;

/// Arm the TTL timer for a freshly created request. The spawned task's abort
/// handle is stored beside the request so that acceptance, cancellation, or
/// completion can cancel the timer; double-cancellation is a no-op.
pub fn schedule_expiry(state: Arc<AppState>, id: RequestId, ttl: Duration) {
    let task_state = state.clone();
    let handle = tokio::spawn(async move {
        sleep(ttl).await;
        fire(&task_state, id);
    });
    state.requests.arm_timer(id, handle.abort_handle());
}

fn fire(state: &Arc<AppState>, id: RequestId) {
    match state.requests.expire(&id) {
        Ok(expired) => {
            state.metrics.requests_pending.dec();
            state
                .metrics
                .requests_total
                .with_label_values(&["expired"])
                .inc();
            state.notify(
                &expired.requester,
                Outbound::RequestUpdate {
                    request_id: id,
                    status: NoticeStatus::Expired,
                    provider_id: None,
                    provider_info: None,
                    provider_location: None,
                },
            );
            info!(request_id = %id, "request expired unanswered");
        }
        // an accept, cancel, or completion won the race; nothing to do
        Err(err) => debug!(request_id = %id, error = %err, "expiry skipped"),
    }

    // if the timer fired before its handle was armed, drop the stale handle
    state.requests.cancel_timer(&id);
}
