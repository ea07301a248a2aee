use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::task::AbortHandle;

use crate::error::DispatchError;
use crate::models::provider::{GeoPoint, SessionId};
use crate::models::request::{RequestId, RequestStatus, ServiceRequest};

/// Owns the lifecycle of in-flight requests, including their expiry timers.
///
/// Every check-then-mutate sequence runs under the per-entry lock of the
/// concurrent map, so for any request at most one of accept, expire, cancel,
/// or complete can ever succeed.
#[derive(Default)]
pub struct RequestStore {
    requests: DashMap<RequestId, ServiceRequest>,
    timers: DashMap<RequestId, AbortHandle>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh `pending` request. Candidates are fixed here and never
    /// change afterwards. The expiry timer is armed separately by the engine,
    /// which owns the spawned task.
    pub fn create(
        &self,
        requester: SessionId,
        origin: GeoPoint,
        dest: GeoPoint,
        requester_info: Option<Value>,
        candidates: Vec<SessionId>,
        ttl: Duration,
    ) -> ServiceRequest {
        let now = Utc::now();
        let request = ServiceRequest {
            id: RequestId::new(),
            requester,
            origin,
            dest,
            status: RequestStatus::Pending,
            assigned_provider: None,
            candidates,
            rejected: Vec::new(),
            requester_info,
            provider_info: None,
            created_at: now,
            expires_at: now + chrono::Duration::milliseconds(ttl.as_millis() as i64),
        };

        self.requests.insert(request.id, request.clone());
        request
    }

    pub fn get(&self, id: &RequestId) -> Option<ServiceRequest> {
        self.requests.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// First-accept-wins. Succeeds only while the request is still `pending`;
    /// the status check and the assignment happen under the entry lock, so a
    /// concurrent accept or expiry cannot interleave between them.
    pub fn try_accept(
        &self,
        id: &RequestId,
        provider: SessionId,
        provider_info: Option<Value>,
    ) -> Result<ServiceRequest, DispatchError> {
        let accepted = {
            let mut entry = self
                .requests
                .get_mut(id)
                .ok_or(DispatchError::NotFound(*id))?;

            if entry.status != RequestStatus::Pending {
                return Err(DispatchError::InvalidState {
                    id: *id,
                    status: entry.status,
                });
            }

            entry.status = RequestStatus::Accepted;
            entry.assigned_provider = Some(provider);
            if provider_info.is_some() {
                entry.provider_info = provider_info;
            }
            entry.clone()
        };

        self.cancel_timer(id);
        Ok(accepted)
    }

    /// Record a single candidate's decline. Does not close the request unless
    /// every candidate has now declined, in which case the request transitions
    /// to `rejected-all` and is removed. Returns the request snapshot and
    /// whether that final transition happened.
    pub fn record_reject(
        &self,
        id: &RequestId,
        provider: SessionId,
    ) -> Result<(ServiceRequest, bool), DispatchError> {
        let (snapshot, all_rejected) = {
            let mut entry = self
                .requests
                .get_mut(id)
                .ok_or(DispatchError::NotFound(*id))?;

            if entry.status != RequestStatus::Pending {
                return Err(DispatchError::InvalidState {
                    id: *id,
                    status: entry.status,
                });
            }

            if !entry.rejected.contains(&provider) {
                entry.rejected.push(provider);
            }

            let rejected = entry.rejected.clone();
            let all_rejected = !entry.candidates.is_empty()
                && entry.candidates.iter().all(|c| rejected.contains(c));

            if all_rejected {
                entry.status = RequestStatus::RejectedAll;
            }
            (entry.clone(), all_rejected)
        };

        if all_rejected {
            self.requests.remove(id);
            self.cancel_timer(id);
        }

        Ok((snapshot, all_rejected))
    }

    /// Timer path. Only a still-pending request expires; losing this race to
    /// an acceptance is expected and the caller may swallow the error.
    pub fn expire(&self, id: &RequestId) -> Result<ServiceRequest, DispatchError> {
        {
            let mut entry = self
                .requests
                .get_mut(id)
                .ok_or(DispatchError::NotFound(*id))?;

            if entry.status != RequestStatus::Pending {
                return Err(DispatchError::InvalidState {
                    id: *id,
                    status: entry.status,
                });
            }

            entry.status = RequestStatus::Expired;
        }

        self.cancel_timer(id);
        self.requests
            .remove(id)
            .map(|(_, request)| request)
            .ok_or(DispatchError::NotFound(*id))
    }

    /// Terminal transition from any non-terminal state.
    pub fn cancel(&self, id: &RequestId) -> Result<ServiceRequest, DispatchError> {
        self.finish(id, RequestStatus::Canceled)
    }

    /// Terminal transition from any non-terminal state.
    pub fn complete(&self, id: &RequestId) -> Result<ServiceRequest, DispatchError> {
        self.finish(id, RequestStatus::Completed)
    }

    fn finish(
        &self,
        id: &RequestId,
        terminal: RequestStatus,
    ) -> Result<ServiceRequest, DispatchError> {
        match self
            .requests
            .remove_if(id, |_, request| !request.status.is_terminal())
        {
            Some((_, mut request)) => {
                self.cancel_timer(id);
                request.status = terminal;
                Ok(request)
            }
            None => match self.get(id) {
                Some(request) => Err(DispatchError::InvalidState {
                    id: *id,
                    status: request.status,
                }),
                None => Err(DispatchError::NotFound(*id)),
            },
        }
    }

    /// The requester's currently accepted request, if any. Used to relay live
    /// location to the assigned provider only.
    pub fn find_accepted_by_requester(&self, requester: &SessionId) -> Option<ServiceRequest> {
        self.requests
            .iter()
            .find(|entry| {
                let request = entry.value();
                request.requester == *requester && request.status == RequestStatus::Accepted
            })
            .map(|entry| entry.value().clone())
    }

    /// Store the expiry task handle beside the request so acceptance and
    /// cancellation can abort it. A very short TTL can let the timer fire
    /// before the handle is armed; in that case the request is already gone
    /// and the handle must not outlive it.
    pub fn arm_timer(&self, id: RequestId, handle: AbortHandle) {
        self.timers.insert(id, handle);
        if !self.requests.contains_key(&id) {
            self.cancel_timer(&id);
        }
    }

    /// Safe to call any number of times; aborting an absent or finished task
    /// is a no-op.
    pub fn cancel_timer(&self, id: &RequestId) {
        if let Some((_, handle)) = self.timers.remove(id) {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }
}
