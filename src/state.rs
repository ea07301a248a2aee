use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::models::message::Outbound;
use crate::models::provider::SessionId;
use crate::observability::metrics::Metrics;
use crate::registry::ProviderRegistry;
use crate::store::RequestStore;

/// Runtime knobs of the dispatch core, derived from `Config`.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Number of nearest candidates notified per request.
    pub fanout_size: usize,
    /// How long an unanswered request stays open.
    pub request_ttl: Duration,
}

pub struct AppState {
    pub registry: ProviderRegistry,
    pub requests: RequestStore,
    /// Outbound queue per connected session; entries live exactly as long as
    /// the underlying socket.
    pub sessions: DashMap<SessionId, mpsc::UnboundedSender<Outbound>>,
    pub config: DispatchConfig,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            registry: ProviderRegistry::new(),
            requests: RequestStore::new(),
            sessions: DashMap::new(),
            config,
            metrics: Metrics::new(),
        }
    }

    /// Attach a session's outbound queue. The bridge calls this on connect
    /// and forwards the receiver to the socket.
    pub fn connect(&self, session: SessionId) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.insert(session, tx);
        rx
    }

    pub fn disconnect(&self, session: &SessionId) {
        self.sessions.remove(session);
    }

    /// Fire-and-forget delivery. A gone session is not an error and never
    /// rolls back the state transition that produced the event.
    pub fn notify(&self, session: &SessionId, event: Outbound) {
        if let Some(tx) = self.sessions.get(session) {
            let _ = tx.send(event);
        }
    }
}
