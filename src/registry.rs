use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;

use crate::models::provider::{GeoPoint, Provider, SessionId};

/// Live set of connected providers, keyed by session identity. Only the
/// dispatch engine mutates it; the matcher consumes point-in-time snapshots.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<SessionId, Provider>,
    seq: AtomicU64,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or re-register. Re-registration overwrites info and clears the
    /// last known location; the provider keeps its registration order slot.
    pub fn register(&self, id: SessionId, info: Option<Value>) {
        let seq = match self.providers.get(&id) {
            Some(existing) => existing.registered_seq,
            None => self.seq.fetch_add(1, Ordering::Relaxed),
        };

        self.providers.insert(
            id,
            Provider {
                id,
                location: None,
                info,
                registered_seq: seq,
                updated_at: Utc::now(),
            },
        );
    }

    /// No-op for unknown providers: info messages can race a disconnect.
    pub fn update_info(&self, id: SessionId, info: Value) {
        if let Some(mut provider) = self.providers.get_mut(&id) {
            provider.info = Some(info);
            provider.updated_at = Utc::now();
        }
    }

    /// No-op for unknown providers: location reports can race a disconnect
    /// and that is not an error.
    pub fn update_location(&self, id: SessionId, location: GeoPoint) {
        if let Some(mut provider) = self.providers.get_mut(&id) {
            provider.location = Some(location);
            provider.updated_at = Utc::now();
        }
    }

    /// Safe to call for sessions that were never providers.
    pub fn unregister(&self, id: &SessionId) -> bool {
        self.providers.remove(id).is_some()
    }

    pub fn get(&self, id: &SessionId) -> Option<Provider> {
        self.providers.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Providers with a known location, in registration order. Mutation only
    /// happens between discrete message handlings, so a plain read is a
    /// consistent view.
    pub fn snapshot(&self) -> Vec<Provider> {
        let mut located: Vec<Provider> = self
            .providers
            .iter()
            .filter(|entry| entry.value().location.is_some())
            .map(|entry| entry.value().clone())
            .collect();

        located.sort_by_key(|provider| provider.registered_seq);
        located
    }

    /// Every registered provider, located or not, in registration order.
    pub fn all(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self
            .providers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        providers.sort_by_key(|provider| provider.registered_seq);
        providers
    }

    /// Session ids of every registered provider, for close-out sweeps.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.providers.iter().map(|entry| *entry.key()).collect()
    }
}
