use crate::geo;
use crate::models::provider::{GeoPoint, Provider, SessionId};

/// Rank providers by ascending great-circle distance from the origin and keep
/// the nearest `k`. Providers without a known location never qualify. The
/// sort is stable, so ties keep the snapshot's registration order.
pub fn select_candidates(origin: &GeoPoint, providers: &[Provider], k: usize) -> Vec<SessionId> {
    let mut ranked: Vec<(f64, SessionId)> = providers
        .iter()
        .filter(|provider| provider.location.is_some())
        .map(|provider| {
            (
                geo::distance_km(provider.location.as_ref(), Some(origin)),
                provider.id,
            )
        })
        .collect();

    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
    ranked.truncate(k);
    ranked.into_iter().map(|(_, id)| id).collect()
}
