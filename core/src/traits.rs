//! Core traits defining virtual baton interfaces
//!
//! The identity oracle is supplied by the host environment.

use crate::types::InstanceId;
use std::sync::Arc;

/// Result type for virtual baton operations
pub type BatonResult<T> = Result<T, crate::error::BatonError>;

/// Answers whether a participant identity is still valid and connected.
///
/// Acceptors consult it before vouching for a previously accepted winner, and
/// the recheck watchdog uses it to evict a vanished holder.
pub trait ConnectionTest: Send + Sync {
    fn is_connected(&self, id: &InstanceId) -> bool;
}

impl<F> ConnectionTest for F
where
    F: Fn(&InstanceId) -> bool + Send + Sync,
{
    fn is_connected(&self, id: &InstanceId) -> bool {
        self(id)
    }
}

/// Shared identity oracle
pub type SharedConnectionTest = Arc<dyn ConnectionTest>;

/// Oracle that considers every identity connected
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConnected;

impl ConnectionTest for AlwaysConnected {
    fn is_connected(&self, _id: &InstanceId) -> bool {
        true
    }
}

/// Default validity rule over a set of known live identities.
///
/// An id is valid if it is itself live, or if it is the concatenation (in
/// either order) of two live identities. This covers instance ids made of a
/// session id, an object id, or both.
pub fn is_live_or_composite<'a, I>(id: &InstanceId, live: I) -> bool
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    let id = id.as_str();
    if live.clone().into_iter().any(|known| known == id) {
        return true;
    }
    live.clone().into_iter().any(|prefix| {
        !prefix.is_empty()
            && id.len() > prefix.len()
            && id.starts_with(prefix)
            && live.clone().into_iter().any(|suffix| suffix == &id[prefix.len()..])
    })
}
