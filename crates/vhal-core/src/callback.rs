//! The client boundary exposed by the engine

use std::sync::Arc;

use crate::request::{GetValueResults, PropertyErrors, PropertyValues, SetValueResults};

/// The per-client callback channel the transport hands to the service.
///
/// Deliveries for one call arrive as one batch; subscription events for
/// one client are batched per fan-out tick.
pub trait VehicleCallback: Send + Sync {
    fn on_get_values(&self, results: GetValueResults);

    fn on_set_values(&self, results: SetValueResults);

    /// `shared_memory_file_count` is the number of spilled regions the
    /// delivery carries (0 for an inline batch).
    fn on_property_event(&self, values: PropertyValues, shared_memory_file_count: i32);

    fn on_property_set_error(&self, errors: PropertyErrors);
}

/// Identity of a connected callback channel.
///
/// Two calls carrying the same `Arc` are the same client. The transport's
/// death notification uses the same key, so tearing down by `ClientId` is
/// unambiguous, and a reconnecting peer (a fresh `Arc`) starts clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(usize);

impl ClientId {
    pub fn of(callback: &Arc<dyn VehicleCallback>) -> Self {
        ClientId(Arc::as_ptr(callback) as *const () as usize)
    }
}
