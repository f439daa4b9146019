//! In-flight request registry with per-batch deadlines
//!
//! Every dispatched get/set batch parks its request ids here until the
//! driver replies or the deadline fires, whichever comes first. Extraction
//! happens under one mutex, so a reply and a timeout can never both
//! deliver the same id. A dead client's ids are dropped without firing
//! anything.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::debug;
use vhal_core::{ClientId, VehicleError, VehicleResult};

/// Invoked with the request ids of a batch that outlived its deadline.
pub type TimeoutCallback = Arc<dyn Fn(Vec<i64>) + Send + Sync>;

pub struct PendingRequestPool {
    timeout: Duration,
    rt: Handle,
    requests: Arc<Mutex<HashMap<ClientId, HashSet<i64>>>>,
}

impl PendingRequestPool {
    /// Must be called from within a tokio runtime; deadline tasks run on
    /// the runtime captured here.
    pub fn new(timeout: Duration) -> Self {
        PendingRequestPool {
            timeout,
            rt: Handle::current(),
            requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Atomically register a batch of ids for `client` and arm one
    /// deadline for it. If any id is already in flight for that client,
    /// nothing is inserted and the whole call fails.
    pub fn try_add(
        &self,
        client: ClientId,
        request_ids: &[i64],
        on_timeout: TimeoutCallback,
    ) -> VehicleResult<()> {
        {
            let mut requests = self.requests.lock();
            let in_flight = requests.entry(client).or_default();
            if let Some(id) = request_ids.iter().find(|id| in_flight.contains(id)) {
                if in_flight.is_empty() {
                    requests.remove(&client);
                }
                return Err(VehicleError::InvalidArg(format!(
                    "request id {id} is already in flight for this client"
                )));
            }
            in_flight.extend(request_ids.iter().copied());
        }

        let ids = request_ids.to_vec();
        let timeout = self.timeout;
        let requests = Arc::downgrade(&self.requests);
        self.rt.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(requests) = requests.upgrade() else {
                return;
            };
            let expired = {
                let mut requests = requests.lock();
                let Some(in_flight) = requests.get_mut(&client) else {
                    return;
                };
                let expired: Vec<i64> = ids.into_iter().filter(|id| in_flight.remove(id)).collect();
                if in_flight.is_empty() {
                    requests.remove(&client);
                }
                expired
            };
            if !expired.is_empty() {
                debug!(?client, count = expired.len(), "request batch timed out");
                on_timeout(expired);
            }
        });
        Ok(())
    }

    /// Remove and return the subset of `request_ids` still pending for
    /// `client`. Ids the deadline already claimed are absent from the
    /// result, which is how late driver replies get filtered out.
    pub fn try_finish(&self, client: ClientId, request_ids: &[i64]) -> HashSet<i64> {
        let mut requests = self.requests.lock();
        let Some(in_flight) = requests.get_mut(&client) else {
            return HashSet::new();
        };
        let finished: HashSet<i64> = request_ids
            .iter()
            .copied()
            .filter(|id| in_flight.remove(id))
            .collect();
        if in_flight.is_empty() {
            requests.remove(&client);
        }
        finished
    }

    /// Forget everything a dead client had in flight. No deadline fires
    /// for the dropped ids.
    pub fn drop_client(&self, client: ClientId) {
        let removed = self.requests.lock().remove(&client);
        if let Some(ids) = removed {
            debug!(?client, count = ids.len(), "dropped pending requests for dead client");
        }
    }

    /// Number of in-flight requests across all clients.
    pub fn count(&self) -> usize {
        self.requests.lock().values().map(HashSet::len).sum()
    }
}
