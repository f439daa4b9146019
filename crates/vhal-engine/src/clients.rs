//! Per-client connection records
//!
//! Each transport peer gets a lazily created record per call family (get,
//! set); the subscription record lives in the subscription manager. The
//! registry owns the strong callback references, everything else refers
//! to clients by `ClientId`, so death teardown frees state promptly and a
//! reconnecting peer starts fresh.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use vhal_core::{
    Batch, ClientId, GetValueResult, SetValueResult, StatusCode, VehicleCallback,
};

use crate::pending::{PendingRequestPool, TimeoutCallback};

/// Result-kind seam shared by the get and set paths.
pub trait RequestResult: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn request_id(&self) -> i64;

    /// The synthetic result a request that outlived its deadline gets.
    fn timed_out(request_id: i64) -> Self;

    /// A per-item failure produced by validation.
    fn failed(request_id: i64, status: StatusCode) -> Self;

    /// Hand a finished batch to the right callback channel.
    fn deliver(callback: &dyn VehicleCallback, results: Batch<Self>)
    where
        Self: Sized;
}

impl RequestResult for GetValueResult {
    fn request_id(&self) -> i64 {
        self.request_id
    }

    fn timed_out(request_id: i64) -> Self {
        GetValueResult {
            request_id,
            status: StatusCode::TryAgain,
            prop: None,
        }
    }

    fn failed(request_id: i64, status: StatusCode) -> Self {
        GetValueResult {
            request_id,
            status,
            prop: None,
        }
    }

    fn deliver(callback: &dyn VehicleCallback, results: Batch<Self>) {
        callback.on_get_values(results);
    }
}

impl RequestResult for SetValueResult {
    fn request_id(&self) -> i64 {
        self.request_id
    }

    fn timed_out(request_id: i64) -> Self {
        SetValueResult {
            request_id,
            status: StatusCode::TryAgain,
        }
    }

    fn failed(request_id: i64, status: StatusCode) -> Self {
        SetValueResult { request_id, status }
    }

    fn deliver(callback: &dyn VehicleCallback, results: Batch<Self>) {
        callback.on_set_values(results);
    }
}

/// A connected client's get or set channel: delivers result batches and
/// owns the pending-pool bookkeeping callbacks for that client.
pub struct ValuesClient<R: RequestResult> {
    client_id: ClientId,
    callback: Arc<dyn VehicleCallback>,
    pool: Arc<PendingRequestPool>,
    _result: PhantomData<fn() -> R>,
}

impl<R: RequestResult> ValuesClient<R> {
    fn new(callback: Arc<dyn VehicleCallback>, pool: Arc<PendingRequestPool>) -> Arc<Self> {
        Arc::new(ValuesClient {
            client_id: ClientId::of(&callback),
            callback,
            pool,
            _result: PhantomData,
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Deliver one result batch, spilling to shared memory when the
    /// encoding is oversized.
    pub fn send_results(&self, results: Vec<R>) {
        match Batch::from_payloads(results) {
            Ok(batch) => R::deliver(self.callback.as_ref(), batch),
            Err(error) => {
                warn!(client = ?self.client_id, %error, "failed to encode result batch");
            }
        }
    }

    /// Deadline handler for the pending pool: synthesizes TRY_AGAIN
    /// results for every expired id.
    pub fn timeout_callback(self: Arc<Self>) -> TimeoutCallback {
        Arc::new(move |request_ids: Vec<i64>| {
            let results = request_ids.into_iter().map(R::timed_out).collect();
            self.send_results(results);
        })
    }

    /// Driver reply handler: forwards only ids still pending, so a reply
    /// arriving after the deadline (or after client death) is discarded.
    pub fn result_callback(self: Arc<Self>) -> Arc<dyn Fn(Vec<R>) + Send + Sync> {
        let this = self;
        Arc::new(move |results: Vec<R>| {
            let ids: Vec<i64> = results.iter().map(R::request_id).collect();
            let finished = this.pool.try_finish(this.client_id, &ids);
            let results: Vec<R> = results
                .into_iter()
                .filter(|result| finished.contains(&result.request_id()))
                .collect();
            if !results.is_empty() {
                this.send_results(results);
            }
        })
    }
}

/// The per-peer record maps, keyed by callback identity.
pub struct ClientRegistry {
    pool: Arc<PendingRequestPool>,
    get_clients: Mutex<HashMap<ClientId, Arc<ValuesClient<GetValueResult>>>>,
    set_clients: Mutex<HashMap<ClientId, Arc<ValuesClient<SetValueResult>>>>,
}

impl ClientRegistry {
    pub fn new(pool: Arc<PendingRequestPool>) -> Self {
        ClientRegistry {
            pool,
            get_clients: Mutex::new(HashMap::new()),
            set_clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_client(&self, callback: &Arc<dyn VehicleCallback>) -> Arc<ValuesClient<GetValueResult>> {
        self.get_clients
            .lock()
            .entry(ClientId::of(callback))
            .or_insert_with(|| ValuesClient::new(callback.clone(), self.pool.clone()))
            .clone()
    }

    pub fn set_client(&self, callback: &Arc<dyn VehicleCallback>) -> Arc<ValuesClient<SetValueResult>> {
        self.set_clients
            .lock()
            .entry(ClientId::of(callback))
            .or_insert_with(|| ValuesClient::new(callback.clone(), self.pool.clone()))
            .clone()
    }

    /// Forget a dead client's records. In-flight driver replies that
    /// still hold the old record deliver into the pending pool, which no
    /// longer knows the ids, so nothing reaches the dead callback.
    pub fn drop_client(&self, client: ClientId) {
        self.get_clients.lock().remove(&client);
        self.set_clients.lock().remove(&client);
    }

    /// Number of live get/set records, for diagnostics.
    pub fn count(&self) -> usize {
        self.get_clients.lock().len() + self.set_clients.lock().len()
    }
}
