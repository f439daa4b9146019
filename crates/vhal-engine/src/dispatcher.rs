//! Validation and dispatch of get/set batches
//!
//! A batch moves through five stages: transport unwrap, intra-batch
//! duplicate checks, per-item validation, pending registration, driver
//! forward. Synchronous failures reject the whole call and register
//! nothing; per-item validation failures are filtered into an immediate
//! callback delivery while the healthy remainder proceeds.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use vhal_core::{
    GetValueRequest, GetValueRequests, PropertyConfig, SetValueRequest, SetValueRequests,
    StatusCode, VehicleCallback, VehicleError, VehicleHardware, VehicleResult,
};

use crate::clients::{ClientRegistry, RequestResult, ValuesClient};
use crate::config_store::PropertyConfigStore;
use crate::pending::PendingRequestPool;

/// Request-kind seam shared by the get and set paths.
trait DispatchRequest: Sized {
    type Result: RequestResult;

    fn request_id(&self) -> i64;

    fn prop_id(&self) -> i32;

    /// Per-item validation against the property's configuration.
    fn check(&self, config: &PropertyConfig) -> VehicleResult<()>;
}

impl DispatchRequest for GetValueRequest {
    type Result = vhal_core::GetValueResult;

    fn request_id(&self) -> i64 {
        self.request_id
    }

    fn prop_id(&self) -> i32 {
        self.prop.prop
    }

    fn check(&self, config: &PropertyConfig) -> VehicleResult<()> {
        config.check_area(self.prop.area_id)
    }
}

impl DispatchRequest for SetValueRequest {
    type Result = vhal_core::SetValueResult;

    fn request_id(&self) -> i64 {
        self.request_id
    }

    fn prop_id(&self) -> i32 {
        self.value.prop
    }

    fn check(&self, config: &PropertyConfig) -> VehicleResult<()> {
        config.check_area(self.value.area_id)?;
        config.check_value(&self.value)
    }
}

pub struct RequestDispatcher {
    hardware: Arc<dyn VehicleHardware>,
    configs: Arc<PropertyConfigStore>,
    pool: Arc<PendingRequestPool>,
    clients: Arc<ClientRegistry>,
}

impl RequestDispatcher {
    pub fn new(
        hardware: Arc<dyn VehicleHardware>,
        configs: Arc<PropertyConfigStore>,
        pool: Arc<PendingRequestPool>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        RequestDispatcher {
            hardware,
            configs,
            pool,
            clients,
        }
    }

    pub fn get_values(
        &self,
        callback: &Arc<dyn VehicleCallback>,
        requests: GetValueRequests,
    ) -> VehicleResult<()> {
        let requests = requests.into_payloads()?;
        let client = self.clients.get_client(callback);
        self.dispatch(client, requests, |hardware, reply, batch| {
            hardware.get_values(reply, batch)
        })
    }

    pub fn set_values(
        &self,
        callback: &Arc<dyn VehicleCallback>,
        requests: SetValueRequests,
    ) -> VehicleResult<()> {
        let requests = requests.into_payloads()?;
        let client = self.clients.set_client(callback);
        self.dispatch(client, requests, |hardware, reply, batch| {
            hardware.set_values(reply, batch)
        })
    }

    fn dispatch<Q: DispatchRequest>(
        &self,
        client: Arc<ValuesClient<Q::Result>>,
        requests: Vec<Q>,
        forward: impl FnOnce(
            &dyn VehicleHardware,
            Arc<dyn Fn(Vec<Q::Result>) + Send + Sync>,
            &[Q],
        ) -> StatusCode,
    ) -> VehicleResult<()> {
        // Duplicate request ids or duplicate property ids reject the
        // whole batch. Touching several areas of one property takes one
        // call per area.
        let mut seen_ids = HashSet::with_capacity(requests.len());
        let mut seen_props = HashSet::with_capacity(requests.len());
        for request in &requests {
            if !seen_ids.insert(request.request_id()) {
                return Err(VehicleError::InvalidArg(format!(
                    "duplicate request id {} in batch",
                    request.request_id()
                )));
            }
            if !seen_props.insert(request.prop_id()) {
                return Err(VehicleError::InvalidArg(format!(
                    "duplicate property {:#x} in batch",
                    request.prop_id()
                )));
            }
        }

        // Per-item validation: failures leave the batch, the rest proceeds.
        let mut failures: Vec<Q::Result> = Vec::new();
        let mut healthy: Vec<Q> = Vec::with_capacity(requests.len());
        for request in requests {
            let checked = match self.configs.lookup(request.prop_id()) {
                Some(config) => request.check(config),
                None => Err(VehicleError::InvalidArg(format!(
                    "unknown property {:#x}",
                    request.prop_id()
                ))),
            };
            match checked {
                Ok(()) => healthy.push(request),
                Err(error) => {
                    debug!(
                        request_id = request.request_id(),
                        %error,
                        "request failed validation"
                    );
                    failures.push(Q::Result::failed(request.request_id(), error.status_code()));
                }
            }
        }
        if !failures.is_empty() {
            client.send_results(failures);
        }
        if healthy.is_empty() {
            return Ok(());
        }

        // Park the survivors before the driver sees them. A duplicate
        // against the client's in-flight set rejects the call here.
        let ids: Vec<i64> = healthy.iter().map(Q::request_id).collect();
        self.pool
            .try_add(client.client_id(), &ids, client.clone().timeout_callback())?;

        let status = forward(
            self.hardware.as_ref(),
            client.clone().result_callback(),
            &healthy,
        );
        if !status.is_ok() {
            // The driver took nothing; unpark so the ids are free again.
            self.pool.try_finish(client.client_id(), &ids);
            return Err(VehicleError::from_status(
                status,
                "hardware rejected the batch",
            ));
        }
        Ok(())
    }
}
