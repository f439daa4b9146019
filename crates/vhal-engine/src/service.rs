//! The service facade
//!
//! `Vehicle` is the engine's front door: the transport layer resolves
//! each inbound call to one of the methods here and reports peer death
//! through [`Vehicle::on_client_died`]. Calls never block on hardware;
//! asynchronous outcomes travel through the caller's callback channel.

use std::sync::Arc;

use tracing::{debug, info};
use vhal_core::{
    ClientId, GetValueRequests, PropertyConfigs, SetValueRequests, SubscribeOptions,
    VehicleCallback, VehicleError, VehicleHardware, VehicleResult,
};

use crate::clients::ClientRegistry;
use crate::config::EngineConfig;
use crate::config_store::PropertyConfigStore;
use crate::dispatcher::RequestDispatcher;
use crate::pending::PendingRequestPool;
use crate::subscription::SubscriptionManager;

pub struct Vehicle {
    configs: Arc<PropertyConfigStore>,
    pool: Arc<PendingRequestPool>,
    clients: Arc<ClientRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    dispatcher: RequestDispatcher,
}

impl Vehicle {
    /// Build the engine over a driver with default tunables. Must be
    /// called from within a tokio runtime.
    pub fn new(hardware: Arc<dyn VehicleHardware>) -> Arc<Self> {
        Self::with_config(hardware, EngineConfig::default())
    }

    pub fn with_config(hardware: Arc<dyn VehicleHardware>, config: EngineConfig) -> Arc<Self> {
        let configs = Arc::new(PropertyConfigStore::load(hardware.as_ref()));
        let pool = Arc::new(PendingRequestPool::new(config.request_timeout()));
        let clients = Arc::new(ClientRegistry::new(pool.clone()));
        let subscriptions = SubscriptionManager::new(hardware.clone(), configs.clone());
        let dispatcher = RequestDispatcher::new(
            hardware.clone(),
            configs.clone(),
            pool.clone(),
            clients.clone(),
        );

        // Route driver-originated events into the subscription fan-out.
        // Weak refs keep a chatty driver from holding a dropped engine
        // alive.
        let weak = Arc::downgrade(&subscriptions);
        hardware.register_on_property_change(Box::new(move |values| {
            if let Some(subscriptions) = weak.upgrade() {
                subscriptions.on_property_change(values);
            }
        }));
        let weak = Arc::downgrade(&subscriptions);
        hardware.register_on_property_set_error(Box::new(move |errors| {
            if let Some(subscriptions) = weak.upgrade() {
                subscriptions.on_property_set_error(errors);
            }
        }));

        info!(
            properties = configs.len(),
            timeout_ms = config.request_timeout_ms,
            "vehicle service ready"
        );
        Arc::new(Vehicle {
            configs,
            pool,
            clients,
            subscriptions,
            dispatcher,
        })
    }

    /// Every property configuration the driver reported, spilled to
    /// shared memory when the encoded list is oversized. Stable for the
    /// process lifetime.
    pub fn get_all_prop_configs(&self) -> VehicleResult<PropertyConfigs> {
        self.configs.stable_configs()
    }

    /// Submit a batch of reads. Returns synchronously once the batch is
    /// validated and forwarded; results arrive through `callback`.
    pub fn get_values(
        &self,
        callback: &Arc<dyn VehicleCallback>,
        requests: GetValueRequests,
    ) -> VehicleResult<()> {
        self.dispatcher.get_values(callback, requests)
    }

    /// Submit a batch of writes, same contract as [`Self::get_values`].
    pub fn set_values(
        &self,
        callback: &Arc<dyn VehicleCallback>,
        requests: SetValueRequests,
    ) -> VehicleResult<()> {
        self.dispatcher.set_values(callback, requests)
    }

    /// Install or replace subscriptions for this client. One invalid
    /// option rejects the whole call.
    pub fn subscribe(
        &self,
        callback: &Arc<dyn VehicleCallback>,
        options: &[SubscribeOptions],
        max_shared_memory_file_count: i32,
    ) -> VehicleResult<()> {
        if max_shared_memory_file_count < 0 {
            return Err(VehicleError::InvalidArg(format!(
                "negative shared memory file count {max_shared_memory_file_count}"
            )));
        }
        self.subscriptions
            .subscribe(callback, options, max_shared_memory_file_count)
    }

    /// Drop this client's subscriptions on the listed properties.
    pub fn unsubscribe(
        &self,
        callback: &Arc<dyn VehicleCallback>,
        prop_ids: &[i32],
    ) -> VehicleResult<()> {
        self.subscriptions
            .unsubscribe(ClientId::of(callback), prop_ids)
    }

    /// Transport death notification. Tears down everything the peer
    /// owned, silently: pending entries are dropped without a timeout
    /// firing, subscriptions are removed, poll jobs whose last subscriber
    /// died are stopped. An identity seen again afterwards starts fresh.
    pub fn on_client_died(&self, client: ClientId) {
        debug!(?client, "client died, tearing down its state");
        self.pool.drop_client(client);
        self.clients.drop_client(client);
        self.subscriptions.drop_client(client);
    }

    /// Requests currently awaiting a driver reply or a deadline.
    pub fn pending_request_count(&self) -> usize {
        self.pool.count()
    }

    /// Connected client records across the three families.
    pub fn client_count(&self) -> usize {
        self.clients.count() + self.subscriptions.client_count()
    }
}
