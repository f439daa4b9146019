//! Test harness for the vehicle HAL engine
//!
//! Provides the recording `MockVehicleCallback` client double, the shared
//! test property set, and builders for get/set batches large enough to
//! exercise the shared-memory spill.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use vhal_core::{
    AreaConfig, ChangeMode, ClientId, GetValueRequest, GetValueRequests, GetValueResult,
    GetValueResults, PropertyConfig, PropertyErrors, PropertyType, PropertyValue, PropertyValues,
    SetValueRequest, SetValueRequests, SetValueResult, SetValueResults, StatusCode,
    VehicleCallback,
};
use vhal_engine::{EngineConfig, MockVehicleHardware, Vehicle};

pub const SYSTEM: i32 = 0x1000_0000;
pub const GLOBAL: i32 = 0x0100_0000;
pub const WINDOW: i32 = 0x0300_0000;

pub const ROW_1_LEFT: i32 = 1;
pub const ROW_1_RIGHT: i32 = 4;

pub const INVALID_PROP_ID: i32 = 0;

pub fn int32_window_prop() -> i32 {
    10001 + SYSTEM + WINDOW + PropertyType::Int32.raw()
}

pub fn global_on_change_prop() -> i32 {
    10002 + SYSTEM + GLOBAL + PropertyType::Int32.raw()
}

pub fn global_continuous_prop() -> i32 {
    10003 + SYSTEM + GLOBAL + PropertyType::Int32.raw()
}

pub fn area_on_change_prop() -> i32 {
    10004 + SYSTEM + WINDOW + PropertyType::Int32.raw()
}

pub fn area_continuous_prop() -> i32 {
    10005 + SYSTEM + WINDOW + PropertyType::Int32.raw()
}

/// The i-th of the global int32-vector properties used by the get/set
/// batch tests.
pub fn int32_vec_prop(i: i32) -> i32 {
    i + SYSTEM + GLOBAL + PropertyType::Int32Vec.raw()
}

/// The property set every engine scenario runs against: `vec_prop_count`
/// global int32-vector properties with range [0, 100], plus one of each
/// subscription flavor.
pub fn test_property_configs(vec_prop_count: i32) -> Vec<PropertyConfig> {
    let mut configs: Vec<PropertyConfig> = (0..vec_prop_count)
        .map(|i| {
            PropertyConfig::new(int32_vec_prop(i))
                .with_area(AreaConfig::new(0).with_int32_range(0, 100))
        })
        .collect();
    configs.push(
        PropertyConfig::new(int32_window_prop())
            .with_area(AreaConfig::new(ROW_1_LEFT).with_int32_range(0, 100)),
    );
    configs.push(
        PropertyConfig::new(global_on_change_prop()).with_change_mode(ChangeMode::OnChange),
    );
    configs.push(
        PropertyConfig::new(global_continuous_prop())
            .with_change_mode(ChangeMode::Continuous)
            .with_sample_rate_band(0.0, 100.0),
    );
    configs.push(
        PropertyConfig::new(area_on_change_prop())
            .with_change_mode(ChangeMode::OnChange)
            .with_area(AreaConfig::new(ROW_1_LEFT).with_int32_range(0, 100))
            .with_area(AreaConfig::new(ROW_1_RIGHT).with_int32_range(0, 100)),
    );
    configs.push(
        PropertyConfig::new(area_continuous_prop())
            .with_change_mode(ChangeMode::Continuous)
            .with_sample_rate_band(0.0, 1000.0)
            .with_area(AreaConfig::new(ROW_1_LEFT).with_int32_range(0, 100))
            .with_area(AreaConfig::new(ROW_1_RIGHT).with_int32_range(0, 100)),
    );
    configs
}

/// Build a get batch of `size` requests (ids 0.., one distinct property
/// each), the results the client should see, and the requests the driver
/// should see. The returned batch spills to shared memory when large.
pub fn get_values_test_cases(
    size: i32,
) -> (GetValueRequests, Vec<GetValueResult>, Vec<GetValueRequest>) {
    let hardware_requests: Vec<GetValueRequest> = (0..size)
        .map(|i| GetValueRequest {
            request_id: i as i64,
            prop: PropertyValue::new(int32_vec_prop(i)),
        })
        .collect();
    let expected_results: Vec<GetValueResult> = (0..size)
        .map(|i| GetValueResult {
            request_id: i as i64,
            status: StatusCode::Ok,
            prop: Some(PropertyValue::new(int32_vec_prop(i)).with_int32_values(vec![1, 2, 3, 4])),
        })
        .collect();
    let requests = GetValueRequests::from_payloads(hardware_requests.clone())
        .expect("encoding test requests cannot fail");
    (requests, expected_results, hardware_requests)
}

/// Set-side counterpart of [`get_values_test_cases`]; every request
/// writes `[1, 2, 3, 4]`.
pub fn set_values_test_cases(
    size: i32,
) -> (SetValueRequests, Vec<SetValueResult>, Vec<SetValueRequest>) {
    let hardware_requests: Vec<SetValueRequest> = (0..size)
        .map(|i| SetValueRequest {
            request_id: i as i64,
            value: PropertyValue::new(int32_vec_prop(i)).with_int32_values(vec![1, 2, 3, 4]),
        })
        .collect();
    let expected_results: Vec<SetValueResult> = (0..size)
        .map(|i| SetValueResult {
            request_id: i as i64,
            status: StatusCode::Ok,
        })
        .collect();
    let requests = SetValueRequests::from_payloads(hardware_requests.clone())
        .expect("encoding test requests cannot fail");
    (requests, expected_results, hardware_requests)
}

/// One engine instance over the mock driver plus one connected client.
///
/// Must be created inside a tokio runtime; the engine's timers run on it.
pub struct TestContext {
    pub hardware: Arc<MockVehicleHardware>,
    pub vehicle: Arc<Vehicle>,
    pub callback: Arc<MockVehicleCallback>,
    pub client: Arc<dyn VehicleCallback>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let hardware = Arc::new(MockVehicleHardware::new());
        hardware.set_property_configs(test_property_configs(10_000));
        let vehicle = Vehicle::with_config(
            hardware.clone(),
            EngineConfig {
                request_timeout_ms: timeout.as_millis() as u64,
            },
        );
        let callback = MockVehicleCallback::new();
        let client: Arc<dyn VehicleCallback> = callback.clone();
        TestContext {
            hardware,
            vehicle,
            callback,
            client,
        }
    }

    pub fn client_id(&self) -> ClientId {
        ClientId::of(&self.client)
    }

    /// Answer every driver read (including the engine's continuous poll
    /// reads) by echoing the requested prop with an int32 value of `[0]`.
    pub fn install_echo_responder(&self) {
        self.hardware.set_get_value_responder(Box::new(|requests| {
            requests
                .iter()
                .map(|request| GetValueResult {
                    request_id: request.request_id,
                    status: StatusCode::Ok,
                    prop: Some(request.prop.clone().with_int32_values(vec![0])),
                })
                .collect()
        }));
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Recording client double: stores every delivery for the test to pop.
#[derive(Default)]
pub struct MockVehicleCallback {
    get_results: Mutex<VecDeque<GetValueResults>>,
    set_results: Mutex<VecDeque<SetValueResults>>,
    property_events: Mutex<VecDeque<(PropertyValues, i32)>>,
    set_errors: Mutex<VecDeque<PropertyErrors>>,
}

impl MockVehicleCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn next_get_value_results(&self) -> Option<GetValueResults> {
        self.get_results.lock().pop_front()
    }

    pub fn next_set_value_results(&self) -> Option<SetValueResults> {
        self.set_results.lock().pop_front()
    }

    pub fn next_property_event(&self) -> Option<(PropertyValues, i32)> {
        self.property_events.lock().pop_front()
    }

    pub fn next_property_set_errors(&self) -> Option<PropertyErrors> {
        self.set_errors.lock().pop_front()
    }

    pub fn property_event_count(&self) -> usize {
        self.property_events.lock().len()
    }

    /// Pop everything queued so far.
    pub fn drain_property_events(&self) -> Vec<(PropertyValues, i32)> {
        self.property_events.lock().drain(..).collect()
    }

    /// Wait until at least one property event is queued, or give up.
    pub async fn wait_for_property_event(&self, timeout: Duration) -> Option<(PropertyValues, i32)> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.next_property_event() {
                return Some(event);
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until at least `count` property events have been queued.
    pub async fn wait_for_property_events(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.property_event_count() < count {
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

impl VehicleCallback for MockVehicleCallback {
    fn on_get_values(&self, results: GetValueResults) {
        self.get_results.lock().push_back(results);
    }

    fn on_set_values(&self, results: SetValueResults) {
        self.set_results.lock().push_back(results);
    }

    fn on_property_event(&self, values: PropertyValues, shared_memory_file_count: i32) {
        self.property_events
            .lock()
            .push_back((values, shared_memory_file_count));
    }

    fn on_property_set_error(&self, errors: PropertyErrors) {
        self.set_errors.lock().push_back(errors);
    }
}
