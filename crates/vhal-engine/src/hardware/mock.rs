//! Mock vehicle hardware driver for tests and demos
//!
//! Replies come from preset response queues, a pluggable responder, or a
//! synthesized OK echo when neither is configured. A configurable delay
//! moves the reply onto a plain OS thread, which is exactly how a real
//! driver is allowed to behave. Successful writes are reflected back as
//! property change events, the way real hardware reports the new value.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use vhal_core::{
    GetValueRequest, GetValueResult, GetValuesCallback, PropertyChangeCallback, PropertyConfig,
    PropertyError, PropertySetErrorCallback, PropertyValue, SetValueRequest, SetValueResult,
    SetValuesCallback, StatusCode, VehicleHardware,
};

pub type GetValueResponder = Box<dyn Fn(&[GetValueRequest]) -> Vec<GetValueResult> + Send + Sync>;

#[derive(Default)]
pub struct MockVehicleHardware {
    configs: RwLock<Vec<PropertyConfig>>,
    get_responses: Mutex<VecDeque<Vec<GetValueResult>>>,
    set_responses: Mutex<VecDeque<Vec<SetValueResult>>>,
    recorded_get_requests: Mutex<VecDeque<Vec<GetValueRequest>>>,
    recorded_set_requests: Mutex<VecDeque<Vec<SetValueRequest>>>,
    get_status: Mutex<Option<StatusCode>>,
    set_status: Mutex<Option<StatusCode>>,
    sleep_time: Mutex<Option<Duration>>,
    get_responder: Mutex<Option<GetValueResponder>>,
    on_change: Arc<Mutex<Option<PropertyChangeCallback>>>,
    on_set_error: Arc<Mutex<Option<PropertySetErrorCallback>>>,
}

impl MockVehicleHardware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_property_configs(&self, configs: Vec<PropertyConfig>) {
        *self.configs.write() = configs;
    }

    /// Queue one reply batch for the next get call.
    pub fn add_get_value_responses(&self, responses: Vec<GetValueResult>) {
        self.get_responses.lock().push_back(responses);
    }

    /// Queue one reply batch for the next set call.
    pub fn add_set_value_responses(&self, responses: Vec<SetValueResult>) {
        self.set_responses.lock().push_back(responses);
    }

    /// Pop the requests the driver saw, call by call.
    pub fn next_get_value_requests(&self) -> Option<Vec<GetValueRequest>> {
        self.recorded_get_requests.lock().pop_front()
    }

    pub fn next_set_value_requests(&self) -> Option<Vec<SetValueRequest>> {
        self.recorded_set_requests.lock().pop_front()
    }

    /// Make every get call fail synchronously with `status`.
    pub fn set_get_values_status(&self, status: StatusCode) {
        *self.get_status.lock() = Some(status);
    }

    pub fn set_set_values_status(&self, status: StatusCode) {
        *self.set_status.lock() = Some(status);
    }

    /// Delay every reply by `delay`, delivered from a separate thread.
    pub fn set_sleep_time(&self, delay: Duration) {
        *self.sleep_time.lock() = Some(delay);
    }

    /// Compute get replies from the requests instead of a preset queue.
    /// Used to answer the engine's continuous poll reads.
    pub fn set_get_value_responder(&self, responder: GetValueResponder) {
        *self.get_responder.lock() = Some(responder);
    }

    /// Inject a hardware-originated change event.
    pub fn trigger_property_change(&self, values: Vec<PropertyValue>) {
        if let Some(callback) = self.on_change.lock().as_ref() {
            callback(values);
        }
    }

    /// Inject an asynchronous set failure.
    pub fn trigger_property_set_error(&self, errors: Vec<PropertyError>) {
        if let Some(callback) = self.on_set_error.lock().as_ref() {
            callback(errors);
        }
    }

    fn get_reply(&self, requests: &[GetValueRequest]) -> Vec<GetValueResult> {
        if let Some(responder) = self.get_responder.lock().as_ref() {
            return responder(requests);
        }
        if let Some(results) = self.get_responses.lock().pop_front() {
            return results;
        }
        // Nothing configured: echo the requested props back as OK.
        requests
            .iter()
            .map(|request| GetValueResult {
                request_id: request.request_id,
                status: StatusCode::Ok,
                prop: Some(request.prop.clone()),
            })
            .collect()
    }

    fn set_reply(&self, requests: &[SetValueRequest]) -> Vec<SetValueResult> {
        if let Some(results) = self.set_responses.lock().pop_front() {
            return results;
        }
        requests
            .iter()
            .map(|request| SetValueResult {
                request_id: request.request_id,
                status: StatusCode::Ok,
            })
            .collect()
    }

    /// The change events a successful set batch produces: one value per
    /// request whose result came back OK.
    fn changed_values(
        requests: &[SetValueRequest],
        results: &[SetValueResult],
    ) -> Vec<PropertyValue> {
        requests
            .iter()
            .filter(|request| {
                results
                    .iter()
                    .any(|r| r.request_id == request.request_id && r.status == StatusCode::Ok)
            })
            .map(|request| request.value.clone())
            .collect()
    }
}

impl VehicleHardware for MockVehicleHardware {
    fn all_property_configs(&self) -> Vec<PropertyConfig> {
        self.configs.read().clone()
    }

    fn get_values(&self, callback: GetValuesCallback, requests: &[GetValueRequest]) -> StatusCode {
        if let Some(status) = *self.get_status.lock() {
            if status != StatusCode::Ok {
                return status;
            }
        }
        self.recorded_get_requests.lock().push_back(requests.to_vec());
        let results = self.get_reply(requests);
        let delay = *self.sleep_time.lock();
        match delay {
            Some(delay) => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    callback(results);
                });
            }
            None => callback(results),
        }
        StatusCode::Ok
    }

    fn set_values(&self, callback: SetValuesCallback, requests: &[SetValueRequest]) -> StatusCode {
        if let Some(status) = *self.set_status.lock() {
            if status != StatusCode::Ok {
                return status;
            }
        }
        self.recorded_set_requests.lock().push_back(requests.to_vec());
        let results = self.set_reply(requests);
        let changed = Self::changed_values(requests, &results);
        let on_change = Arc::clone(&self.on_change);
        let deliver = move || {
            callback(results);
            if !changed.is_empty() {
                if let Some(callback) = on_change.lock().as_ref() {
                    callback(changed);
                }
            }
        };
        let delay = *self.sleep_time.lock();
        match delay {
            Some(delay) => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    deliver();
                });
            }
            None => deliver(),
        }
        StatusCode::Ok
    }

    fn register_on_property_change(&self, callback: PropertyChangeCallback) {
        *self.on_change.lock() = Some(callback);
    }

    fn register_on_property_set_error(&self, callback: PropertySetErrorCallback) {
        *self.on_set_error.lock() = Some(callback);
    }
}
