//! The driver boundary consumed by the engine
//!
//! The driver answers get/set batches asynchronously through the supplied
//! callback, on whatever thread it likes, possibly late and possibly
//! never. The engine must not block on it.

use std::sync::Arc;

use crate::property::PropertyConfig;
use crate::request::{GetValueRequest, GetValueResult, PropertyError, SetValueRequest, SetValueResult};
use crate::status::StatusCode;
use crate::value::PropertyValue;

/// Delivers the driver's asynchronous replies to one get batch.
pub type GetValuesCallback = Arc<dyn Fn(Vec<GetValueResult>) + Send + Sync>;

/// Delivers the driver's asynchronous replies to one set batch.
pub type SetValuesCallback = Arc<dyn Fn(Vec<SetValueResult>) + Send + Sync>;

/// Fired for every hardware-originated property change.
pub type PropertyChangeCallback = Box<dyn Fn(Vec<PropertyValue>) + Send + Sync>;

/// Fired when a set applied by the hardware later fails asynchronously.
pub type PropertySetErrorCallback = Box<dyn Fn(Vec<PropertyError>) + Send + Sync>;

/// A pluggable vehicle hardware driver.
pub trait VehicleHardware: Send + Sync {
    /// Static configuration for every property the driver knows. Read
    /// once at engine start; the result must not change afterwards.
    fn all_property_configs(&self) -> Vec<PropertyConfig>;

    /// Submit a batch of reads. A non-OK return means the driver took
    /// nothing; `Ok` means every request will eventually be answered
    /// through `callback` (or not at all, which the caller must bound
    /// with its own deadline).
    fn get_values(&self, callback: GetValuesCallback, requests: &[GetValueRequest]) -> StatusCode;

    /// Submit a batch of writes, same contract as [`Self::get_values`].
    fn set_values(&self, callback: SetValuesCallback, requests: &[SetValueRequest]) -> StatusCode;

    /// Install the sink for change events. Called once during engine
    /// construction.
    fn register_on_property_change(&self, callback: PropertyChangeCallback);

    /// Install the sink for asynchronous set failures. Called once during
    /// engine construction.
    fn register_on_property_set_error(&self, callback: PropertySetErrorCallback);
}
