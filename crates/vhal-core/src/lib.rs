//! vhal-core - Core types and boundary traits for the vehicle HAL service
//!
//! This crate defines the wire-level data model shared by the engine, the
//! hardware drivers and the clients: property configurations and values,
//! request/result batches, the status/error taxonomy, and the two traits
//! that bound the engine (`VehicleHardware` below, `VehicleCallback` above).

pub mod callback;
pub mod hardware;
pub mod payload;
pub mod property;
pub mod request;
pub mod status;
pub mod value;

pub use callback::{ClientId, VehicleCallback};
pub use hardware::{
    GetValuesCallback, PropertyChangeCallback, PropertySetErrorCallback, SetValuesCallback,
    VehicleHardware,
};
pub use payload::{Batch, PayloadError, SharedPayload, INLINE_LIMIT};
pub use property::{AreaConfig, ChangeMode, PropertyConfig, PropertyType, GLOBAL_AREA_ID};
pub use request::{
    GetValueRequest, GetValueRequests, GetValueResult, GetValueResults, PropertyConfigs,
    PropertyError, PropertyErrors, PropertyValues, SetValueRequest, SetValueRequests,
    SetValueResult, SetValueResults, SubscribeOptions,
};
pub use status::{StatusCode, VehicleError, VehicleResult};
pub use value::{PropertyValue, RawPropValues};
