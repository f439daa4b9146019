//! Request, result and subscription wire types

use serde::{Deserialize, Serialize};

use crate::payload::Batch;
use crate::property::PropertyConfig;
use crate::status::StatusCode;
use crate::value::PropertyValue;

/// One typed property read. The `prop` value carries the property and
/// area ids; its value union is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetValueRequest {
    /// Client-scoped id, echoed back in the matching result.
    pub request_id: i64,
    pub prop: PropertyValue,
}

/// Terminal outcome of one get request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetValueResult {
    pub request_id: i64,
    pub status: StatusCode,
    /// Present only when `status` is `Ok`.
    pub prop: Option<PropertyValue>,
}

/// One typed property write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetValueRequest {
    pub request_id: i64,
    pub value: PropertyValue,
}

/// Terminal outcome of one set request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetValueResult {
    pub request_id: i64,
    pub status: StatusCode,
}

/// One subscription request entry.
///
/// An empty `area_ids` list expands to every configured area of the
/// property; for a global property that is the global area alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    pub prop_id: i32,
    pub area_ids: Vec<i32>,
    /// Samples per second; only meaningful for continuous properties.
    pub sample_rate: f32,
}

/// An asynchronous set failure reported by the hardware.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyError {
    pub prop_id: i32,
    pub area_id: i32,
    pub status: StatusCode,
}

/// Batches exchanged over the transport; each spills to shared memory
/// above the inline limit.
pub type GetValueRequests = Batch<GetValueRequest>;
pub type GetValueResults = Batch<GetValueResult>;
pub type SetValueRequests = Batch<SetValueRequest>;
pub type SetValueResults = Batch<SetValueResult>;
pub type PropertyConfigs = Batch<PropertyConfig>;
pub type PropertyValues = Batch<PropertyValue>;
pub type PropertyErrors = Batch<PropertyError>;
