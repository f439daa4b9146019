//! Property values and per-item validation

use serde::{Deserialize, Serialize};

use crate::property::{PropertyConfig, PropertyType};
use crate::status::{VehicleError, VehicleResult};

/// The open value union. Exactly the fields selected by the property's
/// type bits are meaningful; everything else stays empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPropValues {
    pub int32_values: Vec<i32>,
    pub int64_values: Vec<i64>,
    pub float_values: Vec<f32>,
    pub byte_values: Vec<u8>,
    pub string_value: String,
}

/// A timestamped value of one property at one area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub prop: i32,
    pub area_id: i32,
    /// Nanoseconds since an epoch chosen by the driver.
    pub timestamp: i64,
    pub value: RawPropValues,
}

impl PropertyValue {
    pub fn new(prop: i32) -> Self {
        PropertyValue {
            prop,
            ..Default::default()
        }
    }

    pub fn with_area(mut self, area_id: i32) -> Self {
        self.area_id = area_id;
        self
    }

    pub fn with_int32_values(mut self, values: Vec<i32>) -> Self {
        self.value.int32_values = values;
        self
    }
}

impl PropertyConfig {
    /// Reject area ids that do not address this property.
    pub fn check_area(&self, area_id: i32) -> VehicleResult<()> {
        if self.supports_area(area_id) {
            Ok(())
        } else {
            Err(VehicleError::InvalidArg(format!(
                "area {area_id} is not configured for property {:#x}",
                self.prop
            )))
        }
    }

    /// Reject values whose populated union field disagrees with the
    /// property's type bits, or whose numbers fall outside the range the
    /// area config declares.
    pub fn check_value(&self, value: &PropertyValue) -> VehicleResult<()> {
        let property_type = PropertyType::of(self.prop).ok_or_else(|| {
            VehicleError::InvalidArg(format!("property {:#x} has unknown type bits", self.prop))
        })?;

        let raw = &value.value;
        let populated = match property_type {
            PropertyType::Int32 => raw.int32_values.len() == 1,
            PropertyType::Int32Vec => !raw.int32_values.is_empty(),
            PropertyType::Int64 => raw.int64_values.len() == 1,
            PropertyType::Int64Vec => !raw.int64_values.is_empty(),
            PropertyType::Float => raw.float_values.len() == 1,
            PropertyType::FloatVec => !raw.float_values.is_empty(),
            PropertyType::Boolean => {
                raw.int32_values.len() == 1 && (raw.int32_values[0] == 0 || raw.int32_values[0] == 1)
            }
            // Strings and byte blobs have no cardinality to check.
            PropertyType::String | PropertyType::Bytes => true,
        };
        if !populated {
            return Err(VehicleError::InvalidArg(format!(
                "value does not match type {property_type:?} of property {:#x}",
                self.prop
            )));
        }

        let Some(area) = self.area_config(value.area_id) else {
            // No area config, no declared range.
            return Ok(());
        };

        if area.min_int32_value != 0 || area.max_int32_value != 0 {
            for v in &raw.int32_values {
                if *v < area.min_int32_value || *v > area.max_int32_value {
                    return Err(VehicleError::InvalidArg(format!(
                        "int32 value {v} outside [{}, {}] for property {:#x} area {}",
                        area.min_int32_value, area.max_int32_value, self.prop, value.area_id
                    )));
                }
            }
        }
        if area.min_int64_value != 0 || area.max_int64_value != 0 {
            for v in &raw.int64_values {
                if *v < area.min_int64_value || *v > area.max_int64_value {
                    return Err(VehicleError::InvalidArg(format!(
                        "int64 value {v} outside [{}, {}] for property {:#x} area {}",
                        area.min_int64_value, area.max_int64_value, self.prop, value.area_id
                    )));
                }
            }
        }
        if area.min_float_value != 0.0 || area.max_float_value != 0.0 {
            for v in &raw.float_values {
                if *v < area.min_float_value || *v > area.max_float_value {
                    return Err(VehicleError::InvalidArg(format!(
                        "float value {v} outside [{}, {}] for property {:#x} area {}",
                        area.min_float_value, area.max_float_value, self.prop, value.area_id
                    )));
                }
            }
        }
        Ok(())
    }
}
