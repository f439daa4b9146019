//! Property identifiers and static per-property configuration
//!
//! A property id is a 32-bit value that packs three bit-fields next to the
//! numeric identifier: the property group, the area kind (global vs
//! area-scoped) and the value type. The engine only ever inspects the
//! area-kind and type fields; the group is opaque to it.

use serde::{Deserialize, Serialize};

/// Property group bits (e.g. `SYSTEM = 0x1000_0000`).
pub const GROUP_MASK: i32 = 0xF000_0000_u32 as i32;
/// Area-kind bits: global vs window/seat/... scoped.
pub const AREA_KIND_MASK: i32 = 0x0F00_0000;
/// Value-type bits, see [`PropertyType`].
pub const TYPE_MASK: i32 = 0x00FF_0000;

const AREA_KIND_GLOBAL: i32 = 0x0100_0000;

/// The only area id valid for a global property.
pub const GLOBAL_AREA_ID: i32 = 0;

/// The value type encoded in a property id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Boolean,
    Int32,
    Int32Vec,
    Int64,
    Int64Vec,
    Float,
    FloatVec,
    Bytes,
}

impl PropertyType {
    /// Decode the type field of a property id. `None` for type bits the
    /// engine does not understand.
    pub fn of(prop: i32) -> Option<PropertyType> {
        match prop & TYPE_MASK {
            0x0010_0000 => Some(PropertyType::String),
            0x0020_0000 => Some(PropertyType::Boolean),
            0x0040_0000 => Some(PropertyType::Int32),
            0x0041_0000 => Some(PropertyType::Int32Vec),
            0x0050_0000 => Some(PropertyType::Int64),
            0x0051_0000 => Some(PropertyType::Int64Vec),
            0x0060_0000 => Some(PropertyType::Float),
            0x0061_0000 => Some(PropertyType::FloatVec),
            0x0070_0000 => Some(PropertyType::Bytes),
            _ => None,
        }
    }

    /// The raw type bits for this variant.
    pub fn raw(self) -> i32 {
        match self {
            PropertyType::String => 0x0010_0000,
            PropertyType::Boolean => 0x0020_0000,
            PropertyType::Int32 => 0x0040_0000,
            PropertyType::Int32Vec => 0x0041_0000,
            PropertyType::Int64 => 0x0050_0000,
            PropertyType::Int64Vec => 0x0051_0000,
            PropertyType::Float => 0x0060_0000,
            PropertyType::FloatVec => 0x0061_0000,
            PropertyType::Bytes => 0x0070_0000,
        }
    }
}

/// Whether the property's area kind is global.
pub fn is_global(prop: i32) -> bool {
    prop & AREA_KIND_MASK == AREA_KIND_GLOBAL
}

/// How a property emits events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMode {
    /// Never emits; not subscribable.
    #[default]
    Static,
    /// Emits when the hardware observes a new value.
    OnChange,
    /// Sampled at a negotiated rate within the configured band.
    Continuous,
}

/// Per-area value range. A min == max == 0 pair means no declared range
/// for that representation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AreaConfig {
    pub area_id: i32,
    pub min_int32_value: i32,
    pub max_int32_value: i32,
    pub min_int64_value: i64,
    pub max_int64_value: i64,
    pub min_float_value: f32,
    pub max_float_value: f32,
}

impl AreaConfig {
    pub fn new(area_id: i32) -> Self {
        AreaConfig {
            area_id,
            ..Default::default()
        }
    }

    pub fn with_int32_range(mut self, min: i32, max: i32) -> Self {
        self.min_int32_value = min;
        self.max_int32_value = max;
        self
    }

    pub fn with_float_range(mut self, min: f32, max: f32) -> Self {
        self.min_float_value = min;
        self.max_float_value = max;
        self
    }
}

/// Static configuration of a single property, reported once by the driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub prop: i32,
    pub change_mode: ChangeMode,
    pub area_configs: Vec<AreaConfig>,
    pub min_sample_rate: f32,
    pub max_sample_rate: f32,
}

impl PropertyConfig {
    pub fn new(prop: i32) -> Self {
        PropertyConfig {
            prop,
            ..Default::default()
        }
    }

    pub fn with_change_mode(mut self, change_mode: ChangeMode) -> Self {
        self.change_mode = change_mode;
        self
    }

    pub fn with_area(mut self, area: AreaConfig) -> Self {
        self.area_configs.push(area);
        self
    }

    pub fn with_sample_rate_band(mut self, min: f32, max: f32) -> Self {
        self.min_sample_rate = min;
        self.max_sample_rate = max;
        self
    }

    pub fn is_global(&self) -> bool {
        is_global(self.prop)
    }

    pub fn area_config(&self, area_id: i32) -> Option<&AreaConfig> {
        self.area_configs.iter().find(|a| a.area_id == area_id)
    }

    /// The area ids a subscription with an empty area list expands to:
    /// the configured set, or the global area for a global property with
    /// no explicit area configs.
    pub fn area_ids(&self) -> Vec<i32> {
        if self.area_configs.is_empty() {
            vec![GLOBAL_AREA_ID]
        } else {
            self.area_configs.iter().map(|a| a.area_id).collect()
        }
    }

    /// Whether `area_id` addresses this property: the global area for a
    /// global property, one of the configured areas otherwise.
    pub fn supports_area(&self, area_id: i32) -> bool {
        if self.is_global() {
            area_id == GLOBAL_AREA_ID
        } else {
            self.area_config(area_id).is_some()
        }
    }
}
