//! Immutable per-property configuration, loaded once from the driver

use std::collections::HashMap;

use tracing::{info, warn};
use vhal_core::{PropertyConfig, PropertyConfigs, VehicleHardware, VehicleResult};

/// Every property configuration the driver reported at engine start.
/// Stable for the process lifetime.
pub struct PropertyConfigStore {
    configs: HashMap<i32, PropertyConfig>,
}

impl PropertyConfigStore {
    pub fn load(hardware: &dyn VehicleHardware) -> Self {
        let mut configs = HashMap::new();
        for config in hardware.all_property_configs() {
            if let Some(previous) = configs.insert(config.prop, config) {
                warn!(
                    prop = format_args!("{:#x}", previous.prop),
                    "driver reported duplicate property config, keeping the last one"
                );
            }
        }
        info!(count = configs.len(), "loaded property configs from driver");
        PropertyConfigStore { configs }
    }

    pub fn lookup(&self, prop: i32) -> Option<&PropertyConfig> {
        self.configs.get(&prop)
    }

    pub fn all(&self) -> impl Iterator<Item = &PropertyConfig> {
        self.configs.values()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// The full config list as a transport batch, spilled to shared
    /// memory when oversized.
    pub fn stable_configs(&self) -> VehicleResult<PropertyConfigs> {
        let payloads: Vec<PropertyConfig> = self.all().cloned().collect();
        Ok(PropertyConfigs::from_payloads(payloads)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockVehicleHardware;

    #[test]
    fn test_lookup_and_all() {
        let hardware = MockVehicleHardware::new();
        hardware.set_property_configs(vec![PropertyConfig::new(1), PropertyConfig::new(2)]);

        let store = PropertyConfigStore::load(&hardware);
        assert_eq!(store.len(), 2);
        assert!(store.lookup(1).is_some());
        assert!(store.lookup(3).is_none());
    }

    #[test]
    fn test_small_config_list_stays_inline() {
        let hardware = MockVehicleHardware::new();
        hardware.set_property_configs(vec![PropertyConfig::new(1), PropertyConfig::new(2)]);

        let store = PropertyConfigStore::load(&hardware);
        let batch = store.stable_configs().unwrap();
        assert!(!batch.is_spilled());
        assert_eq!(batch.payloads.len(), 2);
    }

    #[test]
    fn test_large_config_list_spills() {
        let hardware = MockVehicleHardware::new();
        hardware.set_property_configs((0..5000).map(PropertyConfig::new).collect());

        let store = PropertyConfigStore::load(&hardware);
        let batch = store.stable_configs().unwrap();
        assert!(batch.is_spilled());
        assert!(batch.payloads.is_empty());
        assert_eq!(batch.into_payloads().unwrap().len(), 5000);
    }
}
