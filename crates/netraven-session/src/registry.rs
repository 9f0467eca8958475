use std::collections::HashMap;
use std::sync::Arc;

use netraven_domain::Device;

use crate::driver::Driver;
use crate::error::SessionError;

/// Dispatches driver calls to the correct per-`device_family` [`Driver`].
///
/// A device's `device_family` field selects its driver directly; there is no
/// "default" fallback — an unregistered family surfaces
/// `SessionError::UnknownDeviceFamily` and the caller turns that into a
/// per-device failure.
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        DriverRegistry { drivers: HashMap::new() }
    }

    /// Register a driver. Returns `&mut self` for chaining.
    pub fn register(&mut self, driver: Arc<dyn Driver>) -> &mut Self {
        self.drivers.insert(driver.family().to_string(), driver);
        self
    }

    pub fn for_device(&self, device: &Device) -> Result<Arc<dyn Driver>, SessionError> {
        self.drivers
            .get(device.device_family.as_str())
            .cloned()
            .ok_or_else(|| SessionError::UnknownDeviceFamily(device.device_family.clone()))
    }

    /// Families with a registered driver, for the UI's device-family picker.
    pub fn registered_families(&self) -> Vec<String> {
        let mut families: Vec<String> = self.drivers.keys().cloned().collect();
        families.sort();
        families
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedDriver;

    fn device(family: &str) -> Device {
        Device {
            id: netraven_domain::DeviceId::new(),
            hostname: "sw1".into(),
            address: "10.0.0.1".into(),
            device_family: family.into(),
            port: 22,
            tags: Default::default(),
            last_reachability_status: Default::default(),
            last_updated_at: None,
        }
    }

    #[test]
    fn unregistered_family_is_an_error() {
        let registry = DriverRegistry::new();
        let err = registry.for_device(&device("cisco_ios")).unwrap_err();
        assert!(matches!(err, SessionError::UnknownDeviceFamily(f) if f == "cisco_ios"));
    }

    #[test]
    fn registered_family_resolves() {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(ScriptedDriver::always_reachable()));
        assert!(registry.for_device(&device("scripted")).is_ok());
    }
}
