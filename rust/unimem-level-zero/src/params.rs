use std::sync::Arc;

use unimem_common::{Error, Result, verify_arg};
use unimem_provider::MemoryType;

use crate::driver::{ContextHandle, DeviceDriver, DeviceHandle, FreePolicy};

/// Longest accepted provider name, in bytes.
pub const MAX_NAME_LEN: usize = 63;

/// Construction arguments of a [`crate::LevelZeroMemoryProvider`].
///
/// Every setter validates its value first and leaves the parameters untouched
/// when it fails; a successful set overwrites any earlier value. The object is
/// not synchronized and must not be mutated from several threads at once.
#[derive(Clone, Default)]
pub struct LevelZeroProviderParams {
    driver: Option<Arc<dyn DeviceDriver>>,
    context: ContextHandle,
    device: DeviceHandle,
    memory_type: MemoryType,
    resident_devices: Vec<DeviceHandle>,
    free_policy: FreePolicy,
    device_ordinal: u32,
    name: Option<String>,
}

impl LevelZeroProviderParams {
    pub fn new() -> LevelZeroProviderParams {
        Default::default()
    }

    /// The driver all calls of the provider go through.
    pub fn set_driver(&mut self, driver: Arc<dyn DeviceDriver>) -> Result<()> {
        self.driver = Some(driver);
        Ok(())
    }

    pub fn set_context(&mut self, context: ContextHandle) -> Result<()> {
        verify_arg!(context, !context.is_null());
        self.context = context;
        Ok(())
    }

    /// Primary device of device and shared allocations. Not needed for host
    /// memory, which belongs to the whole context.
    pub fn set_device(&mut self, device: DeviceHandle) -> Result<()> {
        verify_arg!(device, !device.is_null());
        self.device = device;
        Ok(())
    }

    pub fn set_memory_type(&mut self, memory_type: MemoryType) -> Result<()> {
        if memory_type == MemoryType::Unknown {
            return Err(Error::invalid_arg(
                "memory_type",
                "must be host, device or shared",
            ));
        }
        self.memory_type = memory_type;
        Ok(())
    }

    /// [`LevelZeroProviderParams::set_memory_type`] for a raw memory type value.
    pub fn set_memory_type_raw(&mut self, memory_type: u32) -> Result<()> {
        self.set_memory_type(MemoryType::try_from(memory_type)?)
    }

    /// Peer devices every allocation is made resident on, in addition to the
    /// primary device. The list is copied; an empty list means the primary
    /// device only. Duplicates are kept as given.
    pub fn set_resident_devices(&mut self, devices: &[DeviceHandle]) -> Result<()> {
        if let Some(index) = devices.iter().position(|d| d.is_null()) {
            return Err(Error::invalid_arg(
                "resident_devices",
                format!("null device handle at index {index}"),
            ));
        }
        self.resident_devices = devices.to_vec();
        Ok(())
    }

    pub fn set_free_policy(&mut self, policy: FreePolicy) -> Result<()> {
        self.free_policy = policy;
        Ok(())
    }

    /// Memory ordinal forwarded to device allocation descriptors.
    pub fn set_device_ordinal(&mut self, ordinal: u32) -> Result<()> {
        self.device_ordinal = ordinal;
        Ok(())
    }

    /// Overrides the provider name reported by `MemoryProvider::name`.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        verify_arg!(name, !name.is_empty() && name.len() <= MAX_NAME_LEN);
        self.name = Some(name.to_string());
        Ok(())
    }

    pub fn driver(&self) -> Option<&Arc<dyn DeviceDriver>> {
        self.driver.as_ref()
    }

    pub fn context(&self) -> ContextHandle {
        self.context
    }

    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    pub fn resident_devices(&self) -> &[DeviceHandle] {
        &self.resident_devices
    }

    pub fn free_policy(&self) -> FreePolicy {
        self.free_policy
    }

    pub fn device_ordinal(&self) -> u32 {
        self.device_ordinal
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl std::fmt::Debug for LevelZeroProviderParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelZeroProviderParams")
            .field("driver", &self.driver.is_some())
            .field("context", &self.context)
            .field("device", &self.device)
            .field("memory_type", &self.memory_type)
            .field("resident_devices", &self.resident_devices)
            .field("free_policy", &self.free_policy)
            .field("device_ordinal", &self.device_ordinal)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use unimem_common::ResultCode;

    use super::*;

    #[test]
    fn test_last_write_wins() {
        let mut params = LevelZeroProviderParams::new();
        params.set_memory_type(MemoryType::Host).unwrap();
        params.set_memory_type(MemoryType::Shared).unwrap();
        assert_eq!(params.memory_type(), MemoryType::Shared);

        params
            .set_resident_devices(&[DeviceHandle::from_raw(1), DeviceHandle::from_raw(2)])
            .unwrap();
        params.set_resident_devices(&[]).unwrap();
        assert!(params.resident_devices().is_empty());
    }

    #[test]
    fn test_failed_set_leaves_params_unchanged() {
        let mut params = LevelZeroProviderParams::new();
        params.set_memory_type(MemoryType::Device).unwrap();
        params.set_device(DeviceHandle::from_raw(7)).unwrap();
        params
            .set_resident_devices(&[DeviceHandle::from_raw(8)])
            .unwrap();
        params.set_name("gpu0").unwrap();

        for err in [
            params.set_memory_type(MemoryType::Unknown).unwrap_err(),
            params.set_memory_type_raw(42).unwrap_err(),
            params.set_device(DeviceHandle::NULL).unwrap_err(),
            params.set_context(ContextHandle::NULL).unwrap_err(),
            params
                .set_resident_devices(&[DeviceHandle::from_raw(9), DeviceHandle::NULL])
                .unwrap_err(),
            params.set_name("").unwrap_err(),
            params.set_name(&"x".repeat(MAX_NAME_LEN + 1)).unwrap_err(),
        ] {
            assert_eq!(err.code(), ResultCode::InvalidArgument);
        }

        assert_eq!(params.memory_type(), MemoryType::Device);
        assert_eq!(params.device(), DeviceHandle::from_raw(7));
        assert!(params.context().is_null());
        assert_eq!(params.resident_devices(), [DeviceHandle::from_raw(8)]);
        assert_eq!(params.name(), Some("gpu0"));
    }

    #[test]
    fn test_resident_devices_are_copied() {
        let mut devices = vec![DeviceHandle::from_raw(3), DeviceHandle::from_raw(3)];
        let mut params = LevelZeroProviderParams::new();
        params.set_resident_devices(&devices).unwrap();
        devices[0] = DeviceHandle::from_raw(4);
        assert_eq!(
            params.resident_devices(),
            [DeviceHandle::from_raw(3), DeviceHandle::from_raw(3)]
        );
    }
}
