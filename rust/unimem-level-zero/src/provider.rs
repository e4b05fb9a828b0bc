//! The Level Zero memory provider.

use std::{ptr::NonNull, sync::Arc};

use unimem_common::{Error, Result, native_error::NativeError, verify_arg};
use unimem_page_alloc::{align::checked_align_up, mmap};
use unimem_provider::{
    AllocationProperties, MemoryProvider, MemoryProviderOps, MemoryType, ProviderCapabilities,
};
use unimem_sync::Mutex;

use crate::{
    driver::{
        ContextHandle, DeviceDriver, DeviceHandle, DeviceMemAllocDesc, DriverResult, FreePolicy,
    },
    params::LevelZeroProviderParams,
    status::{LEVEL_ZERO_ERROR, map_status},
};

const DEFAULT_NAME: &str = "LEVEL_ZERO";

/// Unified shared memory allocated through a [`DeviceDriver`].
///
/// Residency is established per allocation: after the primary allocation every
/// listed peer device is asked to make it resident, and a failure on any of them
/// frees the allocation again before the error is returned. Driver calls issued
/// against the context are serialized by an internal lock.
pub struct LevelZeroMemoryProvider {
    driver: Arc<dyn DeviceDriver>,
    context: ContextHandle,
    device: Option<DeviceHandle>,
    memory_type: MemoryType,
    resident_devices: Vec<DeviceHandle>,
    free_policy: FreePolicy,
    alloc_desc: DeviceMemAllocDesc,
    name: String,
    min_page_size: usize,
    max_alloc_size: Option<u64>,
    driver_lock: Mutex<()>,
}

impl LevelZeroMemoryProvider {
    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    pub fn resident_devices(&self) -> &[DeviceHandle] {
        &self.resident_devices
    }

    fn alloc_native(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        let res = match (self.memory_type, self.device) {
            (MemoryType::Host, _) => self.driver.mem_alloc_host(self.context, size, alignment),
            (MemoryType::Device, Some(device)) => self.driver.mem_alloc_device(
                self.context,
                &self.alloc_desc,
                size,
                alignment,
                device,
            ),
            (MemoryType::Shared, Some(device)) => self.driver.mem_alloc_shared(
                self.context,
                &self.alloc_desc,
                size,
                alignment,
                device,
            ),
            _ => return Err(Error::invalid_operation("alloc without a device")),
        };
        res.map_err(|status| map_status("zeMemAlloc", status))
    }

    /// Frees through the configured policy. Callers hold the driver lock.
    fn release(&self, ptr: NonNull<u8>) -> DriverResult<()> {
        match self.free_policy {
            FreePolicy::Default => self.driver.mem_free(self.context, ptr),
            policy => self.driver.mem_free_ext(self.context, policy, ptr),
        }
    }

    fn release_call(&self) -> &'static str {
        match self.free_policy {
            FreePolicy::Default => "zeMemFree",
            _ => "zeMemFreeExt",
        }
    }

    /// Frees an allocation that is being rolled back. `cause` is returned and its
    /// status stays the last native error, whatever the outcome of the free.
    fn roll_back(&self, ptr: NonNull<u8>, cause: Error) -> Error {
        if let Err(status) = self.release(ptr) {
            log::warn!(
                "{}: {} of {ptr:p} failed during rollback: {status}",
                self.name,
                self.release_call()
            );
        }
        cause
    }

    fn rounded(&self, size: usize) -> Result<usize> {
        checked_align_up(size.max(1), self.min_page_size)
            .ok_or_else(|| Error::invalid_arg("size", "size overflows the page rounding"))
    }
}

impl MemoryProviderOps for LevelZeroMemoryProvider {
    type Params = LevelZeroProviderParams;

    fn initialize(params: &LevelZeroProviderParams) -> Result<LevelZeroMemoryProvider> {
        let driver = params
            .driver()
            .cloned()
            .ok_or_else(|| Error::invalid_arg("driver", "no driver was set"))?;
        verify_arg!(context, !params.context().is_null());
        let memory_type = params.memory_type();
        verify_arg!(memory_type, memory_type != MemoryType::Unknown);
        let device = (!params.device().is_null()).then_some(params.device());
        if device.is_none() && memory_type != MemoryType::Host {
            return Err(Error::invalid_arg(
                "device",
                format!("{memory_type} memory requires a device"),
            ));
        }

        let (min_page_size, max_alloc_size) = match device {
            Some(device) => {
                let props = driver
                    .device_get_properties(device)
                    .map_err(|status| map_status("zeDeviceGetProperties", status))?;
                if !props.min_page_size.is_power_of_two() {
                    return Err(Error::provider_specific(
                        DEFAULT_NAME,
                        0,
                        format!(
                            "device {} reports page size {}",
                            props.name, props.min_page_size
                        ),
                    ));
                }
                (props.min_page_size, Some(props.max_mem_alloc_size))
            }
            None => (mmap::get_page_size(), None),
        };

        let name = params.name().unwrap_or(DEFAULT_NAME).to_string();
        log::debug!(
            "{name}: {memory_type} memory on {device:?}, min page size {min_page_size}, \
             {} resident devices",
            params.resident_devices().len()
        );
        Ok(LevelZeroMemoryProvider {
            driver,
            context: params.context(),
            device,
            memory_type,
            resident_devices: params.resident_devices().to_vec(),
            free_policy: params.free_policy(),
            alloc_desc: DeviceMemAllocDesc {
                ordinal: params.device_ordinal(),
            },
            name,
            min_page_size,
            max_alloc_size,
            driver_lock: Mutex::new(())?,
        })
    }
}

impl MemoryProvider for LevelZeroMemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        verify_arg!(alignment, alignment == 0 || alignment.is_power_of_two());
        let size = self.rounded(size)?;
        if let Some(max) = self.max_alloc_size {
            if size as u64 > max {
                return Err(Error::invalid_arg(
                    "size",
                    format!("{size} exceeds the device allocation limit {max}"),
                ));
            }
        }

        let _guard = self.driver_lock.lock();
        let ptr = self.alloc_native(size, alignment)?;

        for &device in &self.resident_devices {
            if let Err(status) =
                self.driver
                    .context_make_memory_resident(self.context, device, ptr, size)
            {
                log::debug!(
                    "{}: making {ptr:p} resident on {device:?} failed: {status}",
                    self.name
                );
                let cause = map_status("zeContextMakeMemoryResident", status);
                return Err(self.roll_back(ptr, cause));
            }
        }

        match self.driver.mem_get_alloc_properties(self.context, ptr) {
            Ok(props) => {
                if props.memory_type != self.memory_type {
                    log::warn!(
                        "{}: allocation {ptr:p} reported as {} memory, expected {}",
                        self.name,
                        props.memory_type,
                        self.memory_type
                    );
                }
            }
            Err(status) => {
                let cause = map_status("zeMemGetAllocProperties", status);
                return Err(self.roll_back(ptr, cause));
            }
        }
        Ok(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, _size: usize) -> Result<()> {
        let _guard = self.driver_lock.lock();
        self.release(ptr)
            .map_err(|status| map_status(self.release_call(), status))
    }

    fn min_page_size(&self, _ptr: Option<NonNull<u8>>) -> Result<usize> {
        Ok(self.min_page_size)
    }

    fn recommended_page_size(&self, size: usize) -> Result<usize> {
        self.rounded(size)
    }

    fn allocation_properties(&self, ptr: NonNull<u8>) -> Result<AllocationProperties> {
        let props = {
            let _guard = self.driver_lock.lock();
            self.driver
                .mem_get_alloc_properties(self.context, ptr)
                .map_err(|status| map_status("zeMemGetAllocProperties", status))?
        };
        Ok(AllocationProperties {
            memory_type: props.memory_type,
            page_size: props.page_size,
            id: props.id,
        })
    }

    fn capabilities(&self) -> ProviderCapabilities {
        match self.memory_type {
            MemoryType::Device => ProviderCapabilities::FREE | ProviderCapabilities::DEVICE_ACCESSIBLE,
            _ => {
                ProviderCapabilities::FREE
                    | ProviderCapabilities::DEVICE_ACCESSIBLE
                    | ProviderCapabilities::HOST_ACCESSIBLE
            }
        }
    }

    fn last_native_error(&self) -> Option<NativeError> {
        LEVEL_ZERO_ERROR.get()
    }

    fn finalize(&mut self) -> Result<()> {
        log::debug!(
            "{}: releasing context {:?} and {} resident devices",
            self.name,
            self.context,
            self.resident_devices.len()
        );
        self.resident_devices.clear();
        Ok(())
    }
}
