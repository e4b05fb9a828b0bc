//! The driver call surface wrapped by the provider.

use std::ptr::NonNull;

use unimem_common::{Error, Result};
use unimem_provider::MemoryType;

use crate::status::DriverStatus;

pub type DriverResult<T> = std::result::Result<T, DriverStatus>;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(usize);

        impl $name {
            pub const NULL: $name = $name(0);

            pub const fn from_raw(raw: usize) -> $name {
                $name(raw)
            }

            pub const fn as_raw(self) -> usize {
                self.0
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

opaque_handle!(
    /// Driver handle of one device (or sub-device).
    DeviceHandle
);

opaque_handle!(
    /// Driver handle of a context; allocations belong to exactly one context.
    ContextHandle
);

/// How the driver releases an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FreePolicy {
    /// Immediate free; the caller guarantees the device no longer uses the memory.
    #[default]
    Default,
    /// Blocks until all device work referencing the allocation has completed.
    BlockingFree,
    /// Defers the free until the device work referencing it has completed.
    DeferFree,
}

impl TryFrom<u32> for FreePolicy {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(FreePolicy::Default),
            1 => Ok(FreePolicy::BlockingFree),
            2 => Ok(FreePolicy::DeferFree),
            _ => Err(Error::invalid_arg(
                "free_policy",
                format!("unknown free policy {value}"),
            )),
        }
    }
}

/// Descriptor of a device-side allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceMemAllocDesc {
    /// Memory ordinal of the device the allocation is placed in.
    pub ordinal: u32,
}

/// The device properties the provider consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub name: String,
    /// Smallest allocation granularity of device memory.
    pub min_page_size: usize,
    /// Largest single allocation the device accepts.
    pub max_mem_alloc_size: u64,
}

/// Properties of an existing allocation as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemAllocProperties {
    pub memory_type: MemoryType,
    pub id: u64,
    pub page_size: usize,
}

/// Driver entry points used by the Level Zero provider.
///
/// Each call returns the driver's output or its non-success status. The provider
/// serializes the calls it issues against one context.
pub trait DeviceDriver: Send + Sync {
    fn device_get_properties(&self, device: DeviceHandle) -> DriverResult<DeviceProperties>;

    fn mem_alloc_device(
        &self,
        context: ContextHandle,
        desc: &DeviceMemAllocDesc,
        size: usize,
        alignment: usize,
        device: DeviceHandle,
    ) -> DriverResult<NonNull<u8>>;

    fn mem_alloc_host(
        &self,
        context: ContextHandle,
        size: usize,
        alignment: usize,
    ) -> DriverResult<NonNull<u8>>;

    fn mem_alloc_shared(
        &self,
        context: ContextHandle,
        desc: &DeviceMemAllocDesc,
        size: usize,
        alignment: usize,
        device: DeviceHandle,
    ) -> DriverResult<NonNull<u8>>;

    /// Makes `size` bytes at `ptr` resident on `device`.
    fn context_make_memory_resident(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        ptr: NonNull<u8>,
        size: usize,
    ) -> DriverResult<()>;

    fn mem_free(&self, context: ContextHandle, ptr: NonNull<u8>) -> DriverResult<()>;

    /// Frees with an explicit policy (`zeMemFreeExt`).
    fn mem_free_ext(
        &self,
        context: ContextHandle,
        policy: FreePolicy,
        ptr: NonNull<u8>,
    ) -> DriverResult<()>;

    fn mem_get_alloc_properties(
        &self,
        context: ContextHandle,
        ptr: NonNull<u8>,
    ) -> DriverResult<MemAllocProperties>;
}
