//! The operations table every backend implements.

use std::ptr::NonNull;

use unimem_common::{Error, Result, native_error::NativeError};

/// Kind of memory an allocation lives in.
///
/// The numeric values follow the unified shared memory types of accelerator
/// runtimes, so raw driver values convert with [`MemoryType::try_from`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum MemoryType {
    #[default]
    Unknown = 0,
    /// Host memory, accessible by the host and by devices of the same context.
    Host = 1,
    /// Memory owned by one device.
    Device = 2,
    /// Memory migrating between the host and devices on demand.
    Shared = 3,
}

impl MemoryType {
    pub fn name(&self) -> &'static str {
        match self {
            MemoryType::Unknown => "unknown",
            MemoryType::Host => "host",
            MemoryType::Device => "device",
            MemoryType::Shared => "shared",
        }
    }
}

impl TryFrom<u32> for MemoryType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(MemoryType::Unknown),
            1 => Ok(MemoryType::Host),
            2 => Ok(MemoryType::Device),
            3 => Ok(MemoryType::Shared),
            _ => Err(Error::invalid_arg(
                "memory_type",
                format!("unknown memory type {value}"),
            )),
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// What a provider instance can do beyond plain allocate/free.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProviderCapabilities: u32 {
        /// Individual allocations can be returned with `free`.
        const FREE = 1;
        /// Allocations can be dereferenced by the host.
        const HOST_ACCESSIBLE = 1 << 1;
        /// Allocations can be accessed by one or more devices.
        const DEVICE_ACCESSIBLE = 1 << 2;
        /// Allocations are views of a file.
        const FILE_BACKED = 1 << 3;
        /// Allocations are made of large (huge) pages.
        const LARGE_PAGES = 1 << 4;
    }
}

/// What a provider knows about one of its allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationProperties {
    pub memory_type: MemoryType,
    /// Granularity of the pages backing the allocation.
    pub page_size: usize,
    /// Backend-assigned allocation id, `0` when the backend has none.
    pub id: u64,
}

/// The operations table of one backend variant.
///
/// Every entry is required; there are no optional operations. All methods may be
/// called concurrently from independent threads against the same instance, so a
/// variant serializes internally wherever its backend is not thread-safe.
///
/// Instances are normally owned by a [`crate::MemoryProviderHandle`], which calls
/// [`MemoryProvider::finalize`] exactly once before dropping the provider.
pub trait MemoryProvider: Send + Sync {
    /// Short, stable name of the variant (`"OS"`, `"LEVEL_ZERO"`, ...).
    fn name(&self) -> &str;

    /// Allocates at least `size` bytes aligned to `alignment`.
    ///
    /// `alignment` is zero (no requirement beyond the backend's natural one) or a
    /// power of two. Ownership of the returned memory moves to the caller until it
    /// is passed back to [`MemoryProvider::free`] of the same instance.
    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>>;

    /// Returns an allocation to the provider.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`MemoryProvider::alloc`] of this instance with the
    /// same `size`, must not have been freed already, and must not be used after
    /// this call.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<()>;

    /// Minimum allocation granularity, optionally for a specific allocation.
    fn min_page_size(&self, ptr: Option<NonNull<u8>>) -> Result<usize>;

    /// Page size the provider recommends for an allocation of `size` bytes.
    fn recommended_page_size(&self, size: usize) -> Result<usize>;

    /// Properties of an allocation made by this instance.
    fn allocation_properties(&self, ptr: NonNull<u8>) -> Result<AllocationProperties>;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Last native (OS or driver) failure recorded on the calling thread by this
    /// variant, in the backend's own terms.
    fn last_native_error(&self) -> Option<NativeError>;

    /// Releases backend resources held by the provider itself.
    ///
    /// Outstanding allocations are the caller's; they are not reclaimed here.
    fn finalize(&mut self) -> Result<()>;
}

/// Construction of a variant from its parameter object.
pub trait MemoryProviderOps: MemoryProvider + Sized + 'static {
    /// The parameter object collecting the variant's construction arguments.
    type Params;

    /// Validates `params` and brings up the backend.
    ///
    /// Either a fully initialized provider is returned or nothing is left behind.
    fn initialize(params: &Self::Params) -> Result<Self>;
}
