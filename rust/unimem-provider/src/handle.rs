//! The provider factory and the owned provider handle.

use std::{
    ptr::NonNull,
    sync::atomic::{AtomicU8, AtomicU64, Ordering},
};

use unimem_common::{Error, Result, native_error::NativeError, verify_arg};
use unimem_sync::atomic::{
    atomic_increment, atomic_load_acquire, fetch_and_add, fetch_and_sub,
};

use crate::provider::{
    AllocationProperties, MemoryProvider, MemoryProviderOps, ProviderCapabilities,
};

/// Lifecycle of a provider handle.
///
/// `Uninitialized` and `Initializing` describe a provider while `P::initialize`
/// runs inside [`MemoryProviderHandle::create`]. No handle exists in those states:
/// a handle starts `Ready` and moves through `Destroying` to `Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProviderState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Destroying = 3,
    Destroyed = 4,
}

impl ProviderState {
    fn from_u8(value: u8) -> ProviderState {
        match value {
            0 => ProviderState::Uninitialized,
            1 => ProviderState::Initializing,
            2 => ProviderState::Ready,
            3 => ProviderState::Destroying,
            _ => ProviderState::Destroyed,
        }
    }
}

/// Snapshot of the allocation counters of a handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    /// Bytes currently allocated (as requested by callers).
    pub allocated_bytes: u64,
    /// High-water mark of `allocated_bytes`.
    pub peak_bytes: u64,
    pub alloc_count: u64,
    pub free_count: u64,
}

#[derive(Default)]
struct Counters {
    allocated_bytes: AtomicU64,
    peak_bytes: AtomicU64,
    alloc_count: AtomicU64,
    free_count: AtomicU64,
}

impl Counters {
    fn on_alloc(&self, size: usize) {
        let size = size as u64;
        let allocated = fetch_and_add(&self.allocated_bytes, size) + size;
        self.peak_bytes.fetch_max(allocated, Ordering::AcqRel);
        atomic_increment(&self.alloc_count);
    }

    fn on_free(&self, size: usize) {
        fetch_and_sub(&self.allocated_bytes, size as u64);
        atomic_increment(&self.free_count);
    }

    fn snapshot(&self) -> ProviderStats {
        ProviderStats {
            allocated_bytes: atomic_load_acquire(&self.allocated_bytes),
            peak_bytes: atomic_load_acquire(&self.peak_bytes),
            alloc_count: atomic_load_acquire(&self.alloc_count),
            free_count: atomic_load_acquire(&self.free_count),
        }
    }
}

/// An owned, thread-safe memory provider.
///
/// The operations table (the boxed [`MemoryProvider`]) is fixed when the handle
/// is created. All operations take `&self` and may run concurrently; the handle is
/// typically shared through an `Arc`.
///
/// Dropping the handle finalizes the provider. [`MemoryProviderHandle::destroy`]
/// does the same but reports the finalization result.
pub struct MemoryProviderHandle {
    provider: Box<dyn MemoryProvider>,
    state: AtomicU8,
    counters: Counters,
}

impl MemoryProviderHandle {
    /// Creates a provider of variant `P` from its parameter object.
    ///
    /// Creation is atomic: when `P::initialize` fails, the error is returned and
    /// no backend state survives.
    pub fn create<P: MemoryProviderOps>(params: &P::Params) -> Result<MemoryProviderHandle> {
        let provider = P::initialize(params)?;
        log::debug!("Created memory provider {}", provider.name());
        Ok(MemoryProviderHandle {
            provider: Box::new(provider),
            state: AtomicU8::new(ProviderState::Ready as u8),
            counters: Counters::default(),
        })
    }

    pub fn state(&self) -> ProviderState {
        ProviderState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        verify_arg!(alignment, alignment == 0 || alignment.is_power_of_two());
        let ptr = self.provider.alloc(size, alignment)?;
        self.counters.on_alloc(size);
        Ok(ptr)
    }

    /// Returns an allocation made by this handle.
    ///
    /// # Safety
    ///
    /// See [`MemoryProvider::free`].
    pub unsafe fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<()> {
        unsafe { self.provider.free(ptr, size)? };
        self.counters.on_free(size);
        Ok(())
    }

    pub fn min_page_size(&self, ptr: Option<NonNull<u8>>) -> Result<usize> {
        self.provider.min_page_size(ptr)
    }

    pub fn recommended_page_size(&self, size: usize) -> Result<usize> {
        self.provider.recommended_page_size(size)
    }

    pub fn allocation_properties(&self, ptr: NonNull<u8>) -> Result<AllocationProperties> {
        self.provider.allocation_properties(ptr)
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        self.provider.capabilities()
    }

    pub fn last_native_error(&self) -> Option<NativeError> {
        self.provider.last_native_error()
    }

    pub fn stats(&self) -> ProviderStats {
        self.counters.snapshot()
    }

    /// Finalizes the provider and releases the handle.
    pub fn destroy(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.state() != ProviderState::Ready {
            return Err(Error::invalid_operation("destroy"));
        }
        self.state
            .store(ProviderState::Destroying as u8, Ordering::Release);
        let outstanding = atomic_load_acquire(&self.counters.allocated_bytes);
        if outstanding != 0 {
            log::warn!(
                "Destroying memory provider {} with {outstanding} bytes still allocated",
                self.provider.name()
            );
        }
        let res = self.provider.finalize();
        self.state
            .store(ProviderState::Destroyed as u8, Ordering::Release);
        log::debug!("Destroyed memory provider {}", self.provider.name());
        res
    }
}

impl Drop for MemoryProviderHandle {
    fn drop(&mut self) {
        if self.state() == ProviderState::Ready {
            if let Err(e) = self.teardown() {
                log::warn!("Failed to finalize memory provider {}: {e}", self.name());
            }
        }
    }
}

impl std::fmt::Debug for MemoryProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProviderHandle")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}
