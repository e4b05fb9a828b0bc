//! A logging proxy in front of another provider handle.

use std::{
    ptr::NonNull,
    sync::{Arc, atomic::AtomicU64},
};

use unimem_common::{Error, Result, native_error::NativeError};
use unimem_sync::atomic::{atomic_increment, atomic_load_acquire};

use crate::{
    handle::MemoryProviderHandle,
    provider::{AllocationProperties, MemoryProvider, MemoryProviderOps, ProviderCapabilities},
};

/// Per-operation call counters shared between the parameters and the provider.
#[derive(Debug, Default)]
pub struct TraceCounters {
    alloc: AtomicU64,
    free: AtomicU64,
    failed: AtomicU64,
    query: AtomicU64,
}

impl TraceCounters {
    pub fn alloc_calls(&self) -> u64 {
        atomic_load_acquire(&self.alloc)
    }

    pub fn free_calls(&self) -> u64 {
        atomic_load_acquire(&self.free)
    }

    /// Calls of any operation that returned an error.
    pub fn failed_calls(&self) -> u64 {
        atomic_load_acquire(&self.failed)
    }

    /// Page size and allocation property queries.
    pub fn query_calls(&self) -> u64 {
        atomic_load_acquire(&self.query)
    }
}

/// Parameters of a [`TraceMemoryProvider`].
#[derive(Debug, Default)]
pub struct TraceMemoryProviderParams {
    upstream: Option<Arc<MemoryProviderHandle>>,
    counters: Arc<TraceCounters>,
}

impl TraceMemoryProviderParams {
    pub fn new() -> TraceMemoryProviderParams {
        Default::default()
    }

    /// The handle every operation is forwarded to.
    pub fn set_upstream(&mut self, upstream: Arc<MemoryProviderHandle>) -> Result<()> {
        self.upstream = Some(upstream);
        Ok(())
    }

    /// Counters updated by every provider created from these parameters.
    pub fn counters(&self) -> Arc<TraceCounters> {
        self.counters.clone()
    }
}

pub struct TraceMemoryProvider {
    name: String,
    upstream: Arc<MemoryProviderHandle>,
    counters: Arc<TraceCounters>,
}

impl TraceMemoryProvider {
    fn track<T>(&self, res: Result<T>) -> Result<T> {
        if let Err(e) = &res {
            atomic_increment(&self.counters.failed);
            log::trace!("{}: failed: {e}", self.name);
        }
        res
    }
}

impl MemoryProviderOps for TraceMemoryProvider {
    type Params = TraceMemoryProviderParams;

    fn initialize(params: &TraceMemoryProviderParams) -> Result<TraceMemoryProvider> {
        let upstream = params
            .upstream
            .clone()
            .ok_or_else(|| Error::invalid_arg("upstream", "no upstream provider was set"))?;
        Ok(TraceMemoryProvider {
            name: format!("TRACE({})", upstream.name()),
            upstream,
            counters: params.counters.clone(),
        })
    }
}

impl MemoryProvider for TraceMemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        atomic_increment(&self.counters.alloc);
        let res = self.upstream.alloc(size, alignment);
        if let Ok(ptr) = &res {
            log::trace!("{}: alloc({size}, {alignment}) = {ptr:p}", self.name);
        }
        self.track(res)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<()> {
        atomic_increment(&self.counters.free);
        log::trace!("{}: free({ptr:p}, {size})", self.name);
        self.track(unsafe { self.upstream.free(ptr, size) })
    }

    fn min_page_size(&self, ptr: Option<NonNull<u8>>) -> Result<usize> {
        atomic_increment(&self.counters.query);
        self.track(self.upstream.min_page_size(ptr))
    }

    fn recommended_page_size(&self, size: usize) -> Result<usize> {
        atomic_increment(&self.counters.query);
        self.track(self.upstream.recommended_page_size(size))
    }

    fn allocation_properties(&self, ptr: NonNull<u8>) -> Result<AllocationProperties> {
        atomic_increment(&self.counters.query);
        self.track(self.upstream.allocation_properties(ptr))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.upstream.capabilities()
    }

    fn last_native_error(&self) -> Option<NativeError> {
        self.upstream.last_native_error()
    }

    fn finalize(&mut self) -> Result<()> {
        log::trace!(
            "{}: finalized after {} allocs, {} frees, {} failures",
            self.name,
            self.counters.alloc_calls(),
            self.counters.free_calls(),
            self.counters.failed_calls()
        );
        Ok(())
    }
}
