//! The memory provider contract and its host-side variants.
//!
//! A provider is a backend-specific implementation of allocate/free/query for one
//! kind of memory. Every variant implements [`MemoryProvider`] (the operations
//! table) and [`MemoryProviderOps`] (construction from its parameter object); the
//! factory [`MemoryProviderHandle::create`] turns a parameter object into an
//! owned, thread-safe provider handle.
//!
//! Variants in this crate:
//! - [`os::OsMemoryProvider`] - anonymous pages from the operating system.
//! - [`fixed::FixedMemoryProvider`] - sub-allocation of a caller-owned region.
//! - [`file::FileMemoryProvider`] - page windows of a file mapping.
//! - [`trace::TraceMemoryProvider`] - a logging proxy in front of another handle.

pub mod file;
pub mod fixed;
pub mod handle;
pub mod os;
pub mod provider;
pub mod trace;

pub use handle::{MemoryProviderHandle, ProviderState, ProviderStats};
pub use provider::{
    AllocationProperties, MemoryProvider, MemoryProviderOps, MemoryType, ProviderCapabilities,
};

#[cfg(test)]
mod tests;
