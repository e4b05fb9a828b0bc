//! Allocation-free synchronization primitives shared by providers and pools.
//!
//! - [`mutex::OsMutex`] - a platform lock that can live in caller-owned storage,
//!   with [`mutex::MutexSlot`] as its safe in-place handle and [`mutex::Mutex`]
//!   as an owned, data-carrying wrapper.
//! - [`once::OnceFlag`] - run-exactly-once initialization with happens-before
//!   guarantees for every caller.
//! - [`atomic`] - acquire/release load/store, increment and fetch-add over 64-bit
//!   words, plus lowest/highest set bit scans.

pub mod atomic;
pub mod mutex;
pub mod once;

#[cfg_attr(unix, path = "sys/unix.rs")]
#[cfg_attr(windows, path = "sys/windows.rs")]
#[cfg_attr(not(any(unix, windows)), path = "sys/fallback.rs")]
mod sys;

pub use mutex::{Mutex, MutexGuard, MutexSlot, OsMutex, OsMutexGuard};
pub use once::{OnceFlag, OnceState, init_once};

#[cfg(test)]
mod tests;
