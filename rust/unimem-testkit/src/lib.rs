//! Test utilities for the unimem crates.
//!
//! - [`mock_driver`] - a recording, failure-injecting [`unimem_level_zero::DeviceDriver`]
//!   backed by real host memory.

pub mod mock_driver;

pub use mock_driver::{CallCounts, DriverCall, MockDriver};
