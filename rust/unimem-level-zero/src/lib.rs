//! Device memory through a Level Zero style driver.
//!
//! The driver call surface is abstracted by [`DeviceDriver`]; a real binding or a
//! test double is injected through [`LevelZeroProviderParams::set_driver`].
//! [`LevelZeroMemoryProvider`] allocates host, device or shared unified memory,
//! makes every device allocation resident on the configured peer devices and
//! rolls the allocation back if any of them fails.

pub mod driver;
pub mod params;
pub mod provider;
pub mod status;

pub use driver::{
    ContextHandle, DeviceDriver, DeviceHandle, DeviceMemAllocDesc, DeviceProperties, DriverResult,
    FreePolicy, MemAllocProperties,
};
pub use params::LevelZeroProviderParams;
pub use provider::LevelZeroMemoryProvider;
pub use status::DriverStatus;
