//! Driver status codes and their translation into the provider taxonomy.

use unimem_common::{Error, native_error_slot};

native_error_slot!(pub(crate) static LEVEL_ZERO_ERROR);

const DEVICE_LOST: u32 = 0x7000_0001;
const OUT_OF_HOST_MEMORY: u32 = 0x7000_0002;
const OUT_OF_DEVICE_MEMORY: u32 = 0x7000_0003;
const UNINITIALIZED: u32 = 0x7800_0001;
const UNSUPPORTED_FEATURE: u32 = 0x7800_0003;
const INVALID_ARGUMENT: u32 = 0x7800_0004;
const INVALID_NULL_HANDLE: u32 = 0x7800_0005;
const INVALID_SIZE: u32 = 0x7800_0008;
const UNSUPPORTED_SIZE: u32 = 0x7800_0009;
const UNSUPPORTED_ALIGNMENT: u32 = 0x7800_000a;

/// Non-success status returned by a driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverStatus {
    DeviceLost,
    OutOfHostMemory,
    OutOfDeviceMemory,
    Uninitialized,
    UnsupportedFeature,
    InvalidArgument,
    InvalidNullHandle,
    InvalidSize,
    UnsupportedSize,
    UnsupportedAlignment,
    /// Any other raw status.
    Other(u32),
}

impl DriverStatus {
    pub fn from_raw(raw: u32) -> DriverStatus {
        match raw {
            DEVICE_LOST => DriverStatus::DeviceLost,
            OUT_OF_HOST_MEMORY => DriverStatus::OutOfHostMemory,
            OUT_OF_DEVICE_MEMORY => DriverStatus::OutOfDeviceMemory,
            UNINITIALIZED => DriverStatus::Uninitialized,
            UNSUPPORTED_FEATURE => DriverStatus::UnsupportedFeature,
            INVALID_ARGUMENT => DriverStatus::InvalidArgument,
            INVALID_NULL_HANDLE => DriverStatus::InvalidNullHandle,
            INVALID_SIZE => DriverStatus::InvalidSize,
            UNSUPPORTED_SIZE => DriverStatus::UnsupportedSize,
            UNSUPPORTED_ALIGNMENT => DriverStatus::UnsupportedAlignment,
            other => DriverStatus::Other(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            DriverStatus::DeviceLost => DEVICE_LOST,
            DriverStatus::OutOfHostMemory => OUT_OF_HOST_MEMORY,
            DriverStatus::OutOfDeviceMemory => OUT_OF_DEVICE_MEMORY,
            DriverStatus::Uninitialized => UNINITIALIZED,
            DriverStatus::UnsupportedFeature => UNSUPPORTED_FEATURE,
            DriverStatus::InvalidArgument => INVALID_ARGUMENT,
            DriverStatus::InvalidNullHandle => INVALID_NULL_HANDLE,
            DriverStatus::InvalidSize => INVALID_SIZE,
            DriverStatus::UnsupportedSize => UNSUPPORTED_SIZE,
            DriverStatus::UnsupportedAlignment => UNSUPPORTED_ALIGNMENT,
            DriverStatus::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverStatus::Other(raw) => write!(f, "status {raw:#x}"),
            known => write!(f, "{known:?}"),
        }
    }
}

/// Records `status` as the thread's last native error and maps it onto the
/// provider error taxonomy. `call` names the failed driver entry point.
pub(crate) fn map_status(call: &str, status: DriverStatus) -> Error {
    LEVEL_ZERO_ERROR.set(status.raw().into(), format!("{call}: {status}"));
    match status {
        DriverStatus::OutOfHostMemory => Error::out_of_host_memory(),
        DriverStatus::OutOfDeviceMemory => Error::out_of_device_memory(),
        DriverStatus::InvalidArgument
        | DriverStatus::InvalidNullHandle
        | DriverStatus::InvalidSize
        | DriverStatus::UnsupportedSize
        | DriverStatus::UnsupportedAlignment => Error::invalid_arg(call, status.to_string()),
        DriverStatus::UnsupportedFeature => Error::not_supported(call),
        DriverStatus::DeviceLost | DriverStatus::Uninitialized | DriverStatus::Other(_) => {
            Error::provider_specific("LEVEL_ZERO", status.raw().into(), format!("{call}: {status}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use unimem_common::ResultCode;

    use super::*;

    #[test]
    fn test_raw_round_trip_of_known_codes() {
        for raw in [0x7000_0001, 0x7000_0003, 0x7800_0005, 0x7800_000a, 0x7fff_fffe] {
            assert_eq!(DriverStatus::from_raw(raw).raw(), raw);
        }
        assert_eq!(DriverStatus::from_raw(0x7fff_fffe), DriverStatus::Other(0x7fff_fffe));
    }

    #[test]
    fn test_map_status() {
        assert_eq!(
            map_status("zeMemAllocDevice", DriverStatus::OutOfDeviceMemory).code(),
            ResultCode::OutOfDeviceMemory
        );
        assert_eq!(
            map_status("zeMemAllocHost", DriverStatus::InvalidSize).code(),
            ResultCode::InvalidArgument
        );
        let err = map_status("zeContextMakeMemoryResident", DriverStatus::DeviceLost);
        assert_eq!(err.code(), ResultCode::ProviderSpecificError);
        let native = LEVEL_ZERO_ERROR.get().unwrap();
        assert_eq!(native.code, 0x7000_0001);
        assert!(native.message.starts_with("zeContextMakeMemoryResident"));
    }
}
