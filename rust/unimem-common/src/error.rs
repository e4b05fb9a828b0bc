use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// Projects the error onto the process-wide result code.
    pub fn code(&self) -> ResultCode {
        self.kind().code()
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    pub fn not_supported(operation: impl Into<String>) -> Error {
        Error(
            ErrorKind::NotSupported {
                operation: operation.into(),
            }
            .into(),
        )
    }

    pub fn out_of_host_memory() -> Error {
        Error(ErrorKind::OutOfHostMemory.into())
    }

    pub fn out_of_device_memory() -> Error {
        Error(ErrorKind::OutOfDeviceMemory.into())
    }

    pub fn provider_specific(
        provider: impl Into<String>,
        code: i64,
        message: impl Into<String>,
    ) -> Error {
        Error(
            ErrorKind::ProviderSpecific {
                provider: provider.into(),
                code,
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("out of host memory")]
    OutOfHostMemory,

    #[error("out of device memory")]
    OutOfDeviceMemory,

    #[error("operation not supported: {operation}")]
    NotSupported { operation: String },

    #[error("{provider} failure (native code {code:#x}): {message}")]
    ProviderSpecific {
        provider: String,
        code: i64,
        message: String,
    },

    #[error("IO error for '{context}': {source}'")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl ErrorKind {
    pub fn code(&self) -> ResultCode {
        match self {
            ErrorKind::InvalidArgument { .. } => ResultCode::InvalidArgument,
            ErrorKind::InvalidOperation { .. } => ResultCode::InvalidOperation,
            ErrorKind::OutOfHostMemory => ResultCode::OutOfHostMemory,
            ErrorKind::OutOfDeviceMemory => ResultCode::OutOfDeviceMemory,
            ErrorKind::NotSupported { .. } => ResultCode::NotSupported,
            ErrorKind::ProviderSpecific { .. } => ResultCode::ProviderSpecificError,
            ErrorKind::Io { source, .. } => match source.kind() {
                std::io::ErrorKind::OutOfMemory => ResultCode::OutOfHostMemory,
                std::io::ErrorKind::InvalidInput => ResultCode::InvalidArgument,
                std::io::ErrorKind::Unsupported => ResultCode::NotSupported,
                _ => ResultCode::ProviderSpecificError,
            },
        }
    }
}

/// Process-wide status of a public operation.
///
/// Every fallible operation in the framework reports one of these codes through
/// [`Error::code`]; `Success` is what an `Ok` result corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ResultCode {
    Success = 0,
    OutOfHostMemory = 1,
    OutOfDeviceMemory = 2,
    InvalidArgument = 3,
    InvalidOperation = 4,
    ProviderSpecificError = 5,
    NotSupported = 6,
    Unknown = 0x7fff_ffff,
}

impl ResultCode {
    /// Collapses a `Result` into its status code.
    pub fn of<T>(result: &std::result::Result<T, Error>) -> ResultCode {
        match result {
            Ok(_) => ResultCode::Success,
            Err(e) => e.code(),
        }
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::invalid_arg("size", "size > 0").code(),
            ResultCode::InvalidArgument
        );
        assert_eq!(
            Error::out_of_device_memory().code(),
            ResultCode::OutOfDeviceMemory
        );
        assert_eq!(
            Error::provider_specific("LEVEL_ZERO", 0x7000_0001, "device lost").code(),
            ResultCode::ProviderSpecificError
        );
        let oom = std::io::Error::from(std::io::ErrorKind::OutOfMemory);
        assert_eq!(Error::from(oom).code(), ResultCode::OutOfHostMemory);
    }

    #[test]
    fn test_result_code_of() {
        let ok: std::result::Result<u32, Error> = Ok(1);
        assert!(ResultCode::of(&ok).is_success());
        let err: std::result::Result<u32, Error> = Err(Error::not_supported("purge"));
        assert_eq!(ResultCode::of(&err), ResultCode::NotSupported);
    }

    #[test]
    fn test_error_display() {
        let e = Error::provider_specific("LEVEL_ZERO", 0x78000004, "invalid argument");
        assert_eq!(
            e.to_string(),
            "LEVEL_ZERO failure (native code 0x78000004): invalid argument"
        );
    }
}
