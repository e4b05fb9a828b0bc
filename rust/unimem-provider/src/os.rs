//! Anonymous memory from the operating system.

use std::ptr::NonNull;

use unimem_common::{
    Error, Result, native_error::NativeError, native_error::NativeErrorSlot, native_error_slot,
    verify_arg,
};
use unimem_page_alloc::{Protection, Visibility, align::checked_align_up, mmap};

use crate::provider::{
    AllocationProperties, MemoryProvider, MemoryProviderOps, MemoryType, ProviderCapabilities,
};

native_error_slot!(static OS_ERROR);

/// Parameters of an [`OsMemoryProvider`].
#[derive(Debug, Clone, Default)]
pub struct OsMemoryProviderParams {
    protection: Protection,
    visibility: Visibility,
    large_pages: bool,
}

impl OsMemoryProviderParams {
    pub fn new() -> OsMemoryProviderParams {
        Default::default()
    }

    /// Access rights of the mapped pages, read-write by default.
    pub fn set_protection(&mut self, protection: Protection) -> Result<()> {
        self.protection = protection;
        Ok(())
    }

    /// Same as [`OsMemoryProviderParams::set_protection`] for raw flag bits.
    ///
    /// Fails without touching the parameters if `bits` has unknown flags set.
    pub fn set_protection_bits(&mut self, bits: u32) -> Result<()> {
        let protection = Protection::from_bits(bits).ok_or_else(|| {
            Error::invalid_arg("protection", format!("unknown protection flags {bits:#x}"))
        })?;
        self.set_protection(protection)
    }

    pub fn set_visibility(&mut self, visibility: Visibility) -> Result<()> {
        self.visibility = visibility;
        Ok(())
    }

    /// Backs every allocation with large pages. Creation fails if the system
    /// cannot provide them; there is no silent fallback to standard pages.
    pub fn set_large_pages(&mut self, large_pages: bool) -> Result<()> {
        self.large_pages = large_pages;
        Ok(())
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn large_pages(&self) -> bool {
        self.large_pages
    }
}

/// Provider handing out page-granular anonymous mappings.
///
/// Each allocation is its own mapping; alignment above the page size is obtained
/// by over-mapping and trimming. The provider itself holds no backend resources.
pub struct OsMemoryProvider {
    protection: Protection,
    visibility: Visibility,
    large_pages: bool,
    page_size: usize,
}

impl OsMemoryProvider {
    fn capacity(&self, size: usize) -> Result<usize> {
        checked_align_up(size.max(1), self.page_size)
            .ok_or_else(|| Error::invalid_arg("size", "size overflows the page rounding"))
    }
}

impl MemoryProviderOps for OsMemoryProvider {
    type Params = OsMemoryProviderParams;

    fn initialize(params: &OsMemoryProviderParams) -> Result<OsMemoryProvider> {
        let page_size = if params.large_pages {
            if params.visibility != Visibility::Private {
                return Err(Error::invalid_arg(
                    "visibility",
                    "large pages require private visibility",
                ));
            }
            unimem_page_alloc::check_and_enable_large_page_support()
                .map_err(|e| map_io_error("OS", &OS_ERROR, "large pages", e))?;
            mmap::get_large_page_size()
        } else {
            mmap::get_page_size()
        };
        Ok(OsMemoryProvider {
            protection: params.protection,
            visibility: params.visibility,
            large_pages: params.large_pages,
            page_size,
        })
    }
}

impl MemoryProvider for OsMemoryProvider {
    fn name(&self) -> &str {
        "OS"
    }

    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        verify_arg!(alignment, alignment == 0 || alignment.is_power_of_two());
        let (ptr, _) = if self.large_pages {
            verify_arg!(alignment, alignment <= self.page_size);
            mmap::allocate_large_pages(size, self.protection)
        } else {
            mmap::allocate(size, alignment, self.protection, self.visibility)
        }
        .map_err(|e| map_io_error("OS", &OS_ERROR, "mmap", e))?;
        NonNull::new(ptr.cast()).ok_or_else(Error::out_of_host_memory)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<()> {
        let capacity = self.capacity(size)?;
        let res = if self.large_pages {
            unsafe { mmap::free_large_pages(ptr.as_ptr().cast(), capacity) }
        } else {
            unsafe { mmap::free(ptr.as_ptr().cast(), capacity) }
        };
        res.map_err(|e| map_io_error("OS", &OS_ERROR, "munmap", e))
    }

    fn min_page_size(&self, _ptr: Option<NonNull<u8>>) -> Result<usize> {
        Ok(self.page_size)
    }

    fn recommended_page_size(&self, size: usize) -> Result<usize> {
        self.capacity(size)
    }

    fn allocation_properties(&self, _ptr: NonNull<u8>) -> Result<AllocationProperties> {
        Ok(AllocationProperties {
            memory_type: MemoryType::Host,
            page_size: self.page_size,
            id: 0,
        })
    }

    fn capabilities(&self) -> ProviderCapabilities {
        let mut caps = ProviderCapabilities::FREE;
        if self.protection.contains(Protection::READ) {
            caps |= ProviderCapabilities::HOST_ACCESSIBLE;
        }
        if self.large_pages {
            caps |= ProviderCapabilities::LARGE_PAGES;
        }
        caps
    }

    fn last_native_error(&self) -> Option<NativeError> {
        OS_ERROR.get()
    }

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Records `e` as the native error of `provider` and maps it onto the taxonomy.
pub(crate) fn map_io_error(
    provider: &str,
    slot: &NativeErrorSlot,
    context: &str,
    e: std::io::Error,
) -> Error {
    slot.set(e.raw_os_error().unwrap_or(-1).into(), e.to_string());
    match e.kind() {
        std::io::ErrorKind::OutOfMemory => Error::out_of_host_memory(),
        std::io::ErrorKind::InvalidInput => Error::invalid_arg(context, e.to_string()),
        std::io::ErrorKind::Unsupported => Error::not_supported(format!("{provider} {context}")),
        _ => match e.raw_os_error() {
            Some(code) => {
                Error::provider_specific(provider, code.into(), format!("{context}: {e}"))
            }
            None => Error::io(context, e),
        },
    }
}

#[cfg(test)]
mod tests {
    use unimem_common::ResultCode;

    use super::*;

    #[test]
    fn test_set_protection_bits() {
        let mut params = OsMemoryProviderParams::new();
        params.set_protection_bits(1).unwrap();
        assert_eq!(params.protection(), Protection::READ);

        let err = params.set_protection_bits(0x100).unwrap_err();
        assert_eq!(err.code(), ResultCode::InvalidArgument);
        assert_eq!(params.protection(), Protection::READ);
    }

    #[test]
    fn test_io_error_mapping() {
        native_error_slot!(static SLOT);

        let e = std::io::Error::from_raw_os_error(12);
        let err = map_io_error("OS", &SLOT, "mmap", e);
        assert_eq!(SLOT.get().unwrap().code, 12);
        // ENOMEM is classified by the standard library on unix.
        if cfg!(unix) {
            assert_eq!(err.code(), ResultCode::OutOfHostMemory);
        }

        let e = std::io::Error::new(std::io::ErrorKind::Unsupported, "no");
        assert_eq!(
            map_io_error("OS", &SLOT, "mmap", e).code(),
            ResultCode::NotSupported
        );
        assert_eq!(SLOT.get().unwrap().code, -1);
    }
}
