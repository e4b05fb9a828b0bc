use std::sync::OnceLock;
use windows_sys::Win32::{
    Foundation::{CloseHandle, ERROR_SUCCESS, GetLastError, HANDLE, LUID},
    Security::{
        AdjustTokenPrivileges, LookupPrivilegeValueW, SE_LOCK_MEMORY_NAME, TOKEN_ADJUST_PRIVILEGES,
        TOKEN_PRIVILEGES, TOKEN_QUERY,
    },
    System::{
        Memory::{
            GetLargePageMinimum, MEM_COMMIT, MEM_LARGE_PAGES, MEM_RELEASE, MEM_RESERVE,
            PAGE_EXECUTE, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_NOACCESS,
            PAGE_PROTECTION_FLAGS, PAGE_READONLY, PAGE_READWRITE, VirtualAlloc, VirtualFree,
        },
        SystemInformation::{GetSystemInfo, SYSTEM_INFO},
        Threading::{GetCurrentProcess, OpenProcessToken},
    },
};

use crate::{
    Protection, Visibility,
    align::{align_up, checked_align_up},
};

/// Attempts to place an over-aligned mapping before giving up.
const ALIGNED_PLACEMENT_ATTEMPTS: usize = 16;

fn last_error() -> std::io::Error {
    let error = unsafe { GetLastError() };
    std::io::Error::from_raw_os_error(error as i32)
}

fn page_protection(protection: Protection) -> PAGE_PROTECTION_FLAGS {
    let read = protection.contains(Protection::READ);
    let write = protection.contains(Protection::WRITE);
    let exec = protection.contains(Protection::EXEC);
    match (read, write, exec) {
        (false, false, false) => PAGE_NOACCESS,
        (true, false, false) => PAGE_READONLY,
        (_, true, false) => PAGE_READWRITE,
        (false, false, true) => PAGE_EXECUTE,
        (true, false, true) => PAGE_EXECUTE_READ,
        (_, true, true) => PAGE_EXECUTE_READWRITE,
    }
}

fn checked_capacity(size: usize, page_size: usize) -> std::io::Result<usize> {
    checked_align_up(size.max(1), page_size).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "mapping size overflow")
    })
}

/// Allocates memory using large pages (typically 2MB).
///
/// Requires the "Lock pages in memory" user right, which can be granted through
/// `secpol.msc` (`Local Policies`/`User Rights Assignment`), and is enabled for the
/// process by [`try_enable_large_pages`].
/// See <https://learn.microsoft.com/en-us/windows/win32/memory/large-page-support>.
///
/// Returns the pointer and the capacity to pass to [`free_large_pages`].
pub fn allocate_large_pages(
    size: usize,
    protection: Protection,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let page_size = get_large_page_size();
    assert!(page_size.is_power_of_two());
    let capacity = checked_capacity(size, page_size)?;

    let ptr = unsafe {
        VirtualAlloc(
            std::ptr::null(),
            capacity,
            MEM_COMMIT | MEM_RESERVE | MEM_LARGE_PAGES,
            page_protection(protection),
        )
    };
    if ptr.is_null() {
        return Err(last_error());
    }
    Ok((ptr, capacity))
}

/// Frees memory that was allocated with [`allocate_large_pages`].
///
/// # Safety
///
/// `ptr` and `size` must be exactly the pointer and capacity returned by
/// [`allocate_large_pages`], and the region must not be used afterwards.
pub unsafe fn free_large_pages(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    assert!(size.is_multiple_of(get_large_page_size()));
    if unsafe { VirtualFree(ptr, 0, MEM_RELEASE) } == 0 {
        return Err(last_error());
    }
    Ok(())
}

/// Enables `SeLockMemoryPrivilege` for the current process, which large-page
/// allocations require.
pub fn try_enable_large_pages() -> std::io::Result<()> {
    adjust_lock_memory_privilege()
}

/// Allocates committed memory using standard pages.
///
/// `size` is rounded up to the page size. Alignments up to the allocation
/// granularity (64KB) are inherent to `VirtualAlloc`; larger alignments are
/// obtained by reserving an over-sized range, releasing it and committing at the
/// aligned address inside it.
///
/// # Errors
///
/// - `InvalidInput` if `alignment` is not zero or a power of two.
/// - `Unsupported` for [`Visibility::Shared`]: anonymous shared memory requires
///   a section object on Windows.
pub fn allocate(
    size: usize,
    alignment: usize,
    protection: Protection,
    visibility: Visibility,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    if alignment != 0 && !alignment.is_power_of_two() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "alignment must be a power of two",
        ));
    }
    if visibility == Visibility::Shared {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "shared anonymous mappings are not supported",
        ));
    }
    let page_size = get_page_size();
    assert!(page_size.is_power_of_two());
    let capacity = checked_capacity(size, page_size)?;
    let prot = page_protection(protection);

    if alignment <= get_allocation_granularity() {
        let ptr = unsafe {
            VirtualAlloc(std::ptr::null(), capacity, MEM_COMMIT | MEM_RESERVE, prot)
        };
        if ptr.is_null() {
            return Err(last_error());
        }
        return Ok((ptr, capacity));
    }

    let span = capacity.checked_add(alignment).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "mapping size overflow")
    })?;
    for _ in 0..ALIGNED_PLACEMENT_ATTEMPTS {
        let base = unsafe { VirtualAlloc(std::ptr::null(), span, MEM_RESERVE, PAGE_NOACCESS) };
        if base.is_null() {
            return Err(last_error());
        }
        unsafe { VirtualFree(base, 0, MEM_RELEASE) };
        let aligned = align_up(base as usize, alignment);
        let ptr = unsafe {
            VirtualAlloc(
                aligned as *const std::ffi::c_void,
                capacity,
                MEM_COMMIT | MEM_RESERVE,
                prot,
            )
        };
        if !ptr.is_null() {
            return Ok((ptr, capacity));
        }
        // Another thread took the range between release and commit; retry.
    }
    Err(last_error())
}

/// Frees memory that was allocated with [`allocate`].
///
/// # Safety
///
/// `ptr` and `size` must be exactly the pointer and capacity returned by
/// [`allocate`], the memory must not have been freed already, and no other
/// references to it may exist.
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    assert!(size.is_multiple_of(get_page_size()));
    if unsafe { VirtualFree(ptr, 0, MEM_RELEASE) } == 0 {
        return Err(last_error());
    }
    Ok(())
}

/// File-backed mappings are not implemented for Windows.
pub fn map_file(
    _file: &std::fs::File,
    _offset: u64,
    _len: usize,
    _protection: Protection,
    _visibility: Visibility,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "file mappings are not supported on this platform",
    ))
}

/// # Safety
///
/// Never called: [`map_file`] cannot succeed on this platform.
pub unsafe fn unmap_file(_ptr: *mut std::ffi::c_void, _size: usize) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "file mappings are not supported on this platform",
    ))
}

/// Large page size reported by `GetLargePageMinimum`, 2MB if unavailable.
pub fn get_large_page_size() -> usize {
    static LARGE_PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *LARGE_PAGE_SIZE.get_or_init(|| match unsafe { GetLargePageMinimum() } {
        0 => 2 * 1024 * 1024,
        size => size,
    })
}

pub fn get_page_size() -> usize {
    system_info().0
}

/// Granularity of `VirtualAlloc` base addresses (64KB on current systems).
pub fn get_allocation_granularity() -> usize {
    system_info().1
}

fn system_info() -> (usize, usize) {
    static INFO: OnceLock<(usize, usize)> = OnceLock::new();

    *INFO.get_or_init(|| unsafe {
        let mut system_info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut system_info);
        (
            system_info.dwPageSize as usize,
            system_info.dwAllocationGranularity as usize,
        )
    })
}

fn adjust_lock_memory_privilege() -> std::io::Result<()> {
    unsafe {
        let mut token_handle: HANDLE = std::ptr::null_mut();
        if OpenProcessToken(
            GetCurrentProcess(),
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut token_handle,
        ) == 0
        {
            return Err(last_error());
        }

        let mut luid = LUID {
            LowPart: 0,
            HighPart: 0,
        };
        if LookupPrivilegeValueW(std::ptr::null(), SE_LOCK_MEMORY_NAME, &mut luid) == 0 {
            let err = last_error();
            CloseHandle(token_handle);
            return Err(err);
        }

        let token_privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [windows_sys::Win32::Security::LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: windows_sys::Win32::Security::SE_PRIVILEGE_ENABLED,
            }],
        };
        let result = AdjustTokenPrivileges(
            token_handle,
            0,
            &token_privileges,
            0,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        );
        // Read before CloseHandle overwrites it.
        let adjust_error = GetLastError();
        CloseHandle(token_handle);

        if result == 0 {
            return Err(std::io::Error::from_raw_os_error(adjust_error as i32));
        }
        // AdjustTokenPrivileges succeeds even when the privilege was not assigned
        // to the account; that case is reported through the last error.
        if adjust_error != ERROR_SUCCESS {
            return Err(std::io::Error::from_raw_os_error(adjust_error as i32));
        }
        Ok(())
    }
}
