use std::{os::fd::AsRawFd, sync::OnceLock};

use crate::{
    Protection, Visibility,
    align::{align_up, checked_align_up, is_aligned},
};

fn prot_flags(protection: Protection) -> libc::c_int {
    let mut prot = libc::PROT_NONE;
    if protection.contains(Protection::READ) {
        prot |= libc::PROT_READ;
    }
    if protection.contains(Protection::WRITE) {
        prot |= libc::PROT_WRITE;
    }
    if protection.contains(Protection::EXEC) {
        prot |= libc::PROT_EXEC;
    }
    prot
}

fn visibility_flags(visibility: Visibility) -> libc::c_int {
    match visibility {
        Visibility::Private => libc::MAP_PRIVATE,
        Visibility::Shared => libc::MAP_SHARED,
    }
}

fn checked_capacity(size: usize, page_size: usize) -> std::io::Result<usize> {
    checked_align_up(size.max(1), page_size).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "mapping size overflow")
    })
}

/// Creates an anonymous mapping of `len` bytes.
unsafe fn map_anonymous(
    len: usize,
    prot: libc::c_int,
    flags: libc::c_int,
) -> std::io::Result<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            prot,
            flags | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    Ok(ptr.cast())
}

/// Allocates anonymous memory using large pages (huge pages) via `MAP_HUGETLB`.
///
/// The allocation is rounded up to the large page size (typically 2MB) and is
/// aligned to it. Returns the pointer and the mapped capacity.
///
/// # Prerequisites
///
/// Huge pages must be configured on the system, for example:
/// ```bash
/// echo COUNT > /proc/sys/vm/nr_overcommit_hugepages
/// ```
/// See <https://www.kernel.org/doc/Documentation/vm/hugetlbpage.txt>.
///
/// The returned region must be released with [`free_large_pages`] and the
/// returned capacity.
pub fn allocate_large_pages(
    size: usize,
    protection: Protection,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let page_size = get_large_page_size();
    assert!(page_size.is_power_of_two());
    let capacity = checked_capacity(size, page_size)?;
    let ptr = unsafe {
        map_anonymous(
            capacity,
            prot_flags(protection),
            libc::MAP_PRIVATE | libc::MAP_HUGETLB,
        )?
    };
    Ok((ptr.cast(), capacity))
}

/// Frees memory that was allocated with [`allocate_large_pages`].
///
/// # Safety
///
/// `ptr` and `size` must be exactly the pointer and capacity returned by
/// [`allocate_large_pages`], and the region must not be used afterwards.
pub unsafe fn free_large_pages(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    unsafe { free(ptr, size) }
}

/// Huge pages are configured administratively on Linux; nothing to enable
/// per process.
pub fn try_enable_large_pages() -> std::io::Result<()> {
    Ok(())
}

/// Allocates anonymous memory using standard pages.
///
/// `size` is rounded up to the page size; the returned pointer is aligned to
/// `alignment` when it exceeds the page size (the mapping is over-sized and the
/// unaligned head and tail are unmapped again). Returns the pointer and the
/// mapped capacity, which is what [`free`] expects.
///
/// # Errors
///
/// `InvalidInput` if `alignment` is not zero or a power of two, or if the
/// rounded size overflows; otherwise the `mmap` error.
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
    let page_size = get_page_size();
    assert!(page_size.is_power_of_two());
    let capacity = checked_capacity(size, page_size)?;
    let prot = prot_flags(protection);
    let flags = visibility_flags(visibility);

    if alignment <= page_size {
        let ptr = unsafe { map_anonymous(capacity, prot, flags)? };
        return Ok((ptr.cast(), capacity));
    }

    let span = capacity.checked_add(alignment - page_size).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "mapping size overflow")
    })?;
    let base = unsafe { map_anonymous(span, prot, flags)? } as usize;
    let aligned = align_up(base, alignment);
    let head = aligned - base;
    let tail = span - head - capacity;
    unsafe {
        if head != 0 {
            free(base as *mut _, head)?;
        }
        if tail != 0 {
            free((aligned + capacity) as *mut _, tail)?;
        }
    }
    Ok((aligned as *mut _, capacity))
}

/// Unmaps memory that was allocated with [`allocate`].
///
/// # Safety
///
/// `ptr` and `size` must be exactly the pointer and capacity returned by
/// [`allocate`], the memory must not have been freed already, and no other
/// references to it may exist.
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let res = unsafe { libc::munmap(ptr, size) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Maps `len` bytes of `file` starting at `offset`.
///
/// `offset` must be a multiple of the page size. The length is rounded up to
/// the page size; the file must already be large enough to back the mapping.
/// Returns the pointer and the mapped capacity, to be released with
/// [`unmap_file`].
pub fn map_file(
    file: &std::fs::File,
    offset: u64,
    len: usize,
    protection: Protection,
    visibility: Visibility,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let page_size = get_page_size();
    if !is_aligned(offset as usize, page_size) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "file offset must be page aligned",
        ));
    }
    let capacity = checked_capacity(len, page_size)?;
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            capacity,
            prot_flags(protection),
            visibility_flags(visibility),
            file.as_raw_fd(),
            offset as libc::off_t,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    Ok((ptr, capacity))
}

/// Unmaps a file view created by [`map_file`].
///
/// # Safety
///
/// Same contract as [`free`] with respect to [`map_file`].
pub unsafe fn unmap_file(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    unsafe { free(ptr, size) }
}

/// Returns the large (huge) page size in bytes, read once from `/proc/meminfo`.
///
/// Falls back to 2MB when the value cannot be determined.
pub fn get_large_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    *SIZE.get_or_init(|| read_large_page_size().unwrap_or(2 * 1024 * 1024))
}

/// Returns the standard page size in bytes (`sysconf(_SC_PAGESIZE)`), falling
/// back to 4KB when the query fails.
pub fn get_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    *SIZE.get_or_init(|| read_page_size().unwrap_or(4 * 1024))
}

/// Parses the `Hugepagesize:    2048 kB` line of `/proc/meminfo`.
fn read_large_page_size() -> std::io::Result<usize> {
    let meminfo = std::fs::read_to_string("/proc/meminfo")?;
    meminfo
        .lines()
        .find_map(|line| {
            let rest = line.strip_prefix("Hugepagesize:")?;
            let size_kb = rest.split_whitespace().next()?.parse::<usize>().ok()?;
            Some(size_kb * 1024)
        })
        .ok_or_else(|| std::io::Error::other("Failed to read Hugepagesize"))
}

fn read_page_size() -> std::io::Result<usize> {
    let res = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    assert!(res < i32::MAX as _);
    Ok(res as usize)
}
