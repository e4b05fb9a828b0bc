//! Heap-emulated page mapping for platforms without a native mapper.
//!
//! Only private, read-write memory can be provided; other protections,
//! shared visibility and file mappings report `Unsupported`. The layout of every
//! live block is remembered so that [`free`] can be called with the capacity only.

use std::{
    alloc::{Layout, alloc_zeroed, dealloc},
    collections::HashMap,
    sync::{Mutex, OnceLock},
};

use crate::{Protection, Visibility, align::checked_align_up};

fn live_blocks() -> &'static Mutex<HashMap<usize, Layout>> {
    static BLOCKS: OnceLock<Mutex<HashMap<usize, Layout>>> = OnceLock::new();
    BLOCKS.get_or_init(Default::default)
}

fn unsupported(what: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("{what} is not supported on this platform"),
    )
}

fn allocate_emulated(
    size: usize,
    page_size: usize,
    alignment: usize,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let capacity = checked_align_up(size.max(1), page_size).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "mapping size overflow")
    })?;
    let layout = Layout::from_size_align(capacity, alignment.max(page_size))
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid layout"))?;

    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::OutOfMemory,
            "Failed to allocate memory",
        ));
    }
    live_blocks()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(ptr as usize, layout);
    Ok((ptr.cast(), capacity))
}

unsafe fn free_emulated(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let layout = live_blocks()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&(ptr as usize))
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown block")
        })?;
    assert_eq!(layout.size(), size);
    unsafe { dealloc(ptr.cast(), layout) };
    Ok(())
}

/// Emulates a large-page allocation with a large-page aligned heap block.
pub fn allocate_large_pages(
    size: usize,
    protection: Protection,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    if protection != Protection::default() {
        return Err(unsupported("page protection"));
    }
    allocate_emulated(size, get_large_page_size(), 0)
}

/// # Safety
///
/// `ptr` and `size` must come from [`allocate_large_pages`].
pub unsafe fn free_large_pages(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    unsafe { free_emulated(ptr, size) }
}

pub fn try_enable_large_pages() -> std::io::Result<()> {
    Ok(())
}

/// Emulates a page allocation with a heap block aligned to the larger of the
/// page size and `alignment`.
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
    if protection != Protection::default() {
        return Err(unsupported("page protection"));
    }
    if visibility == Visibility::Shared {
        return Err(unsupported("shared visibility"));
    }
    allocate_emulated(size, get_page_size(), alignment)
}

/// # Safety
///
/// `ptr` and `size` must be the pointer and capacity returned by [`allocate`].
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    unsafe { free_emulated(ptr, size) }
}

pub fn map_file(
    _file: &std::fs::File,
    _offset: u64,
    _len: usize,
    _protection: Protection,
    _visibility: Visibility,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    Err(unsupported("file mapping"))
}

/// # Safety
///
/// Never called: [`map_file`] cannot succeed on this platform.
pub unsafe fn unmap_file(_ptr: *mut std::ffi::c_void, _size: usize) -> std::io::Result<()> {
    Err(unsupported("file mapping"))
}

/// Returns the emulated "large page" size in bytes.
pub fn get_large_page_size() -> usize {
    2 * 1024 * 1024
}

/// Returns the emulated "standard page" size in bytes.
pub fn get_page_size() -> usize {
    4 * 1024
}
