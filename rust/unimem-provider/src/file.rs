//! Memory backed by a file mapping.
//!
//! Every allocation maps a fresh page-aligned window at the end of the file, so
//! allocations never share pages. Freed windows are unmapped but the file is not
//! shrunk. Available on Linux; creation reports `NotSupported` elsewhere.

use std::{
    collections::HashMap,
    fs::File,
    path::{Path, PathBuf},
    ptr::NonNull,
};

use unimem_common::{
    Error, Result, native_error::NativeError, native_error_slot, verify_arg,
};
use unimem_page_alloc::{Protection, Visibility, align::checked_align_up, mmap};
use unimem_sync::Mutex;

use crate::{
    os::map_io_error,
    provider::{
        AllocationProperties, MemoryProvider, MemoryProviderOps, MemoryType,
        ProviderCapabilities,
    },
};

native_error_slot!(static FILE_ERROR);

/// Parameters of a [`FileMemoryProvider`].
#[derive(Debug, Clone, Default)]
pub struct FileMemoryProviderParams {
    path: Option<PathBuf>,
    protection: Protection,
    visibility: Visibility,
}

impl FileMemoryProviderParams {
    pub fn new() -> FileMemoryProviderParams {
        Default::default()
    }

    /// File to back the allocations. It is created if missing and only ever
    /// grown. Without a path an anonymous temporary file is used.
    pub fn set_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        verify_arg!(path, !path.as_os_str().is_empty());
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    pub fn set_protection(&mut self, protection: Protection) -> Result<()> {
        self.protection = protection;
        Ok(())
    }

    /// `Shared` writes through to the file, `Private` keeps changes copy-on-write.
    pub fn set_visibility(&mut self, visibility: Visibility) -> Result<()> {
        self.visibility = visibility;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

struct FileState {
    file: File,
    /// Next unused (page-aligned) offset in the file.
    end: u64,
    /// Live windows: address to mapped capacity.
    windows: HashMap<usize, usize>,
}

pub struct FileMemoryProvider {
    protection: Protection,
    visibility: Visibility,
    page_size: usize,
    state: Mutex<FileState>,
}

impl FileMemoryProvider {
    fn capacity(&self, size: usize) -> Result<usize> {
        checked_align_up(size.max(1), self.page_size)
            .ok_or_else(|| Error::invalid_arg("size", "size overflows the page rounding"))
    }
}

impl MemoryProviderOps for FileMemoryProvider {
    type Params = FileMemoryProviderParams;

    fn initialize(params: &FileMemoryProviderParams) -> Result<FileMemoryProvider> {
        if !cfg!(target_os = "linux") {
            return Err(Error::not_supported("file memory provider"));
        }
        let file = match &params.path {
            Some(path) => std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path),
            None => tempfile::tempfile(),
        }
        .map_err(|e| map_io_error("FILE", &FILE_ERROR, "open", e))?;
        let len = file
            .metadata()
            .map_err(|e| map_io_error("FILE", &FILE_ERROR, "metadata", e))?
            .len();

        let page_size = mmap::get_page_size();
        let end = len.next_multiple_of(page_size as u64);
        log::debug!(
            "File memory provider on {} starting at offset {end}",
            params
                .path
                .as_deref()
                .map_or_else(|| "<temp>".into(), |p| p.display().to_string())
        );
        Ok(FileMemoryProvider {
            protection: params.protection,
            visibility: params.visibility,
            page_size,
            state: Mutex::new(FileState {
                file,
                end,
                windows: HashMap::new(),
            })?,
        })
    }
}

impl MemoryProvider for FileMemoryProvider {
    fn name(&self) -> &str {
        "FILE"
    }

    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        verify_arg!(alignment, alignment == 0 || alignment.is_power_of_two());
        verify_arg!(alignment, alignment <= self.page_size);
        let capacity = self.capacity(size)?;

        let mut state = self.state.lock();
        let offset = state.end;
        let new_end = offset
            .checked_add(capacity as u64)
            .ok_or_else(|| Error::invalid_arg("size", "file offset overflow"))?;
        state
            .file
            .set_len(new_end)
            .map_err(|e| map_io_error("FILE", &FILE_ERROR, "set_len", e))?;
        let (ptr, mapped) = mmap::map_file(
            &state.file,
            offset,
            capacity,
            self.protection,
            self.visibility,
        )
        .map_err(|e| map_io_error("FILE", &FILE_ERROR, "mmap", e))?;
        state.end = new_end;
        state.windows.insert(ptr as usize, mapped);
        NonNull::new(ptr.cast()).ok_or_else(Error::out_of_host_memory)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<()> {
        let capacity = self.capacity(size)?;
        let mut state = self.state.lock();
        let mapped = state
            .windows
            .remove(&(ptr.as_ptr() as usize))
            .ok_or_else(|| Error::invalid_arg("ptr", "not allocated by this provider"))?;
        if mapped != capacity {
            state.windows.insert(ptr.as_ptr() as usize, mapped);
            return Err(Error::invalid_arg("size", "does not match the allocation"));
        }
        drop(state);
        unsafe { mmap::unmap_file(ptr.as_ptr().cast(), mapped) }
            .map_err(|e| map_io_error("FILE", &FILE_ERROR, "munmap", e))
    }

    fn min_page_size(&self, _ptr: Option<NonNull<u8>>) -> Result<usize> {
        Ok(self.page_size)
    }

    fn recommended_page_size(&self, size: usize) -> Result<usize> {
        self.capacity(size)
    }

    fn allocation_properties(&self, ptr: NonNull<u8>) -> Result<AllocationProperties> {
        let addr = ptr.as_ptr() as usize;
        let state = self.state.lock();
        let owned = state
            .windows
            .iter()
            .any(|(&start, &len)| addr >= start && addr < start + len);
        verify_arg!(ptr, owned);
        Ok(AllocationProperties {
            memory_type: MemoryType::Host,
            page_size: self.page_size,
            id: 0,
        })
    }

    fn capabilities(&self) -> ProviderCapabilities {
        let mut caps = ProviderCapabilities::FREE | ProviderCapabilities::FILE_BACKED;
        if self.protection.contains(Protection::READ) {
            caps |= ProviderCapabilities::HOST_ACCESSIBLE;
        }
        caps
    }

    fn last_native_error(&self) -> Option<NativeError> {
        FILE_ERROR.get()
    }

    fn finalize(&mut self) -> Result<()> {
        let state = self.state.get_mut();
        if !state.windows.is_empty() {
            log::warn!(
                "File memory provider finalized with {} mapped windows",
                state.windows.len()
            );
        }
        Ok(())
    }
}
