//! Sub-allocation of a caller-owned memory region.

use std::ptr::NonNull;

use unimem_common::{Error, Result, native_error::NativeError, verify_arg};
use unimem_page_alloc::align::{align_up, checked_align_up};
use unimem_sync::Mutex;

use crate::provider::{
    AllocationProperties, MemoryProvider, MemoryProviderOps, MemoryType, ProviderCapabilities,
};

/// Default allocation granularity of a [`FixedMemoryProvider`].
pub const DEFAULT_GRANULARITY: usize = 64;

/// Parameters of a [`FixedMemoryProvider`].
#[derive(Debug, Clone)]
pub struct FixedMemoryProviderParams {
    region: Option<(NonNull<u8>, usize)>,
    granularity: usize,
}

// SAFETY: the region pointer is only dereferenced by the provider, whose
// creation contract requires exclusive access to the region.
unsafe impl Send for FixedMemoryProviderParams {}
unsafe impl Sync for FixedMemoryProviderParams {}

impl Default for FixedMemoryProviderParams {
    fn default() -> Self {
        FixedMemoryProviderParams {
            region: None,
            granularity: DEFAULT_GRANULARITY,
        }
    }
}

impl FixedMemoryProviderParams {
    pub fn new() -> FixedMemoryProviderParams {
        Default::default()
    }

    /// Sets the region the provider carves allocations from. The region start
    /// must be aligned to the granularity when the provider is created.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as a
    /// provider created from these parameters is alive, and nothing else may
    /// access the region during that time.
    pub unsafe fn set_region(&mut self, ptr: *mut u8, len: usize) -> Result<()> {
        let ptr = NonNull::new(ptr).ok_or_else(|| Error::invalid_arg("ptr", "null region"))?;
        verify_arg!(len, len > 0);
        verify_arg!(len, (ptr.as_ptr() as usize).checked_add(len).is_some());
        self.region = Some((ptr, len));
        Ok(())
    }

    /// Granularity every allocation size and address is rounded to; a power of two.
    pub fn set_granularity(&mut self, granularity: usize) -> Result<()> {
        verify_arg!(granularity, granularity.is_power_of_two());
        self.granularity = granularity;
        Ok(())
    }

    pub fn granularity(&self) -> usize {
        self.granularity
    }
}

/// Free blocks as `(offset, len)` pairs, sorted by offset, never adjacent.
#[derive(Debug)]
struct FreeList {
    blocks: Vec<(usize, usize)>,
}

impl FreeList {
    fn new(len: usize) -> FreeList {
        FreeList {
            blocks: vec![(0, len)],
        }
    }

    /// First fit: takes `len` bytes whose address (`base + offset`) is aligned to
    /// `alignment`. The unaligned head of the chosen block stays free.
    fn take(&mut self, base: usize, len: usize, alignment: usize) -> Option<usize> {
        let (index, start) = self.blocks.iter().enumerate().find_map(|(i, &(off, size))| {
            let start = align_up(base + off, alignment) - base;
            (start + len <= off + size).then_some((i, start))
        })?;

        let (off, size) = self.blocks.remove(index);
        let end = start + len;
        if end < off + size {
            self.blocks.insert(index, (end, off + size - end));
        }
        if start > off {
            self.blocks.insert(index, (off, start - off));
        }
        Some(start)
    }

    /// Returns `len` bytes at `offset`, merging with free neighbours.
    fn give_back(&mut self, offset: usize, len: usize) -> Result<()> {
        let index = self.blocks.partition_point(|&(off, _)| off < offset);
        if let Some(&(prev_off, prev_len)) = index.checked_sub(1).map(|i| &self.blocks[i]) {
            verify_arg!(ptr, prev_off + prev_len <= offset);
        }
        if let Some(&(next_off, _)) = self.blocks.get(index) {
            verify_arg!(ptr, offset + len <= next_off);
        }

        self.blocks.insert(index, (offset, len));
        if index + 1 < self.blocks.len() && offset + len == self.blocks[index + 1].0 {
            self.blocks[index].1 += self.blocks[index + 1].1;
            self.blocks.remove(index + 1);
        }
        if index > 0 {
            let (prev_off, prev_len) = self.blocks[index - 1];
            if prev_off + prev_len == offset {
                self.blocks[index - 1].1 += self.blocks[index].1;
                self.blocks.remove(index);
            }
        }
        Ok(())
    }

    fn free_bytes(&self) -> usize {
        self.blocks.iter().map(|&(_, len)| len).sum()
    }
}

/// Provider that manages a fixed, caller-owned region with a first-fit,
/// coalescing free list. It never maps or frees memory of its own.
pub struct FixedMemoryProvider {
    base: NonNull<u8>,
    len: usize,
    granularity: usize,
    free_list: Mutex<FreeList>,
}

// SAFETY: the region is exclusively owned by the provider (creation contract) and
// the free list is protected by the mutex.
unsafe impl Send for FixedMemoryProvider {}
unsafe impl Sync for FixedMemoryProvider {}

impl FixedMemoryProvider {
    fn offset_of(&self, ptr: NonNull<u8>) -> Result<usize> {
        let addr = ptr.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;
        verify_arg!(ptr, addr >= base && addr < base + self.len);
        Ok(addr - base)
    }

    fn rounded(&self, size: usize) -> Result<usize> {
        checked_align_up(size.max(1), self.granularity)
            .ok_or_else(|| Error::invalid_arg("size", "size overflows the granularity rounding"))
    }

    /// Bytes currently available for allocation.
    pub fn free_bytes(&self) -> usize {
        self.free_list.lock().free_bytes()
    }
}

impl MemoryProviderOps for FixedMemoryProvider {
    type Params = FixedMemoryProviderParams;

    fn initialize(params: &FixedMemoryProviderParams) -> Result<FixedMemoryProvider> {
        let (base, len) = params
            .region
            .ok_or_else(|| Error::invalid_arg("region", "no memory region was set"))?;
        if base.as_ptr() as usize % params.granularity != 0 {
            return Err(Error::invalid_arg(
                "region",
                format!(
                    "region at {base:p} is not aligned to the granularity {}",
                    params.granularity
                ),
            ));
        }
        Ok(FixedMemoryProvider {
            base,
            len,
            granularity: params.granularity,
            free_list: Mutex::new(FreeList::new(len))?,
        })
    }
}

impl MemoryProvider for FixedMemoryProvider {
    fn name(&self) -> &str {
        "FIXED"
    }

    fn alloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>> {
        verify_arg!(alignment, alignment == 0 || alignment.is_power_of_two());
        let len = self.rounded(size)?;
        if len > self.len {
            return Err(Error::out_of_host_memory());
        }
        let alignment = alignment.max(self.granularity);
        let offset = self
            .free_list
            .lock()
            .take(self.base.as_ptr() as usize, len, alignment)
            .ok_or_else(Error::out_of_host_memory)?;
        // SAFETY: `offset + len` lies within the region.
        Ok(unsafe { self.base.add(offset) })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) -> Result<()> {
        let offset = self.offset_of(ptr)?;
        let len = self.rounded(size)?;
        verify_arg!(size, offset + len <= self.len);
        self.free_list.lock().give_back(offset, len)
    }

    fn min_page_size(&self, _ptr: Option<NonNull<u8>>) -> Result<usize> {
        Ok(self.granularity)
    }

    fn recommended_page_size(&self, size: usize) -> Result<usize> {
        self.rounded(size)
    }

    fn allocation_properties(&self, ptr: NonNull<u8>) -> Result<AllocationProperties> {
        self.offset_of(ptr)?;
        Ok(AllocationProperties {
            memory_type: MemoryType::Host,
            page_size: self.granularity,
            id: 0,
        })
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::FREE | ProviderCapabilities::HOST_ACCESSIBLE
    }

    fn last_native_error(&self) -> Option<NativeError> {
        None
    }

    fn finalize(&mut self) -> Result<()> {
        let free = self.free_list.get_mut().free_bytes();
        if free != self.len {
            log::debug!(
                "Fixed memory provider finalized with {} of {} bytes in use",
                self.len - free,
                self.len
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_list_first_fit_and_coalesce() {
        let mut list = FreeList::new(1024);
        assert_eq!(list.take(0, 256, 64), Some(0));
        assert_eq!(list.take(0, 256, 64), Some(256));
        assert_eq!(list.take(0, 256, 64), Some(512));
        assert_eq!(list.blocks, [(768, 256)]);

        list.give_back(256, 256).unwrap();
        assert_eq!(list.blocks, [(256, 256), (768, 256)]);
        list.give_back(0, 256).unwrap();
        assert_eq!(list.blocks, [(0, 512), (768, 256)]);
        list.give_back(512, 256).unwrap();
        assert_eq!(list.blocks, [(0, 1024)]);
    }

    #[test]
    fn test_free_list_alignment_keeps_head() {
        let mut list = FreeList::new(4096);
        assert_eq!(list.take(0, 64, 64), Some(0));
        assert_eq!(list.take(0, 64, 1024), Some(1024));
        assert_eq!(list.blocks, [(64, 960), (1088, 3008)]);
        assert_eq!(list.free_bytes(), 4096 - 128);
    }

    #[test]
    fn test_free_list_rejects_overlap() {
        let mut list = FreeList::new(1024);
        assert_eq!(list.take(0, 512, 64), Some(0));
        assert!(list.give_back(512, 64).is_err());
        assert!(list.give_back(448, 128).is_err());
        list.give_back(0, 512).unwrap();
        assert_eq!(list.blocks, [(0, 1024)]);
    }

    #[test]
    fn test_free_list_exhaustion() {
        let mut list = FreeList::new(256);
        assert_eq!(list.take(0, 256, 64), Some(0));
        assert!(list.blocks.is_empty());
        assert_eq!(list.take(0, 64, 64), None);
    }
}
