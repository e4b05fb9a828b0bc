use std::{ptr::NonNull, sync::Arc};

use unimem_common::ResultCode;
use unimem_page_alloc::{Protection, Visibility, align::is_aligned, mmap};

use crate::{
    MemoryProviderHandle, MemoryType, ProviderCapabilities, ProviderState, ProviderStats,
    file::{FileMemoryProvider, FileMemoryProviderParams},
    fixed::{FixedMemoryProvider, FixedMemoryProviderParams},
    os::{OsMemoryProvider, OsMemoryProviderParams},
    trace::{TraceMemoryProvider, TraceMemoryProviderParams},
};

fn os_provider() -> MemoryProviderHandle {
    MemoryProviderHandle::create::<OsMemoryProvider>(&OsMemoryProviderParams::new()).unwrap()
}

fn fill_and_check(ptr: NonNull<u8>, len: usize, value: u8) {
    let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) };
    bytes.fill(value);
    assert!(bytes.iter().all(|&b| b == value));
}

#[test]
fn test_os_provider_alloc_free() {
    let provider = os_provider();
    assert_eq!(provider.name(), "OS");
    assert_eq!(provider.state(), ProviderState::Ready);
    assert!(
        provider
            .capabilities()
            .contains(ProviderCapabilities::FREE | ProviderCapabilities::HOST_ACCESSIBLE)
    );

    let page_size = mmap::get_page_size();
    assert_eq!(provider.min_page_size(None).unwrap(), page_size);
    assert_eq!(provider.recommended_page_size(1).unwrap(), page_size);
    assert_eq!(
        provider.recommended_page_size(page_size + 1).unwrap(),
        2 * page_size
    );

    let ptr = provider.alloc(10_000, 0).unwrap();
    assert!(is_aligned(ptr.as_ptr() as usize, page_size));
    fill_and_check(ptr, 10_000, 0x11);
    let props = provider.allocation_properties(ptr).unwrap();
    assert_eq!(props.memory_type, MemoryType::Host);
    assert_eq!(props.page_size, page_size);

    assert_eq!(
        provider.stats(),
        ProviderStats {
            allocated_bytes: 10_000,
            peak_bytes: 10_000,
            alloc_count: 1,
            free_count: 0,
        }
    );
    unsafe { provider.free(ptr, 10_000).unwrap() };
    assert_eq!(provider.stats().allocated_bytes, 0);
    assert_eq!(provider.stats().peak_bytes, 10_000);
    provider.destroy().unwrap();
}

#[test]
fn test_os_provider_over_aligned() {
    let provider = os_provider();
    let alignment = mmap::get_page_size() * 16;
    let ptrs: Vec<_> = (0..8)
        .map(|_| provider.alloc(100, alignment).unwrap())
        .collect();
    for &ptr in &ptrs {
        assert!(is_aligned(ptr.as_ptr() as usize, alignment));
        fill_and_check(ptr, 100, 0x22);
    }
    for ptr in ptrs {
        unsafe { provider.free(ptr, 100).unwrap() };
    }
}

#[test]
fn test_handle_rejects_bad_alignment() {
    let provider = os_provider();
    let err = provider.alloc(64, 48).unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidArgument);
    assert_eq!(provider.stats(), ProviderStats::default());
}

#[test]
fn test_os_provider_read_only_pages() {
    let mut params = OsMemoryProviderParams::new();
    params.set_protection(Protection::READ).unwrap();
    params.set_visibility(Visibility::Private).unwrap();
    let provider = MemoryProviderHandle::create::<OsMemoryProvider>(&params);
    // The portable fallback only emulates read-write pages.
    let Ok(provider) = provider else {
        return;
    };
    let ptr = provider.alloc(1, 0).unwrap();
    assert_eq!(unsafe { *ptr.as_ptr() }, 0);
    unsafe { provider.free(ptr, 1).unwrap() };
}

#[test]
fn test_os_provider_large_pages() {
    if unimem_page_alloc::check_and_enable_large_page_support().is_err() {
        return;
    }
    let mut params = OsMemoryProviderParams::new();
    params.set_large_pages(true).unwrap();
    let provider = MemoryProviderHandle::create::<OsMemoryProvider>(&params).unwrap();
    let large = mmap::get_large_page_size();
    assert_eq!(provider.min_page_size(None).unwrap(), large);
    assert!(provider.capabilities().contains(ProviderCapabilities::LARGE_PAGES));
    let ptr = provider.alloc(4096, 0).unwrap();
    assert!(is_aligned(ptr.as_ptr() as usize, large));
    unsafe { provider.free(ptr, 4096).unwrap() };
}

#[test]
fn test_os_provider_large_pages_need_private_visibility() {
    let mut params = OsMemoryProviderParams::new();
    params.set_large_pages(true).unwrap();
    params.set_visibility(Visibility::Shared).unwrap();
    let err = MemoryProviderHandle::create::<OsMemoryProvider>(&params).unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidArgument);
}

/// Backing storage for fixed providers, aligned to the default granularity.
#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct Chunk([u8; 64]);

fn fixed_region(len: usize) -> Vec<Chunk> {
    vec![Chunk([0; 64]); len / 64]
}

#[test]
fn test_fixed_provider_requires_region() {
    let err = MemoryProviderHandle::create::<FixedMemoryProvider>(&FixedMemoryProviderParams::new())
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidArgument);

    let mut params = FixedMemoryProviderParams::new();
    let err = unsafe { params.set_region(std::ptr::null_mut(), 1024) }.unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidArgument);
    assert!(params.set_granularity(48).is_err());
    assert_eq!(params.granularity(), crate::fixed::DEFAULT_GRANULARITY);
}

#[test]
fn test_fixed_provider_exhaustion_and_reuse() {
    let mut region = fixed_region(8192);
    let mut params = FixedMemoryProviderParams::new();
    unsafe {
        params
            .set_region(region.as_mut_ptr().cast(), region.len() * 64)
            .unwrap()
    };
    let provider = MemoryProviderHandle::create::<FixedMemoryProvider>(&params).unwrap();
    assert_eq!(provider.min_page_size(None).unwrap(), 64);

    let ptrs: Vec<_> = (0..8).map(|_| provider.alloc(1000, 0).unwrap()).collect();
    let err = provider.alloc(1000, 0).unwrap_err();
    assert_eq!(err.code(), ResultCode::OutOfHostMemory);

    let outside = NonNull::new(region.as_mut_ptr().wrapping_add(256).cast::<u8>()).unwrap();
    assert!(provider.allocation_properties(outside).is_err());
    assert_eq!(
        provider.allocation_properties(ptrs[3]).unwrap().memory_type,
        MemoryType::Host
    );

    for &ptr in &ptrs {
        unsafe { provider.free(ptr, 1000).unwrap() };
    }
    let whole = provider.alloc(8192, 0).unwrap();
    assert_eq!(whole.as_ptr(), region.as_mut_ptr().cast());
    unsafe { provider.free(whole, 8192).unwrap() };
    drop(provider);
    drop(region);
}

#[test]
fn test_fixed_provider_rejects_unaligned_region() {
    let mut region = fixed_region(16384);
    let mut params = FixedMemoryProviderParams::new();
    unsafe {
        params
            .set_region(region.as_mut_ptr().cast::<u8>().add(33), 8192)
            .unwrap()
    };
    let err = MemoryProviderHandle::create::<FixedMemoryProvider>(&params).unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidArgument);

    params.set_granularity(1).unwrap();
    let provider = MemoryProviderHandle::create::<FixedMemoryProvider>(&params).unwrap();
    let whole = provider.alloc(8192, 0).unwrap();
    unsafe { provider.free(whole, 8192).unwrap() };
    drop(provider);
    drop(region);
}

#[test]
fn test_fixed_provider_concurrent() {
    const THREADS: usize = 4;
    let mut region = fixed_region(512 * 1024);
    let mut params = FixedMemoryProviderParams::new();
    unsafe {
        params
            .set_region(region.as_mut_ptr().cast(), region.len() * 64)
            .unwrap()
    };
    let provider = MemoryProviderHandle::create::<FixedMemoryProvider>(&params).unwrap();

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let provider = &provider;
            s.spawn(move || {
                let mut rng = fastrand::Rng::with_seed(t as u64);
                let mut live = Vec::new();
                for _ in 0..2000 {
                    if live.len() < 16 && rng.bool() {
                        let size = rng.usize(1..2048);
                        if let Ok(ptr) = provider.alloc(size, 0) {
                            fill_and_check(ptr, size, t as u8);
                            live.push((ptr, size));
                        }
                    } else if let Some((ptr, size)) = live.pop() {
                        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
                        assert!(bytes.iter().all(|&b| b == t as u8));
                        unsafe { provider.free(ptr, size).unwrap() };
                    }
                }
                for (ptr, size) in live {
                    unsafe { provider.free(ptr, size).unwrap() };
                }
            });
        }
    });

    let stats = provider.stats();
    assert_eq!(stats.allocated_bytes, 0);
    assert_eq!(stats.alloc_count, stats.free_count);
    drop(provider);
    drop(region);
}

#[cfg(target_os = "linux")]
#[test]
fn test_file_provider_shared_mapping_writes_through() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backing.bin");
    let mut params = FileMemoryProviderParams::new();
    params.set_path(&path).unwrap();
    params.set_visibility(Visibility::Shared).unwrap();
    let provider = MemoryProviderHandle::create::<FileMemoryProvider>(&params).unwrap();
    assert!(provider.capabilities().contains(ProviderCapabilities::FILE_BACKED));

    let page_size = mmap::get_page_size();
    let first = provider.alloc(100, 0).unwrap();
    let second = provider.alloc(page_size + 1, 0).unwrap();
    fill_and_check(first, 100, 0xA1);
    fill_and_check(second, page_size + 1, 0xB2);
    assert!(provider.allocation_properties(second).is_ok());

    unsafe {
        provider.free(first, 100).unwrap();
        provider.free(second, page_size + 1).unwrap();
    }
    let err = unsafe { provider.free(first, 100) }.unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidArgument);
    provider.destroy().unwrap();

    let contents = std::fs::read(&path).unwrap();
    assert_eq!(contents.len(), 3 * page_size);
    assert!(contents[..100].iter().all(|&b| b == 0xA1));
    assert!(contents[page_size..2 * page_size + 1].iter().all(|&b| b == 0xB2));
}

#[cfg(target_os = "linux")]
#[test]
fn test_file_provider_temp_file() {
    let provider =
        MemoryProviderHandle::create::<FileMemoryProvider>(&FileMemoryProviderParams::new())
            .unwrap();
    let ptr = provider.alloc(5000, 0).unwrap();
    fill_and_check(ptr, 5000, 7);
    let err = provider.alloc(10, mmap::get_page_size() * 2).unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidArgument);
    unsafe { provider.free(ptr, 5000).unwrap() };
}

#[cfg(not(target_os = "linux"))]
#[test]
fn test_file_provider_not_supported() {
    let err = MemoryProviderHandle::create::<FileMemoryProvider>(&FileMemoryProviderParams::new())
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::NotSupported);
}

#[test]
fn test_trace_provider_counts_calls() {
    let upstream = Arc::new(os_provider());
    let mut params = TraceMemoryProviderParams::new();
    assert!(MemoryProviderHandle::create::<TraceMemoryProvider>(&params).is_err());

    params.set_upstream(upstream.clone()).unwrap();
    let counters = params.counters();
    let provider = MemoryProviderHandle::create::<TraceMemoryProvider>(&params).unwrap();
    assert_eq!(provider.name(), "TRACE(OS)");

    let ptr = provider.alloc(128, 0).unwrap();
    assert_eq!(upstream.stats().alloc_count, 1);
    provider.min_page_size(Some(ptr)).unwrap();
    provider.allocation_properties(ptr).unwrap();
    assert!(provider.alloc(128, 3).is_err());
    unsafe { provider.free(ptr, 128).unwrap() };

    assert_eq!(counters.alloc_calls(), 1);
    assert_eq!(counters.free_calls(), 1);
    assert_eq!(counters.query_calls(), 2);
    assert_eq!(counters.failed_calls(), 0);
    assert_eq!(upstream.stats().free_count, 1);
    provider.destroy().unwrap();
    assert_eq!(Arc::strong_count(&upstream), 2);
}
