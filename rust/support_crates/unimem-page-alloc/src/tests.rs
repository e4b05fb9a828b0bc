use std::io::{Read, Seek, SeekFrom, Write};

use crate::{Protection, Visibility, align::is_aligned, mmap};

struct Pages {
    ptr: *mut std::ffi::c_void,
    size: usize,
    is_large: bool,
}

impl Pages {
    fn allocate(size: usize, alignment: usize) -> std::io::Result<Pages> {
        let (ptr, size) = mmap::allocate(size, alignment, Protection::default(), Visibility::Private)?;
        Ok(Pages {
            ptr,
            size,
            is_large: false,
        })
    }

    fn allocate_large(size: usize) -> std::io::Result<Pages> {
        let (ptr, size) = mmap::allocate_large_pages(size, Protection::default())?;
        Ok(Pages {
            ptr,
            size,
            is_large: true,
        })
    }

    fn is_aligned(&self, alignment: usize) -> bool {
        is_aligned(self.ptr as usize, alignment)
    }

    fn bytes(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.cast(), self.size) }
    }
}

impl Drop for Pages {
    fn drop(&mut self) {
        if self.is_large {
            unsafe { mmap::free_large_pages(self.ptr, self.size).expect("free_large_pages") };
        } else {
            unsafe { mmap::free(self.ptr, self.size).expect("free") };
        }
    }
}

#[test]
fn test_allocate_rounds_to_page_size() {
    let page_size = mmap::get_page_size();
    assert!(page_size.is_power_of_two());

    let p = Pages::allocate(0, 0).unwrap();
    assert_eq!(p.size, page_size, "Zero size should allocate one page");
    assert!(p.is_aligned(page_size));

    let p = Pages::allocate(page_size, 0).unwrap();
    assert_eq!(p.size, page_size);

    let p = Pages::allocate(page_size * 3 + 100, 0).unwrap();
    assert_eq!(p.size, page_size * 4);
}

#[test]
fn test_allocate_over_aligned() {
    let page_size = mmap::get_page_size();
    for shift in [1, 4, 8] {
        let alignment = page_size << shift;
        let mut p = Pages::allocate(100, alignment).unwrap();
        assert!(p.is_aligned(alignment), "alignment {alignment}");
        assert_eq!(p.size, page_size);
        p.bytes().fill(0x5A);
    }
}

#[test]
fn test_allocate_rejects_bad_alignment() {
    let err = mmap::allocate(64, 3000, Protection::default(), Visibility::Private).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn test_allocated_memory_is_zeroed_and_writable() {
    let mut p = Pages::allocate(10_000, 0).unwrap();
    assert!(p.bytes().iter().all(|&b| b == 0));
    p.bytes()[9_999] = 1;
    assert_eq!(p.bytes()[9_999], 1);
}

#[test]
fn test_large_page_allocations() {
    if let Err(e) = crate::check_and_enable_large_page_support() {
        println!("check_and_enable_large_page_support: {e:?}");
        return;
    }

    let pages = Pages::allocate_large(50_000_000).unwrap();
    assert!(pages.is_aligned(mmap::get_large_page_size()));

    let pages = Pages::allocate_large(0).unwrap();
    assert!(pages.is_aligned(mmap::get_large_page_size()));
}

#[cfg(target_os = "linux")]
#[test]
fn test_shared_file_mapping_writes_through() {
    let page_size = mmap::get_page_size();
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&vec![0u8; page_size * 2]).unwrap();

    let (ptr, size) = mmap::map_file(
        &file,
        page_size as u64,
        10,
        Protection::default(),
        Visibility::Shared,
    )
    .unwrap();
    assert_eq!(size, page_size);
    unsafe {
        std::ptr::write_bytes(ptr.cast::<u8>(), 0xC3, 10);
        mmap::unmap_file(ptr, size).unwrap();
    }

    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.read_to_end(&mut contents).unwrap();
    assert!(contents[..page_size].iter().all(|&b| b == 0));
    assert!(contents[page_size..page_size + 10].iter().all(|&b| b == 0xC3));
}

#[cfg(target_os = "linux")]
#[test]
fn test_map_file_rejects_unaligned_offset() {
    let file = tempfile::tempfile().unwrap();
    file.set_len(1 << 16).unwrap();
    let err = mmap::map_file(&file, 17, 10, Protection::default(), Visibility::Shared).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}
