//! Platform page mapping: the host-memory substrate of the OS and file-backed
//! memory providers.
//!
//! The [`mmap`] module is selected at build time (`mmap_linux.rs`, `mmap_win.rs`,
//! or the portable `mmap_fallback.rs`) and exposes the same set of functions on
//! every platform: page size queries, anonymous mappings with arbitrary
//! power-of-two alignment, large-page mappings and file-backed mappings.

use std::sync::OnceLock;

pub mod align;

#[cfg_attr(any(target_os = "linux"), path = "mmap_linux.rs")]
#[cfg_attr(windows, path = "mmap_win.rs")]
#[cfg_attr(not(any(target_os = "linux", windows)), path = "mmap_fallback.rs")]
pub mod mmap;

bitflags::bitflags! {
    /// Access rights of mapped pages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protection: u32 {
        const READ = 1;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

impl Protection {
    /// Pages that cannot be accessed at all.
    pub const NONE: Protection = Protection::empty();
}

impl Default for Protection {
    fn default() -> Self {
        Protection::READ | Protection::WRITE
    }
}

/// Whether the pages of a mapping may be shared with other mappings of the
/// same object (another process, another view of the same file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    #[default]
    Private,
    Shared,
}

/// Checks if large page support is available and attempts to enable it if necessary.
///
/// The result is computed once per process.
///
/// # Errors
///
/// Returns an error if large pages are not supported or cannot be enabled, most
/// commonly because of missing privileges or because no huge pages are configured.
pub fn check_and_enable_large_page_support() -> std::io::Result<()> {
    static RESULT: OnceLock<std::io::Result<()>> = OnceLock::new();
    match RESULT.get_or_init(enable_large_page_support) {
        Ok(()) => Ok(()),
        Err(e) => Err(std::io::Error::new(e.kind(), e.to_string())),
    }
}

fn enable_large_page_support() -> std::io::Result<()> {
    if check_large_page_allocation().is_err() {
        mmap::try_enable_large_pages()?;
        check_large_page_allocation()
    } else {
        Ok(())
    }
}

/// Performs (and immediately releases) a minimal large-page mapping.
fn check_large_page_allocation() -> std::io::Result<()> {
    let (ptr, size) = mmap::allocate_large_pages(1, Protection::default())?;
    let _ = unsafe { mmap::free_large_pages(ptr, size) };
    Ok(())
}

#[cfg(test)]
mod tests;
