//! `SRWLOCK` backing for [`crate::OsMutex`].

use std::cell::UnsafeCell;

use windows_sys::Win32::System::Threading::{
    AcquireSRWLockExclusive, InitializeSRWLock, ReleaseSRWLockExclusive, SRWLOCK,
    TryAcquireSRWLockExclusive,
};

/// A slim reader/writer lock used in exclusive mode only.
///
/// SRW locks are not recursive: relocking from the owning thread deadlocks.
#[repr(C)]
pub struct RawLock(UnsafeCell<SRWLOCK>);

impl RawLock {
    /// Initializes the lock in place. Never fails on this platform.
    ///
    /// # Safety
    ///
    /// `this` must be valid for writes of `size_of::<RawLock>()` bytes and
    /// properly aligned.
    pub unsafe fn init(this: *mut RawLock) -> std::io::Result<()> {
        unsafe { InitializeSRWLock(this.cast::<SRWLOCK>()) };
        Ok(())
    }

    /// # Safety
    ///
    /// The lock must be initialized.
    #[inline]
    pub unsafe fn lock(&self) {
        unsafe { AcquireSRWLockExclusive(self.0.get()) };
    }

    /// # Safety
    ///
    /// The lock must be initialized.
    #[inline]
    pub unsafe fn try_lock(&self) -> bool {
        // Nonzero BOOLEAN on success.
        let acquired = unsafe { TryAcquireSRWLockExclusive(self.0.get()) };
        acquired as u8 != 0
    }

    /// # Safety
    ///
    /// The lock must be held by the calling thread.
    #[inline]
    pub unsafe fn unlock(&self) {
        unsafe { ReleaseSRWLockExclusive(self.0.get()) };
    }

    /// SRW locks own no kernel resources; the storage is simply left as is.
    ///
    /// # Safety
    ///
    /// The lock must be unlocked.
    pub unsafe fn destroy(_this: *mut RawLock) {}
}
