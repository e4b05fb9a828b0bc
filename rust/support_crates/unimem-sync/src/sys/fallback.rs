//! Spin lock backing for [`crate::OsMutex`] on targets without pthreads or Win32.

use std::sync::atomic::{AtomicBool, Ordering};

#[repr(C)]
pub struct RawLock(AtomicBool);

impl RawLock {
    /// # Safety
    ///
    /// `this` must be valid for writes and properly aligned.
    pub unsafe fn init(this: *mut RawLock) -> std::io::Result<()> {
        unsafe { this.write(RawLock(AtomicBool::new(false))) };
        Ok(())
    }

    /// # Safety
    ///
    /// The lock must be initialized.
    #[inline]
    pub unsafe fn lock(&self) {
        while !unsafe { self.try_lock() } {
            while self.0.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
    }

    /// # Safety
    ///
    /// The lock must be initialized.
    #[inline]
    pub unsafe fn try_lock(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// # Safety
    ///
    /// The lock must be held by the calling thread.
    #[inline]
    pub unsafe fn unlock(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// # Safety
    ///
    /// The lock must be unlocked.
    pub unsafe fn destroy(_this: *mut RawLock) {}
}
