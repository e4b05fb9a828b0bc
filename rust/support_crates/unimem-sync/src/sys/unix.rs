//! `pthread_mutex_t` backing for [`crate::OsMutex`].

use std::cell::UnsafeCell;

/// A non-recursive pthread mutex.
///
/// Initialized as `PTHREAD_MUTEX_NORMAL`, so relocking from the owning thread
/// deadlocks instead of being undefined. Must not move after [`RawLock::init`].
#[repr(C)]
pub struct RawLock(UnsafeCell<libc::pthread_mutex_t>);

impl RawLock {
    /// Initializes the lock in place.
    ///
    /// # Safety
    ///
    /// `this` must be valid for writes of `size_of::<RawLock>()` bytes, properly
    /// aligned, and must not hold a live (initialized, not destroyed) lock.
    pub unsafe fn init(this: *mut RawLock) -> std::io::Result<()> {
        let mut attr = std::mem::MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        let rc = unsafe { libc::pthread_mutexattr_init(attr.as_mut_ptr()) };
        if rc != 0 {
            return Err(std::io::Error::from_raw_os_error(rc));
        }
        let rc = unsafe {
            let rc = libc::pthread_mutexattr_settype(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_NORMAL);
            if rc == 0 {
                libc::pthread_mutex_init(this.cast::<libc::pthread_mutex_t>(), attr.as_ptr())
            } else {
                rc
            }
        };
        unsafe { libc::pthread_mutexattr_destroy(attr.as_mut_ptr()) };
        if rc != 0 {
            return Err(std::io::Error::from_raw_os_error(rc));
        }
        Ok(())
    }

    /// # Safety
    ///
    /// The lock must be initialized and not destroyed.
    #[inline]
    pub unsafe fn lock(&self) {
        let rc = unsafe { libc::pthread_mutex_lock(self.0.get()) };
        assert_eq!(rc, 0, "pthread_mutex_lock failed");
    }

    /// # Safety
    ///
    /// The lock must be initialized and not destroyed.
    #[inline]
    pub unsafe fn try_lock(&self) -> bool {
        unsafe { libc::pthread_mutex_trylock(self.0.get()) == 0 }
    }

    /// # Safety
    ///
    /// The lock must be held by the calling thread.
    #[inline]
    pub unsafe fn unlock(&self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.0.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed");
    }

    /// Releases the native lock resources, leaving the storage untouched.
    ///
    /// # Safety
    ///
    /// The lock must be initialized, unlocked and not destroyed.
    pub unsafe fn destroy(this: *mut RawLock) {
        let rc = unsafe { libc::pthread_mutex_destroy(this.cast::<libc::pthread_mutex_t>()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_destroy failed");
    }
}
