//! A platform mutex that can be embedded in caller-owned storage.
//!
//! `OsMutex` hides the native lock representation (`pthread_mutex_t`, `SRWLOCK`)
//! behind [`OsMutex::size`] / [`OsMutex::layout`], so a consumer can reserve room
//! for it inside its own allocation and initialize it there without a separate
//! heap allocation:
//!
//! ```
//! use std::mem::MaybeUninit;
//! use unimem_sync::{MutexSlot, OsMutex};
//!
//! let mut storage = MaybeUninit::<OsMutex>::uninit();
//! let slot = MutexSlot::init_in(&mut storage).unwrap();
//! {
//!     let _guard = slot.lock();
//! }
//! slot.destroy_not_free();
//! // `storage` is still ours and can host a fresh mutex.
//! let slot = MutexSlot::init_in(&mut storage).unwrap();
//! drop(slot);
//! ```
//!
//! The lock is not recursive: locking it again from the thread that holds it
//! deadlocks.

use std::{
    alloc::Layout,
    cell::UnsafeCell,
    marker::PhantomData,
    mem::MaybeUninit,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

use unimem_common::{Error, Result, verify_arg};

use crate::sys::RawLock;

/// A native, non-recursive mutual exclusion lock.
///
/// An `OsMutex` is never copied or moved once initialized. It is created either
/// through [`MutexSlot`] (caller-owned storage) or inside a [`Mutex`].
#[repr(C)]
pub struct OsMutex {
    raw: RawLock,
}

// SAFETY: the native lock is designed to be shared and operated from any thread.
unsafe impl Send for OsMutex {}
unsafe impl Sync for OsMutex {}

impl OsMutex {
    /// Storage size in bytes required by one mutex.
    pub const fn size() -> usize {
        std::mem::size_of::<OsMutex>()
    }

    /// Size and alignment of the storage required by one mutex.
    pub const fn layout() -> Layout {
        Layout::new::<OsMutex>()
    }

    /// Initializes a mutex at `ptr` and returns a pointer aliasing that storage.
    ///
    /// On failure nothing is left to clean up.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `ptr` is null or not aligned to `layout().align()`.
    /// - `OutOfHostMemory` (or an I/O error) if the platform cannot provide the
    ///   native lock resources.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes of [`OsMutex::size`] bytes and must not hold
    /// a live mutex. The storage must stay in place until
    /// [`OsMutex::destroy_not_free`] is called.
    pub unsafe fn init_at(ptr: *mut u8) -> Result<NonNull<OsMutex>> {
        verify_arg!(ptr, !ptr.is_null());
        verify_arg!(ptr, (ptr as usize).is_multiple_of(Self::layout().align()));
        let mutex = ptr.cast::<OsMutex>();
        unsafe { RawLock::init(&raw mut (*mutex).raw) }.map_err(|e| {
            if e.kind() == std::io::ErrorKind::OutOfMemory {
                Error::out_of_host_memory()
            } else {
                Error::io("mutex init", e)
            }
        })?;
        // SAFETY: `ptr` was checked to be non-null above.
        Ok(unsafe { NonNull::new_unchecked(mutex) })
    }

    /// Releases the native resources of the mutex without freeing its storage.
    ///
    /// # Safety
    ///
    /// `mutex` must have been initialized by [`OsMutex::init_at`], must be
    /// unlocked and must not be used afterwards. Calling this twice on the same
    /// initialization is undefined.
    pub unsafe fn destroy_not_free(mutex: NonNull<OsMutex>) {
        unsafe { RawLock::destroy(&raw mut (*mutex.as_ptr()).raw) };
    }

    /// Acquires the lock, blocking the calling thread until it is available.
    pub fn lock(&self) -> OsMutexGuard<'_> {
        unsafe { self.raw.lock() };
        OsMutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    /// Acquires the lock if it is not currently held.
    pub fn try_lock(&self) -> Option<OsMutexGuard<'_>> {
        if unsafe { self.raw.try_lock() } {
            Some(OsMutexGuard {
                mutex: self,
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }
}

/// Holds an [`OsMutex`] locked; unlocks on drop.
#[must_use = "if unused the mutex will immediately unlock"]
pub struct OsMutexGuard<'a> {
    mutex: &'a OsMutex,
    // The native unlock must happen on the locking thread.
    _not_send: PhantomData<*const ()>,
}

impl OsMutexGuard<'_> {
    /// Releases the lock explicitly.
    pub fn unlock(self) {
        drop(self);
    }
}

impl Drop for OsMutexGuard<'_> {
    fn drop(&mut self) {
        unsafe { self.mutex.raw.unlock() };
    }
}

/// An [`OsMutex`] initialized in place inside storage borrowed from the caller.
///
/// The slot borrows the storage mutably for its whole lifetime. Dropping the slot
/// (or calling [`MutexSlot::destroy_not_free`]) releases the native lock but never
/// frees the storage, which goes back to the caller and may host a new mutex.
pub struct MutexSlot<'a> {
    mutex: NonNull<OsMutex>,
    _storage: PhantomData<&'a mut [u8]>,
}

// SAFETY: the slot only hands out shared references to a thread-safe `OsMutex`.
unsafe impl Send for MutexSlot<'_> {}
unsafe impl Sync for MutexSlot<'_> {}

impl<'a> MutexSlot<'a> {
    /// Initializes a mutex in typed, uninitialized storage.
    pub fn init_in(storage: &'a mut MaybeUninit<OsMutex>) -> Result<MutexSlot<'a>> {
        let mutex = unsafe { OsMutex::init_at(storage.as_mut_ptr().cast())? };
        Ok(MutexSlot {
            mutex,
            _storage: PhantomData,
        })
    }

    /// Initializes a mutex at the start of a raw byte buffer.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the buffer is shorter than [`OsMutex::size`] or its
    /// start is not suitably aligned.
    pub fn init_in_bytes(storage: &'a mut [u8]) -> Result<MutexSlot<'a>> {
        verify_arg!(storage, storage.len() >= OsMutex::size());
        let mutex = unsafe { OsMutex::init_at(storage.as_mut_ptr())? };
        Ok(MutexSlot {
            mutex,
            _storage: PhantomData,
        })
    }

    /// Releases the native lock and hands the storage back to the caller.
    pub fn destroy_not_free(self) {
        drop(self);
    }
}

impl Deref for MutexSlot<'_> {
    type Target = OsMutex;

    fn deref(&self) -> &OsMutex {
        unsafe { self.mutex.as_ref() }
    }
}

impl Drop for MutexSlot<'_> {
    fn drop(&mut self) {
        unsafe { OsMutex::destroy_not_free(self.mutex) };
    }
}

/// A data-carrying mutual exclusion primitive built on [`OsMutex`].
///
/// The native lock lives in a boxed slot owned by the `Mutex`; the slot is
/// destroyed and freed when the `Mutex` is dropped.
pub struct Mutex<T: ?Sized> {
    raw: NonNull<OsMutex>,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Result<Mutex<T>> {
        let mut slot = Box::<OsMutex>::new_uninit();
        unsafe { OsMutex::init_at(slot.as_mut_ptr().cast())? };
        // SAFETY: initialized above; ownership of the box moves into `raw`.
        let raw = unsafe { NonNull::new_unchecked(Box::into_raw(slot.assume_init())) };
        Ok(Mutex {
            raw,
            data: UnsafeCell::new(value),
        })
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the lock, blocking the current thread until it is available.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let guard = unsafe { self.raw.as_ref() }.lock();
        MutexGuard {
            _lock: guard,
            data: unsafe { &mut *self.data.get() },
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let guard = unsafe { self.raw.as_ref() }.try_lock()?;
        Some(MutexGuard {
            _lock: guard,
            data: unsafe { &mut *self.data.get() },
        })
    }

    /// Returns a mutable reference to the protected data; no locking is needed
    /// since the borrow is exclusive.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: ?Sized> Drop for Mutex<T> {
    fn drop(&mut self) {
        unsafe {
            OsMutex::destroy_not_free(self.raw);
            drop(Box::from_raw(self.raw.as_ptr()));
        }
    }
}

impl<T: ?Sized + std::fmt::Debug> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Mutex").field("data", &&*guard).finish(),
            None => f.debug_struct("Mutex").field("data", &"<locked>").finish(),
        }
    }
}

/// Exclusive access to the data of a [`Mutex`]; unlocks on drop.
#[must_use = "if unused the mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized> {
    _lock: OsMutexGuard<'a>,
    data: &'a mut T,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use std::mem::MaybeUninit;

    use unimem_common::ResultCode;

    use super::*;

    #[test]
    fn test_layout() {
        let layout = OsMutex::layout();
        assert_eq!(layout.size(), OsMutex::size());
        assert!(layout.align().is_power_of_two());
        assert!(OsMutex::size() > 0);
    }

    #[test]
    fn test_slot_lock_unlock() {
        let mut storage = MaybeUninit::<OsMutex>::uninit();
        let slot = MutexSlot::init_in(&mut storage).unwrap();
        let guard = slot.lock();
        assert!(slot.try_lock().is_none());
        guard.unlock();
        assert!(slot.try_lock().is_some());
        slot.destroy_not_free();
    }

    #[test]
    fn test_init_in_bytes_rejects_short_buffer() {
        let mut storage = vec![0u8; OsMutex::size() - 1];
        let err = MutexSlot::init_in_bytes(&mut storage).err().unwrap();
        assert_eq!(err.code(), ResultCode::InvalidArgument);
    }

    #[test]
    fn test_init_in_bytes_rejects_misaligned_buffer() {
        let align = OsMutex::layout().align();
        if align == 1 {
            return;
        }
        let mut words = vec![0u64; OsMutex::size() / 8 + 2];
        let bytes: &mut [u8] = unsafe {
            std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), words.len() * 8)
        };
        let err = MutexSlot::init_in_bytes(&mut bytes[1..]).err().unwrap();
        assert_eq!(err.code(), ResultCode::InvalidArgument);
    }

    #[test]
    fn test_owned_mutex() {
        let mut m = Mutex::new(vec![1u32]).unwrap();
        m.lock().push(2);
        {
            let guard = m.lock();
            assert!(m.try_lock().is_none());
            assert_eq!(*guard, [1, 2]);
        }
        m.get_mut().push(3);
        assert_eq!(format!("{m:?}"), "Mutex { data: [1, 2, 3] }");
    }

    #[test]
    fn test_failed_try_lock_keeps_holder() {
        let m = Mutex::new(0u32).unwrap();
        let mut guard = m.lock();
        std::thread::scope(|s| {
            s.spawn(|| {
                assert!(m.try_lock().is_none());
                assert!(m.try_lock().is_none());
            });
        });
        assert_eq!(format!("{m:?}"), "Mutex { data: \"<locked>\" }");
        assert!(m.try_lock().is_none());
        *guard += 1;
        drop(guard);
        assert_eq!(*m.try_lock().unwrap(), 1);
    }
}
