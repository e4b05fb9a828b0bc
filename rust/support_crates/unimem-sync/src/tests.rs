use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use crate::{
    Mutex, MutexSlot, OnceFlag, OnceState, OsMutex,
    atomic::{atomic_load_acquire, atomic_store_release, fetch_and_add},
};

#[test]
fn test_mutex_excludes_concurrent_holders() {
    const THREADS: usize = 8;
    const ITERATIONS: usize = 2000;

    let mut storage = MaybeUninit::<OsMutex>::uninit();
    let slot = MutexSlot::init_in(&mut storage).unwrap();
    let inside = AtomicBool::new(false);
    let overlaps = AtomicUsize::new(0);
    let total = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ITERATIONS {
                    let _guard = slot.lock();
                    if inside.swap(true, Ordering::Relaxed) {
                        overlaps.fetch_add(1, Ordering::Relaxed);
                    }
                    let v = total.load(Ordering::Relaxed);
                    std::hint::spin_loop();
                    total.store(v + 1, Ordering::Relaxed);
                    inside.store(false, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(overlaps.load(Ordering::Relaxed), 0);
    assert_eq!(total.load(Ordering::Relaxed), THREADS * ITERATIONS);
    slot.destroy_not_free();
}

#[test]
fn test_storage_reused_after_destroy_not_free() {
    let mut storage = vec![0u64; OsMutex::size().div_ceil(8)];
    let bytes: &mut [u8] = unsafe {
        std::slice::from_raw_parts_mut(storage.as_mut_ptr().cast::<u8>(), storage.len() * 8)
    };
    let base = bytes.as_ptr();

    for _ in 0..3 {
        let slot = MutexSlot::init_in_bytes(bytes).unwrap();
        assert_eq!(&*slot as *const OsMutex as *const u8, base);
        drop(slot.lock());
        slot.destroy_not_free();
    }
    // The caller-owned buffer is still alive and writable.
    bytes.fill(0xAB);
    assert!(bytes.iter().all(|&b| b == 0xAB));
}

#[test]
fn test_owned_mutex_counter() {
    let counter = Arc::new(Mutex::new(0u64).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let counter = counter.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    *counter.lock() += 1;
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*counter.lock(), 4000);
}

struct Unsynchronized(UnsafeCell<u64>);

// SAFETY: written only inside the once callback, read only after `call_once`.
unsafe impl Sync for Unsynchronized {}

impl Unsynchronized {
    fn get(&self) -> u64 {
        unsafe { *self.0.get() }
    }

    /// # Safety
    ///
    /// No other thread may access the value concurrently.
    unsafe fn set(&self, value: u64) {
        unsafe { *self.0.get() = value };
    }
}

#[test]
fn test_init_once_concurrent() {
    const THREADS: usize = 16;

    let flag = OnceFlag::new();
    let runs = AtomicUsize::new(0);
    let value = Unsynchronized(UnsafeCell::new(0));
    let barrier = Barrier::new(THREADS);

    std::thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                barrier.wait();
                flag.call_once(|| {
                    runs.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    unsafe { value.set(0xfeed) };
                });
                assert_eq!(value.get(), 0xfeed);
            });
        }
    });

    assert_eq!(runs.load(Ordering::Relaxed), 1);
    assert_eq!(flag.state(), OnceState::Complete);
}

#[test]
fn test_init_once_panicking_callback_poisons_flag() {
    let flag = OnceFlag::new();
    let res = std::panic::catch_unwind(|| flag.call_once(|| panic!("init failed")));
    assert!(res.is_err());
    assert_eq!(flag.state(), OnceState::Poisoned);
    assert!(!flag.is_completed());
}

#[test]
fn test_release_store_publishes_prior_writes() {
    for _ in 0..50 {
        let payload = Arc::new(Unsynchronized(UnsafeCell::new(0)));
        let ready = Arc::new(AtomicU64::new(0));

        let producer = {
            let payload = payload.clone();
            let ready = ready.clone();
            std::thread::spawn(move || {
                unsafe { payload.set(fastrand::u64(1..)) };
                atomic_store_release(&ready, 1);
            })
        };

        while atomic_load_acquire(&ready) == 0 {
            std::hint::spin_loop();
        }
        assert_ne!(payload.get(), 0);
        producer.join().unwrap();
    }
}

#[test]
fn test_fetch_and_add_concurrent() {
    let word = AtomicU64::new(0);
    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..10_000 {
                    fetch_and_add(&word, 3);
                }
            });
        }
    });
    assert_eq!(atomic_load_acquire(&word), 8 * 10_000 * 3);
}
