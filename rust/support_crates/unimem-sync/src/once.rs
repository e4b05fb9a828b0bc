//! One-time initialization.

use std::sync::{
    Once,
    atomic::{AtomicU8, Ordering},
};

/// Observable progress of a [`OnceFlag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnceState {
    /// No caller has started the callback yet.
    Incomplete,
    /// A caller is running the callback; other callers are blocked.
    Running,
    /// The callback has finished. The flag never resets.
    Complete,
    /// The callback panicked. Later calls panic as well.
    Poisoned,
}

const INCOMPLETE: u8 = 0;
const RUNNING: u8 = 1;
const COMPLETE: u8 = 2;
const POISONED: u8 = 3;

/// Publishes the final state of a running callback, including on unwind.
struct Finish<'a> {
    state: &'a AtomicU8,
    value: u8,
}

impl Drop for Finish<'_> {
    fn drop(&mut self) {
        self.state.store(self.value, Ordering::Release);
    }
}

/// Guards a single initialization callback.
///
/// Any number of threads may call [`OnceFlag::call_once`] concurrently; exactly one
/// of them runs the callback, the others block until it has finished. Every caller
/// observes all side effects of the callback once `call_once` returns to it.
///
/// A flag can be declared statically:
///
/// ```
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use unimem_sync::OnceFlag;
///
/// static INIT: OnceFlag = OnceFlag::new();
/// static VALUE: AtomicU64 = AtomicU64::new(0);
///
/// INIT.call_once(|| VALUE.store(42, Ordering::Relaxed));
/// INIT.call_once(|| VALUE.store(7, Ordering::Relaxed));
/// assert_eq!(VALUE.load(Ordering::Relaxed), 42);
/// ```
///
/// If the callback panics the flag is poisoned and later calls panic as well.
pub struct OnceFlag {
    once: Once,
    state: AtomicU8,
}

impl OnceFlag {
    pub const fn new() -> OnceFlag {
        OnceFlag {
            once: Once::new(),
            state: AtomicU8::new(INCOMPLETE),
        }
    }

    /// Runs `f` if no caller has run it through this flag before.
    pub fn call_once(&self, f: impl FnOnce()) {
        self.once.call_once(|| {
            self.state.store(RUNNING, Ordering::Release);
            let mut finish = Finish {
                state: &self.state,
                value: POISONED,
            };
            f();
            finish.value = COMPLETE;
        });
    }

    pub fn state(&self) -> OnceState {
        match self.state.load(Ordering::Acquire) {
            INCOMPLETE => OnceState::Incomplete,
            RUNNING => OnceState::Running,
            COMPLETE => OnceState::Complete,
            _ => OnceState::Poisoned,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.once.is_completed()
    }
}

impl Default for OnceFlag {
    fn default() -> Self {
        OnceFlag::new()
    }
}

impl std::fmt::Debug for OnceFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnceFlag")
            .field("state", &self.state())
            .finish()
    }
}

/// Executes `callback` exactly once across all callers sharing `flag`.
pub fn init_once(flag: &OnceFlag, callback: impl FnOnce()) {
    flag.call_once(callback);
}
