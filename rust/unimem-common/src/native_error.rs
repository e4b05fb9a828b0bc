//! Per-thread record of the last native failure.
//!
//! Backends translate native status codes (OS `errno`, driver status) into the
//! [`crate::ErrorKind`] taxonomy; the untranslated code is kept here so callers
//! can retrieve it right after an operation reported `ProviderSpecificError`.

use std::cell::RefCell;

/// A backend failure exactly as the backend reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub code: i64,
    pub message: String,
}

/// A per-thread slot holding the last [`NativeError`] of one backend kind.
///
/// Each backend declares its own slot with [`native_error_slot!`], so failures of
/// one backend never overwrite the diagnostics of another on the same thread.
pub struct NativeErrorSlot(&'static std::thread::LocalKey<RefCell<Option<NativeError>>>);

impl NativeErrorSlot {
    #[doc(hidden)]
    pub const fn new(key: &'static std::thread::LocalKey<RefCell<Option<NativeError>>>) -> Self {
        NativeErrorSlot(key)
    }

    pub fn set(&self, code: i64, message: impl Into<String>) {
        let error = NativeError {
            code,
            message: message.into(),
        };
        self.0.with(|slot| *slot.borrow_mut() = Some(error));
    }

    pub fn get(&self) -> Option<NativeError> {
        self.0.with(|slot| slot.borrow().clone())
    }

    pub fn clear(&self) {
        self.0.with(|slot| *slot.borrow_mut() = None);
    }
}

/// Declares a static [`NativeErrorSlot`] backed by its own thread-local.
#[macro_export]
macro_rules! native_error_slot {
    ($vis:vis static $name:ident) => {
        $vis static $name: $crate::native_error::NativeErrorSlot = {
            ::std::thread_local! {
                static SLOT: ::std::cell::RefCell<Option<$crate::native_error::NativeError>> =
                    const { ::std::cell::RefCell::new(None) };
            }
            $crate::native_error::NativeErrorSlot::new(&SLOT)
        };
    };
}
