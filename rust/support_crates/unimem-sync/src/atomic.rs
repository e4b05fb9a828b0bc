//! Acquire/release helpers over 64-bit words and bit scans.
//!
//! Ordering applies to the word operated on only: a release store is visible,
//! together with everything sequenced before it, to a thread whose acquire load
//! observes the stored value. Nothing is promised across different words.

use std::sync::atomic::{AtomicU64, Ordering};

#[inline]
pub fn atomic_load_acquire(word: &AtomicU64) -> u64 {
    word.load(Ordering::Acquire)
}

#[inline]
pub fn atomic_store_release(word: &AtomicU64, value: u64) {
    word.store(value, Ordering::Release);
}

/// Adds one to `word` and returns the new value.
#[inline]
pub fn atomic_increment(word: &AtomicU64) -> u64 {
    word.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
}

/// Subtracts one from `word` and returns the new value.
#[inline]
pub fn atomic_decrement(word: &AtomicU64) -> u64 {
    word.fetch_sub(1, Ordering::AcqRel).wrapping_sub(1)
}

/// Adds `value` to `word` and returns the previous value.
#[inline]
pub fn fetch_and_add(word: &AtomicU64, value: u64) -> u64 {
    word.fetch_add(value, Ordering::AcqRel)
}

/// Subtracts `value` from `word` and returns the previous value.
#[inline]
pub fn fetch_and_sub(word: &AtomicU64, value: u64) -> u64 {
    word.fetch_sub(value, Ordering::AcqRel)
}

/// Index of the least significant set bit.
///
/// `value` must be non-zero; the result for zero is meaningless (checked in
/// debug builds only).
#[inline]
pub fn lowest_set_bit_index(value: u64) -> u8 {
    debug_assert_ne!(value, 0, "lowest_set_bit_index(0)");
    value.trailing_zeros() as u8
}

/// Index of the most significant set bit.
///
/// `value` must be non-zero; the result for zero is meaningless (checked in
/// debug builds only).
#[inline]
pub fn highest_set_bit_index(value: u64) -> u8 {
    debug_assert_ne!(value, 0, "highest_set_bit_index(0)");
    (63 - value.leading_zeros()) as u8
}
