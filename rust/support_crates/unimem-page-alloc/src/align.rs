//! Power-of-two rounding helpers shared by the page mappers and the providers.

/// Rounds `n` up to the next multiple of `alignment`.
///
/// ```
/// use unimem_page_alloc::align::align_up;
///
/// assert_eq!(align_up(0, 4096), 0);
/// assert_eq!(align_up(100, 1024), 1024);
/// assert_eq!(align_up(4096, 4096), 4096);
/// ```
///
/// `alignment` must be a non-zero power of two (checked in debug builds).
#[inline]
pub fn align_up(n: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (n + alignment - 1) & !(alignment - 1)
}

/// Like [`align_up`], but returns `None` instead of overflowing.
#[inline]
pub fn checked_align_up(n: usize, alignment: usize) -> Option<usize> {
    debug_assert!(alignment.is_power_of_two());
    Some(n.checked_add(alignment - 1)? & !(alignment - 1))
}

/// Rounds `n` down to the previous multiple of `alignment`.
#[inline]
pub fn align_down(n: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    n & !(alignment - 1)
}

#[inline]
pub fn is_aligned(n: usize, alignment: usize) -> bool {
    debug_assert!(alignment.is_power_of_two());
    (n & (alignment - 1)) == 0
}
