//! Compile-time configuration constants.
//!
//! Collected in one place the way `abyss::addressing` collects
//! `PAGE_SIZE`/`PAGE_SHIFT`/`PAGE_MASK` beside the code that consumes them.

pub use oscore::addressing::{PAGE_SIZE, SECTOR_SIZE};

/// Sectors making up one swap slot: one page is `PAGE_SIZE / SECTOR_SIZE`
/// sectors, matching `original_source/vm/swap.c`'s `SECTORS_PER_PAGE`.
pub const SECTORS_PER_SLOT: usize = PAGE_SIZE / SECTOR_SIZE;

/// Longest directory-entry name, not counting the terminator, matching
/// `original_source/filesys/filesys.h`'s `NAME_MAX`.
pub const NAME_MAX: usize = 14;

/// Default gap, in frame-table slots, the clear hand keeps ahead of the
/// evict hand when a caller does not pick an explicit value. `spec.md` §9
/// Open Question 1 leaves the exact pacing unspecified beyond "a small
/// positive gap"; `frame_count / 2` is the value this crate standardizes
/// on (see `DESIGN.md`).
pub fn default_clock_threshold(frame_count: usize) -> usize {
    (frame_count / 2).max(1)
}
