//! Address and size newtypes.
//!
//! Mirrors `abyss::addressing`'s `Pa`/`Va` newtypes: plain wrappers around
//! a `usize` with validated constructors and the handful of arithmetic
//! helpers their callers actually need, rather than a generic numeric
//! wrapper crate.

use std::fmt;
use std::ops::{Add, Sub};

/// Bytes per page. Every region tracked by the subsystem crates is a whole
/// number of pages.
pub const PAGE_SIZE: usize = 0x1000;
/// `log2(PAGE_SIZE)`, used to split an address into page number + offset.
pub const PAGE_SHIFT: usize = 12;
/// Mask of the in-page offset bits.
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// A user-space virtual address. Always page-aligned when it denotes the
/// base of a page; arithmetic helpers here do not enforce that by
/// themselves, callers align explicitly where it matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Va(pub usize);

impl Va {
    pub const fn new(addr: usize) -> Self {
        Va(addr)
    }

    /// Rounds down to the start of the containing page.
    pub const fn page_base(self) -> Va {
        Va(self.0 & !PAGE_MASK)
    }

    /// Offset within the containing page.
    pub const fn page_offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    pub fn checked_add(self, bytes: usize) -> Option<Va> {
        self.0.checked_add(bytes).map(Va)
    }
}

impl Add<usize> for Va {
    type Output = Va;
    fn add(self, rhs: usize) -> Va {
        Va(self.0 + rhs)
    }
}

impl Sub<Va> for Va {
    type Output = usize;
    fn sub(self, rhs: Va) -> usize {
        self.0 - rhs.0
    }
}

impl fmt::Display for Va {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A disk sector number, 512 bytes each, matching `keos::fs::Sector`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Sector(pub u64);

pub const SECTOR_SIZE: usize = 512;

impl Sector {
    pub const fn new(n: u64) -> Self {
        Sector(n)
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sector#{}", self.0)
    }
}
