//! Page-medium state machine (C1).
//!
//! Every user page has a *medium*: the place its content currently lives.
//! The medium is not part of any Rust runtime state inside this crate — it
//! is stored by the host kernel inside otherwise-unused page-table-entry
//! bits, exactly as `original_source/vm/evict.c` stores `medium_t` in
//! `PTE_AVL_*`. [`external::PageTableEntry`](crate::external::PageTableEntry)
//! is the seam this crate uses to read and write it.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Where a user page's content currently lives.
///
/// Three bits are enough (`original_source/vm/evict.c` packs this into
/// spare `PTE_AVL` bits), so the representation is `#[repr(u8)]` with a
/// fallible conversion from the raw field a real page-table entry stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Medium {
    /// Page is resident: the page-table entry maps to a live frame.
    Memory = 0,
    /// Page content lives in a swap slot; not mapped.
    Swap = 1,
    /// A read from swap into a frame is in flight; faulting threads must
    /// wait rather than start a second read.
    SwapWait = 2,
    /// Page is backed by a memory-mapped file region but not resident;
    /// on fault it is read in from the file.
    Mmap = 3,
    /// A write-back of this page to its backing file is in flight.
    MmapWait = 4,
    /// Page belongs to a growable stack and has never been written, or was
    /// evicted clean; on fault it is zero-filled.
    Stack = 5,
    /// Page is backed by the process's executable image and has never
    /// been written, or was evicted clean; on fault it is reloaded from
    /// the executable.
    Exec = 6,
    /// The page's backing operation failed irrecoverably (disk I/O error
    /// during write-back, for instance). Any further fault on it is fatal
    /// to the faulting process.
    Error = 7,
}

impl Medium {
    /// `true` for the two states a faulting thread must wait out rather
    /// than act on directly.
    pub const fn is_wait_state(self) -> bool {
        matches!(self, Medium::SwapWait | Medium::MmapWait)
    }

    /// `true` when the page is currently mapped to a live frame.
    ///
    /// A resident entry's medium tag is its *origin* (`Stack`/`Exec`/`Mmap`),
    /// not literally [`Medium::Memory`] -- that variant is reserved for an
    /// entry no host kernel has tagged with an origin yet (`system::VmSystem::origin_medium`).
    /// This matches invariant 1 of `spec.md` §3 verbatim: "present ⇒ medium
    /// ∈ {MEMORY, MMAP, STACK, EXEC}".
    pub const fn is_resident(self) -> bool {
        matches!(self, Medium::Memory | Medium::Mmap | Medium::Stack | Medium::Exec)
    }

    /// Whether `self -> next` is a legal transition for this state machine.
    ///
    /// Grounded in the dispatch inside `relocate_page`
    /// (`original_source/vm/evict.c`): a resident dirty stack/exec page
    /// moves to swap, a resident dirty mmap page moves to mmap-wait while
    /// it is written back, and a resident clean page simply reverts to
    /// its demand-paged origin (stack/exec/mmap) without touching the
    /// backing store at all.
    pub const fn can_transition_to(self, next: Medium) -> bool {
        use Medium::*;
        matches!(
            (self, next),
            (Memory, Swap)
                | (Memory, MmapWait)
                | (Memory, Stack)
                | (Memory, Exec)
                | (Memory, Mmap)
                | (Memory, Error)
                | (Swap, SwapWait)
                | (SwapWait, Memory)
                | (SwapWait, Error)
                | (MmapWait, Mmap)
                | (MmapWait, Memory)
                | (MmapWait, Error)
                | (Mmap, MmapWait)
                | (Mmap, Memory)
                | (Stack, Memory)
                | (Exec, Memory)
                | (_, Error)
        )
    }
}
