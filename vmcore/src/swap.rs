//! Swap store (C2).
//!
//! Grounded directly on `original_source/vm/swap.c`: a disk carved into
//! fixed-size slots (`SECTORS_PER_SLOT` sectors each, one page), a global
//! bitmap of free slots, and a per-process table recording which slot
//! backs which virtual page. `swap_out`/`swap_in` there run under a global
//! swap lock for the bitmap and a per-process lock for the table, and gate
//! concurrent faulters on the same page behind the `SWAP_WAIT` medium and
//! a condition variable; this module keeps that structure.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace, warn};
use oscore::addressing::{Sector, Va};
use oscore::error::Result;
use oscore::sync::{ConditionVariable, SpinLock};

use crate::config::{PAGE_SIZE, SECTORS_PER_SLOT};
use crate::external::{BlockDevice, FrameTable, PageTableEntry, Pid};
use crate::medium::Medium;

/// Index of one fixed-size slot on the swap device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SwapSlotIndex(pub usize);

#[derive(Debug, Clone)]
struct SwapEntry {
    slot: SwapSlotIndex,
    /// The medium the page was in before it was written to swap. A
    /// successful [`SwapStore::read_in`] restores exactly this value
    /// rather than a bare `Medium::Memory`, so the page stays evictable
    /// afterwards (`system::VmSystem::origin_medium`).
    original_medium: Medium,
    /// `true` while a read-in for this entry is in flight; faulting
    /// threads for the same `(pid, va)` wait on [`SwapStore::condvar`]
    /// until this flips back to `false` (or the entry disappears).
    reading_in: bool,
}

struct SwapState {
    /// `true` at index `i` means slot `i` is occupied.
    bitmap: Vec<bool>,
    table: HashMap<(Pid, Va), SwapEntry>,
}

/// The swap store: a block device plus the bookkeeping to treat it as a
/// set of page-sized slots.
pub struct SwapStore {
    device: Arc<dyn BlockDevice>,
    slot_count: usize,
    state: SpinLock<SwapState>,
    condvar: ConditionVariable,
}

impl SwapStore {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let slot_count = (device.sector_count() as usize) / SECTORS_PER_SLOT;
        SwapStore {
            device,
            slot_count,
            state: SpinLock::new(SwapState {
                bitmap: vec![false; slot_count],
                table: HashMap::new(),
            }),
            condvar: ConditionVariable::new(),
        }
    }

    /// Number of page-sized slots the device can hold.
    pub fn capacity(&self) -> usize {
        self.slot_count
    }

    /// Writes `frame` out to a freshly allocated swap slot and flips the
    /// page-table entry's medium to [`Medium::Swap`], invalidating the
    /// mapping. Mirrors `swap_out` in `original_source/vm/swap.c`: find a
    /// free slot, record it in the process's table, write the sectors,
    /// then update the entry.
    ///
    /// Per `spec.md` §7, bitmap exhaustion and a hash collision on the
    /// per-process table are both resource-exhaustion / invariant-violation
    /// conditions, not recoverable errors: both panic rather than return
    /// `Err`. The only `Err` this can still return is a failing disk write.
    pub fn write_out(
        &self,
        pid: Pid,
        va: Va,
        frame: &[u8; PAGE_SIZE],
        original_medium: Medium,
        entry: &mut dyn PageTableEntry,
    ) -> Result<SwapSlotIndex> {
        let slot = {
            let mut state = self.state.lock();
            let index = state
                .bitmap
                .iter()
                .position(|&used| !used)
                .unwrap_or_else(|| panic!("swap store exhausted: no free slot for {:?}/{:?}", pid, va));
            state.bitmap[index] = true;
            if state
                .table
                .insert(
                    (pid, va),
                    SwapEntry {
                        slot: SwapSlotIndex(index),
                        original_medium,
                        reading_in: false,
                    },
                )
                .is_some()
            {
                panic!("swap: duplicate swap-table entry for {:?}/{:?}", pid, va);
            }
            SwapSlotIndex(index)
        };

        if let Err(e) = self.write_slot(slot, frame) {
            // Roll back the allocation; the page stays wherever it was.
            let mut state = self.state.lock();
            state.bitmap[slot.0] = false;
            state.table.remove(&(pid, va));
            return Err(e);
        }

        debug!("swap: wrote {:?}/{:?} to slot {}", pid, va, slot.0);
        entry.set_medium(Medium::Swap);
        entry.invalidate();
        Ok(slot)
    }

    /// Reads the page backing `(pid, va)` back from swap into `frame`,
    /// installs it as the resident page at `frame_addr`, and releases the
    /// slot. A second caller faulting on the same page while the read is
    /// already underway waits on the condition variable instead of
    /// starting a redundant read, matching the `SWAP_WAIT` handshake in
    /// `original_source/vm/swap.c`.
    ///
    /// Takes `frame_table` rather than an already-acquired
    /// [`PageTableEntry`] because the whole point of the wait is that a
    /// second faulter must be able to find its own brief access to the
    /// *same* entry while the first is still blocked in here — something
    /// an entry reference held for this call's entire lifetime would rule
    /// out. `spec.md` §4.2's steps acquire/release the page-table lock
    /// around the wait for the same reason: "Release the lock (so
    /// `frame_get_page` may itself evict)."
    pub fn read_in(
        &self,
        pid: Pid,
        va: Va,
        frame: &mut [u8; PAGE_SIZE],
        frame_table: &dyn FrameTable,
    ) -> Result<()> {
        let mut waited = false;
        let slot = loop {
            let mut state = self.state.lock();
            match state.table.get(&(pid, va)) {
                // Per `spec.md` §7, "absence of expected entry on read-in is
                // fatal" -- but only the *first* time through: if we get here
                // after having waited, the entry's disappearance means the
                // thread we were waiting on already finished the read-in for
                // us (it removes its entry once the read completes, a few
                // lines below), which is the intended hand-off, not a bug.
                None if waited => return Ok(()),
                None => panic!("swap: read_in found no swap entry for {:?}/{:?}", pid, va),
                Some(e) if e.reading_in => {
                    drop(state);
                    state = self.condvar.wait_while(&self.state, |s| {
                        s.table.get(&(pid, va)).map(|e| e.reading_in).unwrap_or(false)
                    });
                    // Another thread may have completed the read-in for us
                    // while we waited; loop to re-check whether there is
                    // still work to do.
                    waited = true;
                    drop(state);
                    continue;
                }
                Some(e) => {
                    let slot = e.slot;
                    state.table.get_mut(&(pid, va)).unwrap().reading_in = true;
                    break slot;
                }
            }
        };
        frame_table.with_entry(pid, va, &mut |entry| entry.set_medium(Medium::SwapWait));

        // Obtain a fresh physical frame before touching the swap-table lock
        // again (`spec.md` §4.2 step 3: "Obtain a pinned frame from the
        // frame allocator (may trigger eviction)" -- the §5 recursive-
        // eviction suspension point). The lock has to stay released here so
        // a concurrent evictor's own `write_out` can still acquire it.
        let physical = frame_table
            .allocate_frame()
            .unwrap_or_else(|| panic!("swap: read_in found no frame to install {:?}/{:?} into", pid, va));

        let read_result = self.read_slot(slot, frame);
        if read_result.is_ok() {
            frame_table.write_frame(physical, frame);
        }

        let mut state = self.state.lock();
        state.bitmap[slot.0] = false;
        let original_medium = state
            .table
            .remove(&(pid, va))
            .map(|e| e.original_medium)
            .unwrap_or(Medium::Stack);
        match read_result {
            Ok(()) => {
                // Resident pages carry their origin medium, not a bare
                // `Memory` tag (`system::VmSystem::origin_medium`) -- a page
                // swapped back in has to remain evictable, which means
                // `relocate` needs to see `Stack`/`Exec` here again, not
                // `Memory`. The slot this page occupied is already freed
                // above, so memory is now its only copy; mark it dirty
                // (`original_source/vm/swap.c:150-151`) so a second eviction
                // before anything else touches the page still writes it back
                // instead of silently dropping it.
                frame_table.with_entry(pid, va, &mut |entry: &mut dyn PageTableEntry| {
                    entry.install(physical);
                    entry.set_medium(original_medium);
                    entry.set_dirty();
                    entry.clear_accessed();
                });
                trace!("swap: read {:?}/{:?} back from slot {}", pid, va, slot.0);
            }
            Err(ref e) => {
                frame_table.free_frame(physical);
                warn!("swap: read of slot {} failed: {e}", slot.0);
                frame_table.with_entry(pid, va, &mut |entry| entry.set_medium(Medium::Error));
            }
        }
        self.condvar.broadcast(&state);
        drop(state);
        read_result
    }

    /// Drops every swap entry a process still owns without writing
    /// anything back, freeing their slots. Supplements `spec.md`'s prose
    /// ("abandon the write-back") with the concrete cleanup operation
    /// `original_source/vm/swap.c`'s `destroy_swap_table` performs on
    /// process exit.
    pub fn reclaim_process(&self, pid: Pid) {
        let mut state = self.state.lock();
        let dead: Vec<(Pid, Va)> = state
            .table
            .keys()
            .filter(|(p, _)| *p == pid)
            .cloned()
            .collect();
        for key in dead {
            if let Some(entry) = state.table.remove(&key) {
                state.bitmap[entry.slot.0] = false;
            }
        }
        self.condvar.broadcast(&state);
    }

    fn write_slot(&self, slot: SwapSlotIndex, frame: &[u8; PAGE_SIZE]) -> Result<()> {
        for i in 0..SECTORS_PER_SLOT {
            let sector = Sector::new((slot.0 * SECTORS_PER_SLOT + i) as u64);
            let mut buf = [0u8; 512];
            buf.copy_from_slice(&frame[i * 512..(i + 1) * 512]);
            self.device.write_sector(sector, &buf)?;
        }
        Ok(())
    }

    fn read_slot(&self, slot: SwapSlotIndex, frame: &mut [u8; PAGE_SIZE]) -> Result<()> {
        for i in 0..SECTORS_PER_SLOT {
            let sector = Sector::new((slot.0 * SECTORS_PER_SLOT + i) as u64);
            let mut buf = [0u8; 512];
            self.device.read_sector(sector, &mut buf)?;
            frame[i * 512..(i + 1) * 512].copy_from_slice(&buf);
        }
        Ok(())
    }
}
