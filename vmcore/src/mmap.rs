//! Memory-map manager (C3).
//!
//! Grounded on `original_source/vm/mmap.c`: a per-process list of mapped
//! regions (`{map_id, file, base, length}`), demand-paged in on first
//! touch and written back to the backing file on eviction or on explicit
//! teardown. Per the REDESIGN FLAG in `spec.md` §9, the original's
//! `mmap_wait_until_saved` busy-sleep loop is replaced by the same
//! condition-variable handshake C2 uses for `SWAP_WAIT`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, trace};
use oscore::addressing::Va;
use oscore::error::{KernelError, Result};
use oscore::fs::RegularFile;
use oscore::sync::{ConditionVariable, SpinLock};

use crate::config::PAGE_SIZE;
use crate::external::{MapId, PageTableEntry, Pid};
use crate::medium::Medium;

/// One mapped region: `length_in_bytes` bytes of `file`, starting at file
/// offset 0, mapped starting at virtual address `base`.
#[derive(Clone)]
pub struct MmapRegion {
    pub map_id: MapId,
    pub file: Arc<dyn RegularFile>,
    pub base: Va,
    pub length_in_bytes: usize,
}

impl MmapRegion {
    pub fn page_count(&self) -> usize {
        self.length_in_bytes.div_ceil(PAGE_SIZE)
    }

    pub fn contains(&self, va: Va) -> bool {
        let offset = va.0.wrapping_sub(self.base.0);
        va.0 >= self.base.0 && offset < self.length_in_bytes.div_ceil(PAGE_SIZE) * PAGE_SIZE
    }

    /// Byte offset into `file` that `va`'s page starts at.
    pub fn file_offset(&self, va: Va) -> u64 {
        (va.page_base().0 - self.base.0) as u64
    }

    /// Bytes of the final page that actually belong to the file (the tail
    /// of the last page past `length_in_bytes` is zero-filled, never
    /// written back).
    pub fn valid_len_at(&self, va: Va) -> usize {
        let offset = (va.page_base().0 - self.base.0) as usize;
        (self.length_in_bytes - offset).min(PAGE_SIZE)
    }
}

struct MmapState {
    regions: HashMap<Pid, Vec<MmapRegion>>,
    /// Pages currently being written back; a second caller asking to save
    /// the same page waits here instead of racing the writer.
    writing_back: HashSet<(Pid, Va)>,
}

pub struct MmapManager {
    state: SpinLock<MmapState>,
    condvar: ConditionVariable,
}

impl Default for MmapManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MmapManager {
    pub fn new() -> Self {
        MmapManager {
            state: SpinLock::new(MmapState {
                regions: HashMap::new(),
                writing_back: HashSet::new(),
            }),
            condvar: ConditionVariable::new(),
        }
    }

    /// Registers a new mapping. The caller is responsible for marking each
    /// covered page's medium as [`Medium::Mmap`] in the page table; this
    /// manager only tracks the region's bookkeeping.
    pub fn create_region(
        &self,
        pid: Pid,
        map_id: MapId,
        file: Arc<dyn RegularFile>,
        base: Va,
        length_in_bytes: usize,
    ) -> Result<()> {
        if length_in_bytes == 0 || !base.is_page_aligned() {
            return Err(KernelError::InvalidArgument);
        }
        let region = MmapRegion {
            map_id,
            file,
            base,
            length_in_bytes,
        };
        let mut state = self.state.lock();
        let regions = state.regions.entry(pid).or_default();
        if regions.iter().any(|r| r.map_id == map_id) {
            return Err(KernelError::FileExist);
        }
        regions.push(region);
        Ok(())
    }

    /// Finds the region (if any) of `pid` covering `va`.
    pub fn region_for(&self, pid: Pid, va: Va) -> Option<MmapRegion> {
        let state = self.state.lock();
        state
            .regions
            .get(&pid)
            .and_then(|rs| rs.iter().find(|r| r.contains(va)).cloned())
    }

    /// Finds `pid`'s region identified by `map_id`, the lookup
    /// [`system::VmSystem::munmap`](crate::system::VmSystem::munmap) needs
    /// before it knows which pages to walk.
    pub fn region_by_id(&self, pid: Pid, map_id: MapId) -> Option<MmapRegion> {
        let state = self.state.lock();
        state
            .regions
            .get(&pid)
            .and_then(|rs| rs.iter().find(|r| r.map_id == map_id).cloned())
    }

    /// Blocks the caller while `(pid, va)` has a write-back in flight,
    /// without starting one itself. Used by teardown
    /// ([`system::VmSystem::munmap`](crate::system::VmSystem::munmap)) for
    /// a page it finds already in [`Medium::MmapWait`]: `spec.md` §4.3
    /// `save_all` says to wait for such a page to reach `MMAP`, not to
    /// write it back a second time.
    pub fn wait_for_write_back(&self, pid: Pid, va: Va) {
        let _ = self
            .condvar
            .wait_while(&self.state, |s| s.writing_back.contains(&(pid, va)));
    }

    /// Writes a single resident, dirty page of a mapped region back to its
    /// file, handling the in-flight race the same way
    /// `original_source/vm/mmap.c`'s `mmap_save_all` does: whichever caller
    /// gets here first performs the write and the rest simply wait for it
    /// to finish rather than writing twice.
    pub fn write_back_page(
        &self,
        pid: Pid,
        va: Va,
        content: &[u8; PAGE_SIZE],
        make_non_resident: bool,
        entry: &mut dyn PageTableEntry,
    ) -> Result<()> {
        // `spec.md` §4.3/§7: the region may have been unmapped between the
        // fault handler's decision to evict this page and this call
        // actually running; that race is a transient-local condition, not
        // an error -- the caller whose `munmap` raced us already tore down
        // this page's mapping, so there is nothing left to write back to.
        let region = match self.region_for(pid, va) {
            Some(region) => region,
            None => {
                debug!("mmap: region for {:?}/{:?} vanished before write-back, abandoning", pid, va);
                return Ok(());
            }
        };

        {
            let mut state = self.state.lock();
            if state.writing_back.contains(&(pid, va)) {
                drop(state);
                let _ = self.condvar.wait_while(&self.state, |s| {
                    s.writing_back.contains(&(pid, va))
                });
                return Ok(());
            }
            state.writing_back.insert((pid, va));
            entry.set_medium(Medium::MmapWait);
        }

        let len = region.valid_len_at(va);
        let result = region.file.write_at(region.file_offset(va), &content[..len]);

        let mut state = self.state.lock();
        state.writing_back.remove(&(pid, va));
        match result {
            Ok(_) => {
                entry.clear_dirty();
                entry.set_medium(Medium::Mmap);
                if make_non_resident {
                    entry.invalidate();
                }
                trace!("mmap: wrote back {:?}/{:?}", pid, va);
            }
            Err(ref e) => {
                entry.set_medium(Medium::Error);
                debug!("mmap: write-back of {:?}/{:?} failed: {e}", pid, va);
            }
        }
        self.condvar.broadcast(&state);
        drop(state);
        result.map(|_| ())
    }

    /// Reads a page of a mapped region in, zero-filling any tail bytes
    /// past the file's length, matching the demand-paging half of
    /// `original_source/vm/mmap.c`.
    pub fn load_page(&self, pid: Pid, va: Va, frame: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let region = self.region_for(pid, va).ok_or(KernelError::NoSuchEntry)?;
        let len = region.valid_len_at(va);
        frame.fill(0);
        let read = region.file.read_at(region.file_offset(va), &mut frame[..len])?;
        if read < len {
            frame[read..len].fill(0);
        }
        Ok(())
    }

    /// Unregisters `map_id`. The caller must have already written back
    /// every dirty page of the region (typically via repeated calls to
    /// [`write_back_page`](Self::write_back_page)); this only drops the
    /// bookkeeping.
    pub fn remove_region(&self, pid: Pid, map_id: MapId) -> Result<MmapRegion> {
        let mut state = self.state.lock();
        let regions = state.regions.get_mut(&pid).ok_or(KernelError::NoSuchEntry)?;
        let index = regions
            .iter()
            .position(|r| r.map_id == map_id)
            .ok_or(KernelError::NoSuchEntry)?;
        Ok(regions.remove(index))
    }

    /// Drops every region a process still owns, without writing anything
    /// back — the process-exit path, mirroring how `destroy_swap_table`
    /// exists for C2.
    pub fn reclaim_process(&self, pid: Pid) {
        let mut state = self.state.lock();
        state.regions.remove(&pid);
    }
}
