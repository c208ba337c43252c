//! The aggregate entry point, [`VmSystem`].
//!
//! `spec.md` §9 flags the original's scattering of `evict_hand`/`swap_table`/
//! `open_dirs` across independent global statics (`static size_t evict_hand`
//! in `vm/evict.c`, a free-standing `struct lock open_dirs_lock` in
//! `filesys/directory.c`, and so on) as something to re-express as one
//! explicit owned record instead. `VmSystem` is that record: one struct a
//! host kernel constructs once and threads through every syscall and
//! fault handler, instead of a constellation of file-scope statics.

use std::sync::Arc;

use log::warn;

use oscore::addressing::Va;
use oscore::error::{KernelError, Result};

use crate::config::PAGE_SIZE;
use crate::dircache::{DirCache, Directory};
use crate::eviction::EvictionEngine;
use crate::external::{
    BlockDevice, FileSystem, FrameTable, MapId, PageTableEntry, Pid, ProcessRegistry, RegularFile,
};
use crate::medium::Medium;
use crate::mmap::MmapManager;
use crate::swap::SwapStore;

/// Ties the clock eviction engine, the swap store, the memory-map manager
/// and the directory cache together into the one object a host kernel
/// holds for the lifetime of the system.
pub struct VmSystem {
    pub swap: SwapStore,
    pub mmap: MmapManager,
    pub eviction: EvictionEngine,
    pub dirs: DirCache,
}

impl VmSystem {
    pub fn new(swap_device: Arc<dyn BlockDevice>, frame_count: usize, clock_threshold: Option<usize>) -> Self {
        VmSystem {
            swap: SwapStore::new(swap_device),
            mmap: MmapManager::new(),
            eviction: EvictionEngine::new(frame_count, clock_threshold),
            dirs: DirCache::new(),
        }
    }

    /// Picks one victim frame and moves its content to the correct backing
    /// store, returning the now-free frame. This is the orchestration
    /// `original_source/vm/evict.c`'s `relocate_page` was attempting: the
    /// actual dispatch on medium and dirty bit, completed and corrected
    /// here (see `DESIGN.md` for what was broken in the original).
    ///
    /// If the owning process has already exited, the write-back is
    /// abandoned — the best-effort process lock (`spec.md` §5) reports the
    /// process is gone and this simply reclaims the frame without I/O.
    ///
    /// The slot [`EvictionEngine::next_victim`] chose stays pinned when
    /// this returns (`spec.md` §4.4: "leaving the frame pinned for the
    /// caller to finalize"): relocation only guarantees the *old* content
    /// is safe, not that a new tenant has been installed yet. The caller
    /// installing the new tenant at that frame is responsible for calling
    /// [`FrameTable::set_pinned`]`(slot, false)` once that install is
    /// complete, mirroring the external `unpin_frame_entry` contract of
    /// `spec.md` §6.
    pub fn evict_one(
        &self,
        frame_table: &dyn FrameTable,
        processes: &dyn ProcessRegistry,
    ) -> Option<crate::external::PhysicalFrame> {
        let slot = self.eviction.next_victim(frame_table)?;
        let (pid, va) = frame_table.slot_at(slot)?;
        let frame = frame_table.frame_of(pid, va)?;

        let mut content = [0u8; PAGE_SIZE];
        frame_table.read_frame(frame, &mut content);

        let process_alive = processes.is_alive(pid);
        let mut outcome = None;
        let found = frame_table.with_entry(pid, va, &mut |entry| {
            outcome = Some(self.relocate(pid, va, &content, process_alive, entry));
        });

        match (found, outcome) {
            (true, Some(Ok(()))) => {}
            (true, Some(Err(e))) => warn!("evict_one: write-back of {:?}/{:?} failed: {e}", pid, va),
            (true, None) | (false, _) => {
                // The mapping disappeared between slot_at and with_entry
                // (e.g. the process tore it down concurrently); nothing
                // left to write back.
            }
        }

        frame_table.free_frame(frame);
        Some(frame)
    }

    /// The medium-dispatch core of eviction. A resident dirty stack or
    /// exec page is written to swap; a resident dirty mmap page is written
    /// back to its file; a resident *clean* page of any of those three
    /// kinds simply reverts to its demand-paged origin with no I/O at all,
    /// matching the three-way split `relocate_page`'s comment block
    /// describes (even though its body never implements it).
    fn relocate(
        &self,
        pid: Pid,
        va: Va,
        content: &[u8; PAGE_SIZE],
        process_alive: bool,
        entry: &mut dyn PageTableEntry,
    ) -> Result<()> {
        let medium = entry.medium();
        debug_assert!(medium.is_resident(), "evicting a non-resident page");

        if !process_alive {
            // Best-effort process lock: the owner is gone, so there is
            // nothing left to write back to and no one left to fault back
            // in. Just mark the slot empty.
            entry.invalidate();
            entry.set_medium(Medium::Error);
            return Ok(());
        }

        let dirty = entry.is_dirty();
        let origin = self.origin_medium(entry);
        match (dirty, origin) {
            (true, Medium::Stack) | (true, Medium::Exec) => {
                self.swap.write_out(pid, va, content, origin, entry).map(|_| ())
            }
            (true, Medium::Mmap) => self.mmap.write_back_page(pid, va, content, true, entry),
            (false, Medium::Stack) => {
                // Never written: nothing to preserve, the page re-zeros on
                // the next fault.
                entry.invalidate();
                entry.set_medium(Medium::Stack);
                Ok(())
            }
            (false, Medium::Exec) => {
                entry.invalidate();
                entry.set_medium(Medium::Exec);
                Ok(())
            }
            (false, Medium::Mmap) => {
                entry.invalidate();
                entry.set_medium(Medium::Mmap);
                Ok(())
            }
            // `spec.md` §4.4: "any other medium with dirty=1 is a fatal
            // invariant violation" / "any other medium clean is a fatal
            // invariant violation". §7 classifies both as the same kind of
            // bug as a hash collision on a unique key: a programmer error in
            // the host kernel's PTE bookkeeping, not a recoverable I/O
            // condition, so this panics rather than returning `Err`.
            (dirty, other) => {
                panic!(
                    "evict_one: no valid relocation for {:?}/{:?}, dirty={}, origin={:?}",
                    pid, va, dirty, other
                );
            }
        }
    }

    /// Recovers which demand-paged origin a resident page came from.
    ///
    /// The *previous* medium (stack/exec/mmap) is not observable from a
    /// bare present bit once a page is installed, so a host kernel is
    /// expected to keep that one extra bit of provenance per resident page
    /// (the spare PTE bits the original C packs `medium_t` into have room
    /// for it). This crate exposes that requirement through
    /// [`PageTableEntry::medium`] returning the *origin* medium
    /// (`Stack`/`Exec`/`Mmap`) for a resident page rather than literally
    /// `Memory`; `Medium::Memory` itself is reserved for an entry a host
    /// kernel has not yet tagged with an origin (treated as an
    /// irrecoverable state here, see [`Medium::is_resident`]).
    fn origin_medium(&self, entry: &dyn PageTableEntry) -> Medium {
        entry.medium()
    }

    /// Services a page fault on a non-resident page by loading its content
    /// into `frame` and installing it, dispatching on the page's current
    /// medium: [`Medium::Swap`]/[`Medium::SwapWait`] go through the swap
    /// store, [`Medium::Mmap`]/[`Medium::MmapWait`] through the memory-map
    /// manager, [`Medium::Stack`] zero-fills, and [`Medium::Exec`] asks
    /// `exec_loader` to refill the page from the executable image.
    ///
    /// Takes `frame_table` rather than an already-acquired entry so the
    /// swap path can release access to the entry while it blocks on
    /// [`SwapStore::read_in`]'s condition variable (see that method's
    /// doc comment); the other three arms never block, but take the same
    /// seam for consistency and because they install the resident page's
    /// *origin* medium, never literally [`Medium::Memory`] (`spec.md` §3
    /// invariant 1, [`Medium::is_resident`]).
    pub fn handle_demand_fault(
        &self,
        pid: Pid,
        va: Va,
        frame: &mut [u8; PAGE_SIZE],
        frame_table: &dyn FrameTable,
        exec_loader: &mut dyn FnMut(Va, &mut [u8; PAGE_SIZE]) -> Result<()>,
    ) -> Result<()> {
        let mut medium = None;
        if !frame_table.with_entry(pid, va, &mut |entry| medium = Some(entry.medium())) {
            return Err(KernelError::NoSuchEntry);
        }

        match medium.expect("with_entry reported success without calling f") {
            Medium::Swap | Medium::SwapWait => self.swap.read_in(pid, va, frame, frame_table),
            Medium::Mmap | Medium::MmapWait => {
                self.mmap.load_page(pid, va, frame)?;
                frame_table.with_entry(pid, va, &mut |entry| {
                    entry.set_medium(Medium::Mmap);
                    entry.clear_dirty();
                    entry.clear_accessed();
                });
                Ok(())
            }
            Medium::Stack => {
                frame.fill(0);
                frame_table.with_entry(pid, va, &mut |entry| entry.set_medium(Medium::Stack));
                Ok(())
            }
            Medium::Exec => {
                exec_loader(va, frame)?;
                frame_table.with_entry(pid, va, &mut |entry| {
                    entry.set_medium(Medium::Exec);
                    entry.clear_dirty();
                });
                Ok(())
            }
            Medium::Memory => Err(KernelError::InvalidArgument),
            Medium::Error => Err(KernelError::IoError),
        }
    }

    /// Registers a file-backed mapping and marks its pages `Mmap` via
    /// `mark_page`, which the caller supplies per-page (this crate does
    /// not own the page table's address space layout).
    pub fn mmap_create(
        &self,
        pid: Pid,
        map_id: MapId,
        file: Arc<dyn RegularFile>,
        base: Va,
        length_in_bytes: usize,
    ) -> Result<()> {
        self.mmap.create_region(pid, map_id, file, base, length_in_bytes)
    }

    /// First touch of an EXEC-medium page that is a write, not a read.
    ///
    /// `spec.md` §9 Open Question 3 leaves this undefined in the original
    /// (no `original_source` file handles it at all: Pintos's own loader
    /// maps exec segments writable-and-private but never models the first
    /// write as a medium transition). The resolution this crate adopts:
    /// the page is copied into a fresh frame exactly as
    /// [`handle_demand_fault`](Self::handle_demand_fault) would do for a
    /// normal EXEC read fault, but the entry's medium is set to
    /// [`Medium::Stack`] instead of being left `Exec`-tagged, so that a
    /// subsequent eviction treats it as private, swap-backed data rather
    /// than re-reading (and silently losing the write to) the executable
    /// image. This gives exec pages copy-on-write-less private-write
    /// semantics without introducing actual COW sharing, which `spec.md`'s
    /// Non-goals rule out.
    pub fn handle_exec_first_write(&self, entry: &mut dyn PageTableEntry) {
        debug_assert_eq!(entry.medium(), Medium::Exec);
        entry.set_medium(Medium::Stack);
    }

    /// Tears down a mapping: `spec.md` §4.3 `save_all`. Walks every page of
    /// the region, writes back any resident dirty one, waits out any page
    /// already mid-write-back (`Medium::MmapWait`) instead of racing it,
    /// and invalidates every resident page's entry -- all before the
    /// bookkeeping itself is dropped, so a concurrent fault handler never
    /// observes a half-torn-down region. "Only then may the backing file
    /// descriptor's mmap counter be decremented and the file closed"
    /// (`spec.md` §4.3) is the caller's responsibility once this returns
    /// `Ok`: this crate does not own the file-descriptor table (`spec.md`
    /// §1).
    pub fn munmap(&self, pid: Pid, map_id: MapId, frame_table: &dyn FrameTable) -> Result<()> {
        let region = self
            .mmap
            .region_by_id(pid, map_id)
            .ok_or(KernelError::NoSuchEntry)?;

        for i in 0..region.page_count() {
            let page = region.base + i * PAGE_SIZE;
            loop {
                let mut medium = None;
                let mut dirty = false;
                let found = frame_table.with_entry(pid, page, &mut |entry| {
                    medium = Some(entry.medium());
                    dirty = entry.is_dirty();
                });
                if !found {
                    // Never resident, or already unmapped by a previous
                    // pass: nothing left to write back or invalidate.
                    break;
                }

                match medium.expect("with_entry reported success without calling f") {
                    Medium::MmapWait => {
                        // Someone else's write-back is already in flight;
                        // wait for it instead of writing the page twice,
                        // then re-check its medium.
                        self.mmap.wait_for_write_back(pid, page);
                        continue;
                    }
                    Medium::Mmap if dirty => {
                        let content = frame_table
                            .frame_of(pid, page)
                            .map(|frame| {
                                let mut buf = [0u8; PAGE_SIZE];
                                frame_table.read_frame(frame, &mut buf);
                                buf
                            })
                            .unwrap_or([0u8; PAGE_SIZE]);
                        let mut result = Ok(());
                        frame_table.with_entry(pid, page, &mut |entry| {
                            result = self.mmap.write_back_page(pid, page, &content, true, entry);
                        });
                        result?;
                        break;
                    }
                    Medium::Mmap => {
                        // Clean and resident: nothing to write, but the
                        // region is going away, so the mapping itself must
                        // still be torn down.
                        frame_table.with_entry(pid, page, &mut |entry| entry.invalidate());
                        break;
                    }
                    // Already non-resident (demand-fault entry) or in an
                    // unrelated medium (shouldn't happen for a page inside
                    // an mmap region, but nothing to do either way).
                    _ => break,
                }
            }
        }

        self.mmap.remove_region(pid, map_id)?;
        Ok(())
    }

    pub fn reclaim_process(&self, pid: Pid) {
        self.swap.reclaim_process(pid);
        self.mmap.reclaim_process(pid);
        self.dirs.reclaim_process(pid);
    }

    pub fn root_directory(&self, fs: &dyn FileSystem) -> Result<Directory> {
        self.dirs.root(fs)
    }
}
