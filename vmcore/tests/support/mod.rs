//! In-memory stand-ins for the host-kernel collaborators `vmcore` treats
//! as external: a RAM-backed block device, a toy frame table, a process
//! registry, and a toy filesystem. None of these ship in the library --
//! they exist only so the scenarios in `scenarios.rs` can drive real
//! `VmSystem` code without a real kernel underneath it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use oscore::addressing::{Sector, Va};
use oscore::error::{KernelError, Result};
use oscore::fs::InodeId;

use vmcore::config::PAGE_SIZE;
use vmcore::external::{
    BlockDevice, DirectoryFile, FileSystem, FrameTable, PageTableEntry, PhysicalFrame, Pid,
    ProcessRegistry, RegularFile,
};
use vmcore::medium::Medium;

pub struct RamDisk {
    sectors: Mutex<Vec<[u8; 512]>>,
}

impl RamDisk {
    pub fn new(sector_count: usize) -> Self {
        RamDisk {
            sectors: Mutex::new(vec![[0u8; 512]; sector_count]),
        }
    }
}

impl BlockDevice for RamDisk {
    fn sector_count(&self) -> u64 {
        self.sectors.lock().unwrap().len() as u64
    }
    fn read_sector(&self, sector: Sector, buf: &mut [u8; 512]) -> Result<()> {
        *buf = self.sectors.lock().unwrap()[sector.0 as usize];
        Ok(())
    }
    fn write_sector(&self, sector: Sector, buf: &[u8; 512]) -> Result<()> {
        self.sectors.lock().unwrap()[sector.0 as usize] = *buf;
        Ok(())
    }
}

#[derive(Clone, Copy)]
pub struct Entry {
    pub medium: Medium,
    pub accessed: bool,
    pub dirty: bool,
    pub frame: Option<u64>,
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            medium: Medium::Memory,
            accessed: false,
            dirty: false,
            frame: None,
        }
    }
}

pub struct MockEntryHandle<'a> {
    pub entry: &'a mut Entry,
}

impl PageTableEntry for MockEntryHandle<'_> {
    fn medium(&self) -> Medium {
        self.entry.medium
    }
    fn set_medium(&mut self, m: Medium) {
        self.entry.medium = m;
    }
    fn is_accessed(&self) -> bool {
        self.entry.accessed
    }
    fn clear_accessed(&mut self) {
        self.entry.accessed = false;
    }
    fn is_dirty(&self) -> bool {
        self.entry.dirty
    }
    fn clear_dirty(&mut self) {
        self.entry.dirty = false;
    }
    fn set_dirty(&mut self) {
        self.entry.dirty = true;
    }
    fn invalidate(&mut self) {
        self.entry.frame = None;
    }
    fn install(&mut self, frame: PhysicalFrame) {
        self.entry.frame = Some(frame.0);
        self.entry.medium = Medium::Memory;
    }
}

pub struct MockFrameTable {
    pub slots: Mutex<Vec<Option<(Pid, Va)>>>,
    pub entries: Mutex<HashMap<(Pid, Va), Entry>>,
    pub frames: Mutex<HashMap<u64, [u8; PAGE_SIZE]>>,
    pub next_frame: Mutex<u64>,
    pub pinned: Mutex<Vec<bool>>,
}

impl MockFrameTable {
    pub fn new(frame_count: usize) -> Self {
        MockFrameTable {
            slots: Mutex::new(vec![None; frame_count]),
            entries: Mutex::new(HashMap::new()),
            frames: Mutex::new(HashMap::new()),
            next_frame: Mutex::new(0),
            pinned: Mutex::new(vec![false; frame_count]),
        }
    }

    pub fn occupy(&self, slot: usize, pid: Pid, va: Va, medium: Medium, dirty: bool, accessed: bool) {
        let frame = {
            let mut n = self.next_frame.lock().unwrap();
            let f = *n;
            *n += 1;
            f
        };
        self.frames.lock().unwrap().insert(frame, [0u8; PAGE_SIZE]);
        self.slots.lock().unwrap()[slot] = Some((pid, va));
        self.pinned.lock().unwrap()[slot] = false;
        self.entries.lock().unwrap().insert(
            (pid, va),
            Entry {
                medium,
                accessed,
                dirty,
                frame: Some(frame),
            },
        );
    }
}

impl FrameTable for MockFrameTable {
    fn slot_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
    fn slot_at(&self, index: usize) -> Option<(Pid, Va)> {
        self.slots.lock().unwrap()[index]
    }
    fn with_entry(&self, pid: Pid, va: Va, f: &mut dyn FnMut(&mut dyn PageTableEntry)) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&(pid, va)) {
            Some(entry) => {
                let mut handle = MockEntryHandle { entry };
                f(&mut handle);
                true
            }
            None => false,
        }
    }
    fn allocate_frame(&self) -> Option<PhysicalFrame> {
        let mut n = self.next_frame.lock().unwrap();
        let f = *n;
        *n += 1;
        self.frames.lock().unwrap().insert(f, [0u8; PAGE_SIZE]);
        Some(PhysicalFrame(f))
    }
    fn free_frame(&self, frame: PhysicalFrame) {
        self.frames.lock().unwrap().remove(&frame.0);
    }
    fn frame_of(&self, pid: Pid, va: Va) -> Option<PhysicalFrame> {
        self.entries.lock().unwrap().get(&(pid, va)).and_then(|e| e.frame).map(PhysicalFrame)
    }
    fn read_frame(&self, frame: PhysicalFrame, buf: &mut [u8; PAGE_SIZE]) {
        if let Some(content) = self.frames.lock().unwrap().get(&frame.0) {
            *buf = *content;
        }
    }
    fn write_frame(&self, frame: PhysicalFrame, buf: &[u8; PAGE_SIZE]) {
        self.frames.lock().unwrap().insert(frame.0, *buf);
    }
    fn is_pinned(&self, index: usize) -> bool {
        self.pinned.lock().unwrap().get(index).copied().unwrap_or(false)
    }
    fn set_pinned(&self, index: usize, pinned: bool) {
        if let Some(slot) = self.pinned.lock().unwrap().get_mut(index) {
            *slot = pinned;
        }
    }
}

pub struct MockProcessRegistry {
    pub alive: Mutex<std::collections::HashSet<u64>>,
}

impl MockProcessRegistry {
    pub fn new(pids: &[u64]) -> Self {
        MockProcessRegistry {
            alive: Mutex::new(pids.iter().copied().collect()),
        }
    }
    pub fn kill(&self, pid: u64) {
        self.alive.lock().unwrap().remove(&pid);
    }
}

impl ProcessRegistry for MockProcessRegistry {
    fn with_process_lock(&self, pid: Pid, f: &mut dyn FnMut()) -> Option<()> {
        if self.alive.lock().unwrap().contains(&pid.0) {
            f();
            Some(())
        } else {
            None
        }
    }
    fn is_alive(&self, pid: Pid) -> bool {
        self.alive.lock().unwrap().contains(&pid.0)
    }
}

#[derive(Default)]
pub struct MemDirectoryFile {
    pub entries: Mutex<Vec<(bool, String, InodeId)>>,
    pub removed: Mutex<bool>,
}

impl DirectoryFile for MemDirectoryFile {
    fn inode(&self) -> InodeId {
        InodeId(Sector::new(0))
    }
    fn entry_count(&self) -> Result<usize> {
        Ok(self.entries.lock().unwrap().len())
    }
    fn read_entry(&self, index: usize) -> Result<Option<(bool, String, InodeId)>> {
        Ok(self.entries.lock().unwrap().get(index).cloned())
    }
    fn write_entry(&self, index: usize, in_use: bool, name: &str, inode: InodeId) -> Result<()> {
        self.entries.lock().unwrap()[index] = (in_use, name.to_string(), inode);
        Ok(())
    }
    fn append_entry(&self, name: &str, inode: InodeId) -> Result<usize> {
        let mut entries = self.entries.lock().unwrap();
        entries.push((true, name.to_string(), inode));
        Ok(entries.len() - 1)
    }
    fn remove(&self) -> Result<()> {
        *self.removed.lock().unwrap() = true;
        Ok(())
    }
}

pub struct MemFile {
    pub inode: InodeId,
    pub bytes: Mutex<Vec<u8>>,
}

impl RegularFile for MemFile {
    fn inode(&self) -> InodeId {
        self.inode
    }
    fn len(&self) -> Result<u64> {
        Ok(self.bytes.lock().unwrap().len() as u64)
    }
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.bytes.lock().unwrap();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut data = self.bytes.lock().unwrap();
        let offset = offset as usize;
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }
}

pub struct MemFs {
    pub dirs: Mutex<HashMap<InodeId, Arc<MemDirectoryFile>>>,
    pub root: InodeId,
}

impl MemFs {
    pub fn new() -> Self {
        let root = InodeId(Sector::new(1));
        let mut dirs = HashMap::new();
        dirs.insert(root, Arc::new(MemDirectoryFile::default()));
        MemFs {
            dirs: Mutex::new(dirs),
            root,
        }
    }

    pub fn new_directory(&self, sector: u64) -> InodeId {
        let id = InodeId(Sector::new(sector));
        self.dirs
            .lock()
            .unwrap()
            .insert(id, Arc::new(MemDirectoryFile::default()));
        id
    }
}

impl FileSystem for MemFs {
    fn root(&self) -> InodeId {
        self.root
    }
    fn open_directory(&self, inode: InodeId) -> Result<Arc<dyn DirectoryFile>> {
        self.dirs
            .lock()
            .unwrap()
            .get(&inode)
            .cloned()
            .map(|d| d as Arc<dyn DirectoryFile>)
            .ok_or(KernelError::NoSuchEntry)
    }
}
