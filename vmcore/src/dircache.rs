//! Canonicalized directory cache (C5).
//!
//! Grounded on `original_source/filesys/directory.c`. The original keeps a
//! global hash table `open_dirs` keyed by inode sector, so that two
//! different paths reaching the same directory always land on the same
//! in-memory object, and a per-directory open count so the object is
//! freed only once its last opener closes it. `dir_open`/`dir_close`
//! implement that with an explicit lock-then-lock-again dance to avoid a
//! close racing a concurrent open of the same directory.
//!
//! `spec.md` §9 calls out that this is better expressed in Rust as a
//! reference-counted handle whose drop releases the cache's reference —
//! which is exactly what `Arc`/`Weak` give for free: the global map holds
//! a [`Weak`], [`open`](DirCache::open) upgrades it when it can and
//! otherwise repopulates it, and the very last strong reference going out
//! of scope runs [`DirectoryData`]'s `Drop`, which removes the dead
//! `Weak` from the map. That single `Drop` impl is the "double-lock
//! dance" from the original, expressed as ordinary ownership instead of
//! manual refcounting.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use oscore::error::{KernelError, Result};
pub use oscore::fs::InodeId;
use oscore::sync::SpinLock;

use crate::config::NAME_MAX;
use crate::external::{DirectoryFile, FileSystem, Pid};

struct DirectoryData {
    inode: InodeId,
    backing: Arc<dyn DirectoryFile>,
    cache: Arc<DirCacheInner>,
    /// Serializes entry mutations (`add`/`remove`/rename) on this one
    /// directory; distinct from the cache-wide lock guarding the global
    /// map, matching the lock order in `spec.md` §5 (global cache lock
    /// before any one directory's own lock).
    entries_lock: SpinLock<()>,
}

impl Drop for DirectoryData {
    fn drop(&mut self) {
        let mut map = self.cache.open_dirs.lock();
        if let Some(weak) = map.get(&self.inode) {
            if weak.strong_count() == 0 {
                map.remove(&self.inode);
            }
        }
    }
}

/// A canonical, reference-counted handle to one open directory. Cloning a
/// `Directory` is cheap (an `Arc` clone) and always refers to the same
/// underlying directory as the handle it was cloned from, regardless of
/// which path was used to open it.
#[derive(Clone)]
pub struct Directory(Arc<DirectoryData>);

impl Directory {
    pub fn inode(&self) -> InodeId {
        self.0.inode
    }

    /// Looks up `name` among this directory's in-use entries.
    pub fn lookup(&self, name: &str) -> Result<Option<InodeId>> {
        let _guard = self.0.entries_lock.lock();
        let count = self.0.backing.entry_count()?;
        for index in 0..count {
            if let Some((true, entry_name, inode)) = self.0.backing.read_entry(index)? {
                if entry_name == name {
                    return Ok(Some(inode));
                }
            }
        }
        Ok(None)
    }

    /// Adds a new entry. Fails if `name` is empty, longer than
    /// [`NAME_MAX`], `.`/`..`, or already present, matching the validation
    /// `dir_add` performs in `original_source/filesys/directory.c`.
    pub fn add_entry(&self, name: &str, inode: InodeId) -> Result<()> {
        validate_component(name)?;
        let _guard = self.0.entries_lock.lock();
        let count = self.0.backing.entry_count()?;
        let mut free_slot = None;
        for index in 0..count {
            match self.0.backing.read_entry(index)? {
                Some((true, existing, _)) if existing == name => return Err(KernelError::FileExist),
                Some((false, _, _)) if free_slot.is_none() => free_slot = Some(index),
                None if free_slot.is_none() => free_slot = Some(index),
                _ => {}
            }
        }
        match free_slot {
            Some(index) => self.0.backing.write_entry(index, true, name, inode)?,
            None => {
                self.0.backing.append_entry(name, inode)?;
            }
        }
        Ok(())
    }

    /// Marks `name`'s slot unused. Does not check emptiness or cache
    /// occupancy — callers needing the full `remove` semantics with the
    /// busy/non-empty checks should go through [`DirCache::remove`].
    fn deactivate_entry(&self, name: &str) -> Result<()> {
        let _guard = self.0.entries_lock.lock();
        let count = self.0.backing.entry_count()?;
        for index in 0..count {
            if let Some((true, existing, inode)) = self.0.backing.read_entry(index)? {
                if existing == name {
                    self.0.backing.write_entry(index, false, existing.as_str(), inode)?;
                    return Ok(());
                }
            }
        }
        Err(KernelError::NoSuchEntry)
    }

    /// Lists this directory's in-use entries, including the synthetic `.`
    /// and `..` slots, matching `dir_readdir` in the original
    /// (`original_source/filesys/directory.c:539-558` yields every in-use
    /// entry with no exclusion) and `spec.md` §4.5's readdir description
    /// ("yields each live name ≤ NAME_MAX"). Callers wanting the listing
    /// without the reserved names (e.g. a shell's `ls`) filter them out
    /// themselves; the emptiness check below does its own independent scan
    /// rather than build on this one.
    pub fn list_entries(&self) -> Result<Vec<(String, InodeId)>> {
        let _guard = self.0.entries_lock.lock();
        let count = self.0.backing.entry_count()?;
        let mut out = Vec::new();
        for index in 0..count {
            if let Some((true, name, inode)) = self.0.backing.read_entry(index)? {
                out.push((name, inode));
            }
        }
        Ok(out)
    }

    /// `true` if no entry other than the synthetic `.`/`..` pair is
    /// in use. See `spec.md` §9 Open Question 2: `dir_file_count` in the
    /// original counts `.`/`..` as ordinary entries with no subtraction
    /// anywhere, which taken literally means no non-root directory could
    /// ever be removed. Excluding the two reserved names here is the
    /// resolution this crate adopts (recorded in `DESIGN.md`) -- it is
    /// specific to this check, not to readdir in general.
    pub fn is_empty(&self) -> Result<bool> {
        let _guard = self.0.entries_lock.lock();
        let count = self.0.backing.entry_count()?;
        for index in 0..count {
            if let Some((true, name, _inode)) = self.0.backing.read_entry(index)? {
                if name != "." && name != ".." {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Writes the two reserved entries a freshly created directory needs:
    /// `.` pointing at itself and `..` pointing at `parent`. Called once,
    /// right after the inode layer hands back the new, otherwise-empty
    /// directory's backing.
    pub fn populate_as_new(&self, parent: &Directory) -> Result<()> {
        self.0.backing.append_entry(".", self.inode())?;
        self.0.backing.append_entry("..", parent.inode())?;
        Ok(())
    }
}

fn validate_component(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > NAME_MAX || name == "." || name == ".." {
        return Err(KernelError::InvalidArgument);
    }
    Ok(())
}

struct DirCacheInner {
    open_dirs: SpinLock<HashMap<InodeId, Weak<DirectoryData>>>,
    cwd: SpinLock<HashMap<Pid, Directory>>,
}

/// The result of resolving a path down to its final component.
///
/// `leaf` is `Some(name)` when `parent` is the directory that would contain
/// `name` (an as-yet-unopened component the caller still has to look up,
/// create, or remove). It is `None` when the path has no further component
/// to resolve and `parent` itself *is* the fully resolved directory: either
/// a trailing `/` ("`../c/`" resolves `parent` all the way to `c` and
/// leaves nothing to look up — `spec.md` §4.5/§8 S5), or the path is the
/// literal root, matching `dir_open_path`'s root short-circuit, for which
/// `leaf` is instead the literal string `Some("/")` rather than `None`
/// (`spec.md` §4.5: "returns the root directory with `leaf = "/"`").
pub struct Resolved {
    pub parent: Directory,
    pub leaf: Option<String>,
}

/// The directory cache: one process-wide canonical map from inode to open
/// directory, plus each process's current working directory.
pub struct DirCache {
    inner: Arc<DirCacheInner>,
}

impl Default for DirCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DirCache {
    pub fn new() -> Self {
        DirCache {
            inner: Arc::new(DirCacheInner {
                open_dirs: SpinLock::new(HashMap::new()),
                cwd: SpinLock::new(HashMap::new()),
            }),
        }
    }

    /// Opens (or returns the already-open, canonical handle for) the
    /// directory at `inode`.
    pub fn open(&self, fs: &dyn FileSystem, inode: InodeId) -> Result<Directory> {
        {
            let map = self.inner.open_dirs.lock();
            if let Some(weak) = map.get(&inode) {
                if let Some(existing) = weak.upgrade() {
                    return Ok(Directory(existing));
                }
            }
        }
        let backing = fs.open_directory(inode)?;
        let data = Arc::new(DirectoryData {
            inode,
            backing,
            cache: self.inner.clone(),
            entries_lock: SpinLock::new(()),
        });
        let mut map = self.inner.open_dirs.lock();
        // Someone may have opened and inserted the same inode while we were
        // off calling into the inode layer; prefer their handle so every
        // caller still converges on one canonical object.
        if let Some(weak) = map.get(&inode) {
            if let Some(existing) = weak.upgrade() {
                return Ok(Directory(existing));
            }
        }
        map.insert(inode, Arc::downgrade(&data));
        Ok(Directory(data))
    }

    pub fn root(&self, fs: &dyn FileSystem) -> Result<Directory> {
        self.open(fs, fs.root())
    }

    /// Returns `pid`'s current working directory, defaulting to the root
    /// the first time it is queried.
    pub fn cwd(&self, fs: &dyn FileSystem, pid: Pid) -> Result<Directory> {
        if let Some(dir) = self.inner.cwd.lock().get(&pid) {
            return Ok(dir.clone());
        }
        let root = self.root(fs)?;
        self.inner.cwd.lock().insert(pid, root.clone());
        Ok(root)
    }

    pub fn set_cwd(&self, pid: Pid, dir: Directory) {
        self.inner.cwd.lock().insert(pid, dir);
    }

    pub fn reclaim_process(&self, pid: Pid) {
        self.inner.cwd.lock().remove(&pid);
    }

    /// Splits `path` on `/`, collapsing consecutive separators and
    /// dropping empty components, matching `dir_path_and_leaf`'s
    /// tokenizing in the original. Also reports whether `path` ends in a
    /// `/`, which (per `spec.md` §4.5) means the path names a directory
    /// with no further leaf to resolve, rather than being just one more
    /// separator to collapse away.
    fn split(path: &str) -> Result<(bool, bool, Vec<&str>)> {
        if path.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        let absolute = path.starts_with('/');
        let trailing_slash = path.ends_with('/');
        let mut components = Vec::new();
        for part in path.split('/') {
            if part.is_empty() {
                continue;
            }
            if part.len() > NAME_MAX {
                return Err(KernelError::InvalidArgument);
            }
            components.push(part);
        }
        Ok((absolute, trailing_slash, components))
    }

    /// Resolves `path` relative to `pid`'s current working directory
    /// (or the root, if `path` is absolute).
    ///
    /// Walking `.` keeps the current directory; walking `..` opens the
    /// entry named `..`, which every directory this cache creates carries
    /// by construction (see [`Directory::populate_as_new`]).
    ///
    /// Three cases, matching `spec.md` §4.5/§8 S5 exactly:
    /// - The path is empty of components after tokenizing (`"/"`, `"//"`)
    ///   — the literal-root short-circuit: `parent` is the root, `leaf` is
    ///   `Some("/")`.
    /// - The path ends in `/` (`"../c/"`) — every component, including the
    ///   last, is walked; `parent` is the fully resolved directory and
    ///   `leaf` is `None`: there is nothing left for the caller to look up.
    /// - Otherwise, every component but the last is walked and the last is
    ///   returned unopened as `leaf`, for the caller to look up, create, or
    ///   remove within `parent`.
    pub fn resolve(&self, fs: &dyn FileSystem, pid: Pid, path: &str) -> Result<Resolved> {
        let (absolute, trailing_slash, components) = Self::split(path)?;
        let mut current = if absolute {
            self.root(fs)?
        } else {
            self.cwd(fs, pid)?
        };

        if components.is_empty() {
            return Ok(Resolved {
                parent: current,
                leaf: Some("/".to_string()),
            });
        }

        if trailing_slash {
            for component in &components {
                current = self.step(fs, &current, component)?;
            }
            return Ok(Resolved {
                parent: current,
                leaf: None,
            });
        }

        for component in &components[..components.len() - 1] {
            current = self.step(fs, &current, component)?;
        }

        Ok(Resolved {
            parent: current,
            leaf: Some(components[components.len() - 1].to_string()),
        })
    }

    fn step(&self, fs: &dyn FileSystem, from: &Directory, component: &str) -> Result<Directory> {
        match component {
            "." => Ok(from.clone()),
            _ => {
                let inode = from.lookup(component)?.ok_or(KernelError::NoSuchEntry)?;
                self.open(fs, inode)
            }
        }
    }

    /// Removes `name` from `parent`, refusing if the name denotes `.`/`..`,
    /// does not exist, is a non-empty directory, or is a directory
    /// currently held open by someone other than this call. On success,
    /// requests removal of the target's backing inode
    /// (`original_source/filesys/directory.c:524`'s `inode_remove`), per
    /// `spec.md` §4.5 ("marks the slot `!in_use` and requests inode
    /// removal").
    pub fn remove(&self, fs: &dyn FileSystem, parent: &Directory, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return Err(KernelError::InvalidArgument);
        }
        let inode = parent.lookup(name)?.ok_or(KernelError::NoSuchEntry)?;
        let target = self.open(fs, inode)?;
        if !target.is_empty()? {
            return Err(KernelError::DirectoryNotEmpty);
        }
        if Arc::strong_count(&target.0) > 1 {
            return Err(KernelError::Busy);
        }
        parent.deactivate_entry(name)?;
        target.0.backing.remove()?;
        Ok(())
    }
}
