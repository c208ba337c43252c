//! Virtual memory and directory subsystem.
//!
//! This crate implements the part of a small kernel that sits between the
//! page-fault handler and the disk: deciding which medium backs a given
//! user page, moving pages to and from swap or a memory-mapped file when
//! frames run short, running the clock hand that picks eviction victims,
//! and maintaining a canonicalized cache of open directories so that two
//! different paths to the same directory always resolve to the same
//! object.
//!
//! The block device driver, the inode layer, the frame allocator, the page
//! table, and the scheduler are all external collaborators: this crate
//! never implements them, only the trait contracts in [`external`] that a
//! host kernel (or the test harness in `tests/`) must satisfy.
//!
//! ## Project Outline
//! - [`medium`]: the per-page medium state machine (C1).
//! - [`swap`]: the swap store (C2).
//! - [`mmap`]: the memory-map manager (C3).
//! - [`eviction`]: the two-handed clock replacement engine (C4).
//! - [`dircache`]: the canonicalized directory cache (C5).
//! - [`external`]: seam traits implemented by the host kernel.
//! - [`system`]: [`VmSystem`], the struct tying the above together.

pub mod config;
pub mod dircache;
pub mod eviction;
pub mod external;
pub mod medium;
pub mod mmap;
pub mod swap;
pub mod system;

pub use config::*;
pub use medium::Medium;
pub use system::VmSystem;
