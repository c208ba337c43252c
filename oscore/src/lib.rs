//! Ambient kernel-adjacent primitives shared by every subsystem crate.
//!
//! This crate plays the role the `keos` support crate plays for
//! `keos-projectN`: addressing newtypes, a shared error taxonomy, and
//! thin lock wrappers, none of which are specific to any one subsystem.

pub mod addressing;
pub mod error;
pub mod fs;
pub mod sync;

pub use error::KernelError;
