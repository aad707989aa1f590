//! Filesystem layer
//!
//! Only the boot-time initrd for now: a read-only archive mounted from a
//! multiboot module.

pub mod initrd;

pub use initrd::Initrd;
