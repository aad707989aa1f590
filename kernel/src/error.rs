//! Kernel error types
//!
//! One enum for every fallible kernel path. Fatal conditions (kernel-space
//! page faults, protection violations) are not errors: they surface as
//! [`crate::trap::TrapOutcome::Halt`] and never unwind across the trap
//! boundary.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Physical frame allocation failed.
    OutOfMemory {
        requested_frames: usize,
    },
    /// An address is outside the range the operation accepts.
    InvalidAddress {
        addr: u32,
    },
    /// A physical address does not fall inside the direct-mapped kernel
    /// window and therefore has no kernel-virtual alias.
    OutsideKernelWindow {
        addr: u32,
    },
    /// A fixed-size kernel table has no free slot left.
    ResourceExhausted {
        resource: &'static str,
    },
    /// An interrupt vector already has a handler installed.
    AlreadyRegistered {
        vector: u8,
    },
    /// A vector or syscall number is out of table range.
    InvalidVector {
        vector: u32,
    },
    ProcessNotFound {
        pid: u32,
    },
    /// The boot loader handed us something we cannot work with.
    BadBootData {
        what: &'static str,
    },
    /// An initrd image failed validation.
    BadImage {
        what: &'static str,
    },
    InvalidArgument {
        name: &'static str,
    },
}

/// Result type alias using KernelError
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory { requested_frames } => {
                write!(f, "out of physical memory ({} frame(s) requested)", requested_frames)
            }
            KernelError::InvalidAddress { addr } => write!(f, "invalid address {:#010x}", addr),
            KernelError::OutsideKernelWindow { addr } => {
                write!(f, "address {:#010x} outside the direct-mapped kernel window", addr)
            }
            KernelError::ResourceExhausted { resource } => write!(f, "{} exhausted", resource),
            KernelError::AlreadyRegistered { vector } => {
                write!(f, "handler already registered for vector {}", vector)
            }
            KernelError::InvalidVector { vector } => write!(f, "vector {} out of range", vector),
            KernelError::ProcessNotFound { pid } => write!(f, "no such process (pid {})", pid),
            KernelError::BadBootData { what } => write!(f, "bad boot data: {}", what),
            KernelError::BadImage { what } => write!(f, "bad image: {}", what),
            KernelError::InvalidArgument { name } => write!(f, "invalid argument: {}", name),
        }
    }
}
