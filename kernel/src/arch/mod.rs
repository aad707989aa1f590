//! Architecture support
//!
//! Only 32-bit protected-mode x86. Everything here is hardware glue: port
//! I/O, descriptor tables, PIC/PIT programming, the trap entry stubs and
//! the context switch. None of it compiles on the host; the portable core
//! above it is what the test suite exercises.

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod x86;
