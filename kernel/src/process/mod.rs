//! Process management
//!
//! PCB slab, PID allocation, address-space construction from boot-module
//! images, and the round-robin scheduler driving ring-3 execution.

pub mod creation;
pub mod pcb;
pub mod scheduler;
pub mod table;

pub use creation::{create_kernel_process, create_process, IretFrame};
pub use pcb::{Context, KernelStack, Pid, Process, ProcessState, KERNEL_STACK_SIZE, MAX_PROCESSES};
pub use scheduler::{schedule, timer_tick};
pub use table::ProcessTable;
