//! Process control block
//!
//! PCBs live in a fixed slab ([`crate::process::table::ProcessTable`]) and
//! are referenced by slab index everywhere; a FREE slot simply has no
//! identity (`pid == 0`). Each PCB embeds its own kernel stack, adopted via
//! TSS `esp0` whenever the process is scheduled.

use core::fmt;

use crate::mm::{PageDirectory, PhysAddr};
use crate::trap::{CpuState, StackState};

/// Number of PCB slots in the fixed table.
pub const MAX_PROCESSES: usize = 64;

/// Size of the per-process kernel stack embedded in the PCB.
pub const KERNEL_STACK_SIZE: usize = 4096;

/// Fresh kernel stacks are filled with this byte; a stack dump full of
/// `0xCD` reads as "never used".
pub const KSTACK_FILL: u8 = 0xCD;

/// Segment selectors fixed by the GDT layout.
pub const KERNEL_CS_SELECTOR: u32 = 0x08;
pub const KERNEL_DS_SELECTOR: u32 = 0x10;
/// Ring-3 selectors carry RPL 3 in the low bits.
pub const USER_CS_SELECTOR: u32 = 0x1B;
pub const USER_DS_SELECTOR: u32 = 0x23;
pub const TSS_SELECTOR: u32 = 0x28;

/// EFLAGS for freshly created contexts: IF set, reserved bit 1 set.
pub const USER_EFLAGS: u32 = 0x202;
pub const KERNEL_EFLAGS: u32 = 0x202;

/// Process identifier. Zero is never a live PID; it marks a FREE slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl Pid {
    pub const NONE: Pid = Pid(0);

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process lifecycle state.
///
/// ```text
/// Free --allocate--> Ready --schedule--> Running --preempt--> Ready
///                                            \--exit--> Terminated --wait--> Free
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Free,
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// Everything needed to resume a process: the general registers restored by
/// the context switch, the trap frame `iret` consumes, and the address
/// space root.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub regs: CpuState,
    pub frame: StackState,
    pub directory: PageDirectory,
}

impl Context {
    pub const fn zeroed() -> Self {
        Self {
            regs: CpuState {
                edi: 0,
                esi: 0,
                ebp: 0,
                edx: 0,
                ecx: 0,
                ebx: 0,
                eax: 0,
                esp: 0,
            },
            frame: StackState {
                eip: 0,
                cs: 0,
                eflags: 0,
                esp: 0,
                ss: 0,
            },
            directory: PageDirectory::from_cr3(PhysAddr::new(0)),
        }
    }
}

/// Per-process kernel stack, 16-byte aligned for the switch path.
#[repr(C, align(16))]
pub struct KernelStack(pub [u8; KERNEL_STACK_SIZE]);

impl KernelStack {
    pub const fn zeroed() -> Self {
        Self([0; KERNEL_STACK_SIZE])
    }

    /// Write a 32-bit word `depth` bytes below the stack top.
    pub fn write_word(&mut self, depth: usize, value: u32) {
        let at = KERNEL_STACK_SIZE - depth;
        self.0[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Read back a word `depth` bytes below the stack top.
    pub fn read_word(&self, depth: usize) -> u32 {
        let at = KERNEL_STACK_SIZE - depth;
        u32::from_le_bytes(self.0[at..at + 4].try_into().unwrap())
    }
}

/// Process control block.
pub struct Process {
    pub pid: Pid,
    pub parent_pid: Pid,
    pub state: ProcessState,
    pub context: Context,
    pub kstack: KernelStack,
    /// Bytes currently pushed on the kernel stack (the resume frame). The
    /// switch path derives the absolute ESP from the PCB address and this
    /// depth.
    pub kstack_depth: usize,
    /// Ready-queue link: index of the next PCB, by slab slot.
    pub next_ready: Option<usize>,
    pub exit_status: i32,
}

impl Process {
    pub const fn free() -> Self {
        Self {
            pid: Pid::NONE,
            parent_pid: Pid::NONE,
            state: ProcessState::Free,
            context: Context::zeroed(),
            kstack: KernelStack::zeroed(),
            kstack_depth: 0,
            next_ready: None,
            exit_status: 0,
        }
    }

    pub const fn is_free(&self) -> bool {
        self.pid.is_none()
    }
}
