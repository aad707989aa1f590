//! System call interface
//!
//! Vector 0x80 is a ring-3-accessible trap gate. The calling convention is
//! register based: `EAX` = syscall number, `EBX..EDI` = arguments 1..5,
//! return value in `EAX`. Unknown numbers and empty table slots return
//! `(u32)-1`; there is no errno, errors are the single sentinel.

pub mod process;

use crate::kernel::Kernel;
use crate::mm::{PhysMemory, VirtAddr};
use crate::trap::{CpuState, TrapFrame, TrapOutcome};
use crate::error::{KernelError, KernelResult};

/// Syscall numbers.
pub const SYS_PRINTF: u32 = 1;
pub const SYS_FORK: u32 = 2;
pub const SYS_EXIT: u32 = 3;
pub const SYS_WAIT: u32 = 4;

/// Size of the dispatch table.
pub const MAX_SYSCALLS: usize = 32;

/// The error sentinel delivered to user mode in EAX.
pub const SYSCALL_ERROR: u32 = u32::MAX;

/// Arguments as read from the trap frame registers.
#[derive(Debug, Clone, Copy)]
pub struct SyscallArgs {
    pub num: u32,
    pub arg1: u32,
    pub arg2: u32,
    pub arg3: u32,
    pub arg4: u32,
    pub arg5: u32,
}

impl SyscallArgs {
    pub fn from_cpu(cpu: &CpuState) -> Self {
        Self {
            num: cpu.eax,
            arg1: cpu.ebx,
            arg2: cpu.ecx,
            arg3: cpu.edx,
            arg4: cpu.esi,
            arg5: cpu.edi,
        }
    }
}

/// What a syscall produced.
pub enum SyscallResult {
    /// Store the value in the caller's EAX and `iret` back to it.
    Value(u32),
    /// The caller does not resume (exit): hand the outcome to the stub.
    NoReturn(TrapOutcome),
}

/// A syscall implementation. The trap frame is available read-only so
/// `fork` can duplicate the caller's live register state.
pub type SyscallHandler =
    fn(&mut Kernel, &mut dyn PhysMemory, &SyscallArgs, &TrapFrame) -> SyscallResult;

/// Bounded dispatch table.
pub struct SyscallTable {
    handlers: [Option<SyscallHandler>; MAX_SYSCALLS],
}

impl SyscallTable {
    pub const fn new() -> Self {
        Self {
            handlers: [None; MAX_SYSCALLS],
        }
    }

    pub fn register(&mut self, num: u32, handler: SyscallHandler) -> KernelResult<()> {
        if num as usize >= MAX_SYSCALLS {
            log::error!("Cannot register syscall {}: out of range", num);
            return Err(KernelError::InvalidVector { vector: num });
        }
        self.handlers[num as usize] = Some(handler);
        Ok(())
    }

    pub fn get(&self, num: u32) -> Option<SyscallHandler> {
        self.handlers.get(num as usize).copied().flatten()
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Trap handler for vector 0x80.
pub fn syscall_interrupt_handler(
    kernel: &mut Kernel,
    mem: &mut dyn PhysMemory,
    frame: &mut TrapFrame,
    _fault_addr: VirtAddr,
) -> TrapOutcome {
    let args = SyscallArgs::from_cpu(&frame.cpu);

    log::debug!(
        "Syscall {} received from user mode (args: {:#x}, {:#x}, {:#x}, {:#x}, {:#x})",
        args.num,
        args.arg1,
        args.arg2,
        args.arg3,
        args.arg4,
        args.arg5,
    );

    let handler = match kernel.syscalls.get(args.num) {
        Some(handler) => handler,
        None => {
            log::error!("Invalid syscall: {}", args.num);
            frame.cpu.eax = SYSCALL_ERROR;
            return TrapOutcome::Continue;
        }
    };

    match handler(kernel, mem, &args, frame) {
        SyscallResult::Value(value) => {
            log::debug!("Syscall {} returning result: {:#x}", args.num, value);
            frame.cpu.eax = value;
            TrapOutcome::Continue
        }
        SyscallResult::NoReturn(outcome) => outcome,
    }
}
