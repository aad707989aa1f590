//! Trap pipeline
//!
//! Every IDT vector funnels through one low-level entry stub that pushes an
//! error code (zero when the CPU supplies none), the vector number and the
//! general-purpose registers, producing the contiguous [`TrapFrame`] layout
//! below, then calls [`dispatch`]. Handlers are registered once per vector;
//! re-registration is rejected so the page-fault, GPF and syscall handlers
//! installed at boot cannot be shadowed.
//!
//! Handlers communicate with the stub through a [`TrapOutcome`]: resume the
//! interrupted context, switch to another process, idle, or halt the
//! machine on a fatal fault.

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::mm::{PhysMemory, VirtAddr};

/// General-purpose registers in the order the entry stub pushes them.
/// The stub restores EAX (and the rest) from this block before `iret`, so a
/// handler stores a syscall return value by writing `eax` here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct CpuState {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub edx: u32,
    pub ecx: u32,
    pub ebx: u32,
    pub eax: u32,
    pub esp: u32,
}

/// Vector number and error code pushed by the entry stub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct IdtInfo {
    pub vector: u32,
    pub error_code: u32,
}

/// The hardware interrupt frame: what the CPU pushed on entry and what
/// `iret` consumes on the way out. `esp`/`ss` are only meaningful when the
/// trap crossed a privilege boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct StackState {
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

/// The three frames as they sit contiguously on the kernel stack at
/// dispatch time.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct TrapFrame {
    pub cpu: CpuState,
    pub info: IdtInfo,
    pub stack: StackState,
}

/// IDT vector numbers.
pub mod vector {
    pub const DIVIDE_BY_ZERO: u32 = 0;
    pub const DEBUG: u32 = 1;
    pub const NMI: u32 = 2;
    pub const BREAKPOINT: u32 = 3;
    pub const OVERFLOW: u32 = 4;
    pub const BOUND_RANGE_EXCEEDED: u32 = 5;
    pub const INVALID_OPCODE: u32 = 6;
    pub const DEVICE_NOT_AVAILABLE: u32 = 7;
    pub const DOUBLE_FAULT: u32 = 8;
    pub const INVALID_TSS: u32 = 10;
    pub const SEGMENT_NOT_PRESENT: u32 = 11;
    pub const STACK_SEGMENT_FAULT: u32 = 12;
    pub const GENERAL_PROTECTION_FAULT: u32 = 13;
    pub const PAGE_FAULT: u32 = 14;

    /// IRQ base after the PIC remap: IRQ0..15 -> 32..47.
    pub const IRQ_BASE: u32 = 32;
    pub const IRQ_PIT: u32 = IRQ_BASE;
    pub const IRQ_KEYBOARD: u32 = IRQ_BASE + 1;
    pub const IRQ_CASCADE: u32 = IRQ_BASE + 2;
    pub const IRQ_PRIMARY_ATA: u32 = IRQ_BASE + 14;

    /// Ring-3-accessible software interrupt for system calls.
    pub const SYSCALL: u32 = 0x80;

    pub const COUNT: usize = 256;
}

/// What the entry stub should do after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Restore the saved frame and `iret` back into the interrupted context.
    Continue,
    /// Context-switch to the process in the given PCB slot; the saved frame
    /// is abandoned.
    Switch(usize),
    /// No runnable process: enable interrupts and halt until the next tick.
    Idle,
    /// Fatal fault: log happened already, stop the machine.
    Halt,
}

/// A registered trap handler.
///
/// `fault_addr` carries CR2 and is only meaningful for the page-fault
/// vector; stubs pass zero elsewhere.
pub type TrapHandler =
    fn(&mut Kernel, &mut dyn PhysMemory, &mut TrapFrame, VirtAddr) -> TrapOutcome;

/// Per-vector handler registry. Registration is one-shot.
pub struct InterruptTable {
    handlers: [Option<TrapHandler>; vector::COUNT],
}

impl InterruptTable {
    pub const fn new() -> Self {
        Self {
            handlers: [None; vector::COUNT],
        }
    }

    /// Install `handler` for `vec`. Fails if the vector is out of range or
    /// already has a handler.
    pub fn register(&mut self, vec: u32, handler: TrapHandler) -> KernelResult<()> {
        let index = vec as usize;
        if index >= vector::COUNT {
            return Err(KernelError::InvalidVector { vector: vec });
        }
        if self.handlers[index].is_some() {
            return Err(KernelError::AlreadyRegistered { vector: vec as u8 });
        }
        self.handlers[index] = Some(handler);
        Ok(())
    }

    pub fn get(&self, vec: u32) -> Option<TrapHandler> {
        self.handlers.get(vec as usize).copied().flatten()
    }
}

impl Default for InterruptTable {
    fn default() -> Self {
        Self::new()
    }
}

/// C-level dispatcher called from every entry stub.
pub fn dispatch(
    kernel: &mut Kernel,
    mem: &mut dyn PhysMemory,
    frame: &mut TrapFrame,
    fault_addr: VirtAddr,
) -> TrapOutcome {
    match kernel.interrupts.get(frame.info.vector) {
        Some(handler) => handler(kernel, mem, frame, fault_addr),
        None => {
            log::error!(
                "Unhandled interrupt: {:#x}, eip: {:#x}, cs: {:#x}, eflags: {:#x}",
                frame.info.vector,
                frame.stack.eip,
                frame.stack.cs,
                frame.stack.eflags,
            );
            TrapOutcome::Continue
        }
    }
}

/// General protection faults have no recovery path: dump everything the
/// frame holds and stop.
pub fn general_protection_fault_handler(
    kernel: &mut Kernel,
    _mem: &mut dyn PhysMemory,
    frame: &mut TrapFrame,
    _fault_addr: VirtAddr,
) -> TrapOutcome {
    let info = frame.info;
    let stack = frame.stack;
    let cpu = frame.cpu;

    log::error!("General Protection Fault!");
    log::error!("Error code: {:#x}", info.error_code);
    log::error!(
        "EIP: {:#x}, CS: {:#x}, EFLAGS: {:#x}",
        stack.eip,
        stack.cs,
        stack.eflags
    );

    // ESP/SS were only pushed on a privilege change.
    if stack.cs & 0x3 != 0 {
        log::error!("ESP: {:#x}, SS: {:#x}", stack.esp, stack.ss);
    }

    log::error!(
        "Registers: EAX: {:#x}, EBX: {:#x}, ECX: {:#x}, EDX: {:#x}",
        cpu.eax,
        cpu.ebx,
        cpu.ecx,
        cpu.edx
    );
    log::error!(
        "           ESI: {:#x}, EDI: {:#x}, EBP: {:#x}, ESP: {:#x}",
        cpu.esi,
        cpu.edi,
        cpu.ebp,
        cpu.esp
    );

    if let Some(process) = kernel.procs.current_process() {
        log::error!("Current process: PID {}", process.pid);
    }

    if info.error_code != 0 {
        log::error!(
            "Selector: index {}, table {}, external: {}",
            (info.error_code >> 3) & 0x1FFF,
            if info.error_code & 0x2 != 0 { "IDT" } else { "GDT/LDT" },
            info.error_code & 0x1 != 0,
        );
    }

    log::error!("System halted due to GPF");
    TrapOutcome::Halt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop_handler(
        _: &mut Kernel,
        _: &mut dyn PhysMemory,
        _: &mut TrapFrame,
        _: VirtAddr,
    ) -> TrapOutcome {
        TrapOutcome::Continue
    }

    #[test]
    fn registration_is_one_shot() {
        let mut table = InterruptTable::new();
        table.register(vector::PAGE_FAULT, nop_handler).unwrap();
        assert_eq!(
            table.register(vector::PAGE_FAULT, nop_handler),
            Err(KernelError::AlreadyRegistered { vector: 14 })
        );
        assert!(table.get(vector::PAGE_FAULT).is_some());
    }

    #[test]
    fn out_of_range_vector_is_rejected() {
        let mut table = InterruptTable::new();
        assert_eq!(
            table.register(256, nop_handler),
            Err(KernelError::InvalidVector { vector: 256 })
        );
        assert!(table.get(512).is_none());
    }

    #[test]
    fn frame_layout_matches_the_stub_contract() {
        // The stub-side assembly depends on these exact offsets.
        assert_eq!(core::mem::size_of::<CpuState>(), 32);
        assert_eq!(core::mem::size_of::<IdtInfo>(), 8);
        assert_eq!(core::mem::size_of::<StackState>(), 20);
        assert_eq!(core::mem::size_of::<TrapFrame>(), 60);
        assert_eq!(core::mem::offset_of!(TrapFrame, info), 32);
        assert_eq!(core::mem::offset_of!(TrapFrame, stack), 40);
    }
}
