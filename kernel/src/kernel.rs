//! The kernel state aggregate
//!
//! Every piece of mutable kernel state — frame bitmap, kernel page
//! directory, PCB table, handler registries — lives in one [`Kernel`]
//! value owned by the boot path and borrowed exclusively by each trap
//! entry. Single CPU plus interrupts-off-in-kernel means those borrows
//! never overlap, so no locking is needed inside.

use crate::error::KernelResult;
use crate::fs::Initrd;
use crate::mm::{
    FrameAllocator, KernelWindow, PageDirectory, PhysMemory, VirtAddr,
};
use crate::process::ProcessTable;
use crate::syscall::{self, SyscallTable};
use crate::trap::{self, vector, InterruptTable, TrapFrame, TrapOutcome};

pub struct Kernel {
    pub window: KernelWindow,
    pub frames: FrameAllocator,
    /// The master directory whose top-half entries every process shares.
    pub kernel_pd: PageDirectory,
    pub procs: ProcessTable,
    pub interrupts: InterruptTable,
    pub syscalls: SyscallTable,
    pub initrd: Option<Initrd>,
}

impl Kernel {
    /// Bring the core subsystems up in boot order: frame allocator, kernel
    /// page directory, process table, then the boot-time handler set.
    pub fn new(mem: &mut dyn PhysMemory, window: KernelWindow) -> KernelResult<Self> {
        let mut frames = FrameAllocator::init(&window);
        let kernel_pd = PageDirectory::new_kernel(mem, &mut frames)?;

        log::info!("Initializing process manager...");
        let procs = ProcessTable::new();
        log::info!(
            "Process manager initialized. Process table has {} slots.",
            crate::process::MAX_PROCESSES
        );

        let mut kernel = Self {
            window,
            frames,
            kernel_pd,
            procs,
            interrupts: InterruptTable::new(),
            syscalls: SyscallTable::new(),
            initrd: None,
        };
        kernel.install_boot_handlers()?;
        Ok(kernel)
    }

    /// One-shot registration of the boot handler set. A second attempt at
    /// any of these vectors is a hard error by design.
    fn install_boot_handlers(&mut self) -> KernelResult<()> {
        self.interrupts
            .register(vector::PAGE_FAULT, crate::mm::page_fault_handler)?;
        self.interrupts.register(
            vector::GENERAL_PROTECTION_FAULT,
            trap::general_protection_fault_handler,
        )?;
        self.interrupts
            .register(vector::IRQ_PIT, crate::timer::tick_handler)?;
        self.interrupts
            .register(vector::SYSCALL, syscall::syscall_interrupt_handler)?;

        self.syscalls
            .register(syscall::SYS_PRINTF, syscall::process::sys_printf)?;
        self.syscalls
            .register(syscall::SYS_FORK, syscall::process::sys_fork)?;
        self.syscalls
            .register(syscall::SYS_EXIT, syscall::process::sys_exit)?;
        self.syscalls
            .register(syscall::SYS_WAIT, syscall::process::sys_wait)?;
        log::info!("Syscall interface initialized");
        Ok(())
    }

    /// Entry point from the low-level trap stubs.
    ///
    /// `fault_addr` carries CR2 (zero for non-page-fault vectors).
    pub fn handle_trap(
        &mut self,
        mem: &mut dyn PhysMemory,
        frame: &mut TrapFrame,
        fault_addr: VirtAddr,
    ) -> TrapOutcome {
        trap::dispatch(self, mem, frame, fault_addr)
    }
}
