//! Kernel entry, trap entry and the context switch
//!
//! The multiboot loader stub calls [`kinit`] with paging already enabled
//! and the kernel running in the higher half. All mutable kernel state
//! sits in the `KERNEL` cell; the lock is only ever taken with interrupts
//! effectively excluded and is explicitly released before any switch that
//! does not return.

use core::arch::asm;

use spin::{Mutex, MutexGuard};

use super::{gdt, halt_loop, idle_loop, interrupts, pic, read_cr2};
use crate::boot;
use crate::kernel::Kernel;
use crate::mm::phys::DirectMemory;
use crate::mm::{KernelWindow, PhysAddr, VirtAddr};
use crate::process::pcb::KERNEL_STACK_SIZE;
use crate::process::schedule;
use crate::trap::{vector, CpuState, TrapFrame, TrapOutcome};

static KERNEL: Mutex<Option<Kernel>> = Mutex::new(None);

/// Kernel placement as computed by the boot glue.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct RawMemInfo {
    pub phys_start: u32,
    pub phys_end: u32,
    pub virt_start: u32,
    pub virt_end: u32,
}

impl RawMemInfo {
    fn window(&self) -> KernelWindow {
        KernelWindow {
            phys_start: PhysAddr::new(self.phys_start),
            phys_end: PhysAddr::new(self.phys_end),
            virt_start: VirtAddr::new(self.virt_start),
            virt_end: VirtAddr::new(self.virt_end),
        }
    }
}

/// Rust-side kernel main, called from the loader stub.
///
/// # Safety
///
/// `meminfo` must point to a valid [`RawMemInfo`] and `mbinfo` to the
/// physical multiboot info structure.
#[no_mangle]
pub unsafe extern "C" fn kinit(mbinfo: u32, magic: u32, meminfo: *const RawMemInfo) -> ! {
    crate::logger::init();

    gdt::init();
    pic::init();
    super::idt::init();
    super::pit::init();

    // SAFETY: contract of kinit.
    let window = unsafe { (*meminfo).window() };
    // SAFETY: the window describes the live direct mapping and nothing
    // else accesses physical memory through raw aliases.
    let mut mem = unsafe { DirectMemory::new(window) };

    let kernel = match Kernel::new(&mut mem, window) {
        Ok(kernel) => kernel,
        Err(e) => {
            log::error!("Kernel init failed: {}", e);
            halt_loop();
        }
    };
    *KERNEL.lock() = Some(kernel);

    {
        let mut guard = KERNEL.lock();
        let kernel = guard.as_mut().expect("kernel cell just filled");
        if let Err(e) = boot::kmain(kernel, &mut mem, magic, PhysAddr::new(mbinfo)) {
            log::error!("Boot failed: {}", e);
            halt_loop();
        }
    }

    interrupts::enable();
    log::info!("Kernel initialized successfully");

    let mut guard = KERNEL.lock();
    if let Some(slot) = schedule(guard.as_mut().expect("kernel cell filled")) {
        enter_process(guard, slot);
    }
    drop(guard);

    log::info!("No process to schedule, halting...");
    idle_loop();
}

/// Ring-0 landing point for kernel processes whose entry function returns.
#[no_mangle]
pub extern "C" fn kernel_idle() -> ! {
    idle_loop();
}

/// Called by `trap_common` with a pointer to the frame it built on the
/// current kernel stack. Returning resumes the interrupted context; the
/// other outcomes leave through a switch or a halt.
#[no_mangle]
pub extern "C" fn trap_entry(frame: *mut TrapFrame) {
    // SAFETY: the stub passes the frame it just materialised on this stack.
    let frame = unsafe { &mut *frame };

    let fault_addr = if frame.info.vector == vector::PAGE_FAULT {
        read_cr2()
    } else {
        VirtAddr::new(0)
    };

    // EOI first so the next tick can arrive after the switch.
    if frame.info.vector == vector::IRQ_PIT {
        pic::acknowledge();
    }

    let mut guard = KERNEL.lock();
    let kernel = match guard.as_mut() {
        Some(kernel) => kernel,
        // Trap before the kernel cell is populated: nothing to do.
        None => return,
    };

    // SAFETY: same direct-map window the boot path used.
    let mut mem = unsafe { DirectMemory::new(kernel.window) };
    match kernel.handle_trap(&mut mem, frame, fault_addr) {
        TrapOutcome::Continue => {}
        TrapOutcome::Switch(slot) => enter_process(guard, slot),
        TrapOutcome::Idle => {
            drop(guard);
            idle_loop();
        }
        TrapOutcome::Halt => {
            interrupts::disable();
            halt_loop();
        }
    }
}

/// Switch to the process in `slot`: point TSS `esp0` at its kernel stack,
/// release the kernel lock, load its CR3 and registers and `iret` through
/// the frame prepared on its kernel stack.
fn enter_process(guard: MutexGuard<'_, Option<Kernel>>, slot: usize) -> ! {
    interrupts::disable();

    let (cr3, kernel_esp, stack_top, regs) = {
        let kernel = guard.as_ref().expect("kernel cell filled");
        let process = kernel.procs.process(slot);
        let base = process.kstack.0.as_ptr() as u32;
        let stack_top = base + KERNEL_STACK_SIZE as u32;
        (
            process.context.directory.cr3().as_u32(),
            stack_top - process.kstack_depth as u32,
            stack_top,
            &process.context.regs as *const CpuState,
        )
    };

    gdt::tss_set_kernel_stack(stack_top);

    // The lock must not stay held across the switch: this control flow
    // never comes back to release it.
    drop(guard);

    // SAFETY: `regs` points into the static kernel cell, `kernel_esp`
    // into the PCB's kernel stack holding a frame built by IretFrame, and
    // `cr3` is a live page directory sharing the kernel top half.
    unsafe { switch_to_process(cr3, kernel_esp, regs) }
}

/// Load CR3 and the saved registers, adopt the prepared kernel stack and
/// `iret` into the process.
///
/// # Safety
///
/// All three values must describe a consistent, armed process context.
unsafe fn switch_to_process(cr3: u32, kernel_esp: u32, regs: *const CpuState) -> ! {
    // SAFETY: contract of the function; EAX is reloaded last because it
    // carries the pointer.
    unsafe {
        asm!(
            "mov cr3, ecx",
            "mov esp, edx",
            "mov edi, [eax]",
            "mov esi, [eax + 4]",
            "mov ebp, [eax + 8]",
            "mov edx, [eax + 12]",
            "mov ecx, [eax + 16]",
            "mov ebx, [eax + 20]",
            "mov eax, [eax + 24]",
            "iretd",
            in("ecx") cr3,
            in("edx") kernel_esp,
            in("eax") regs,
            options(noreturn)
        )
    }
}
