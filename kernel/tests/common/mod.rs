//! Shared harness for the scenario tests: a few megabytes of simulated
//! physical memory, a booted kernel, and helpers for fabricating the trap
//! frames hardware would have pushed.

#![allow(dead_code)]

use onyx_kernel::kernel::Kernel;
use onyx_kernel::mm::{BufferMemory, KernelWindow, PhysAddr, PhysMemory, VirtAddr};
use onyx_kernel::process::pcb::{USER_CS_SELECTOR, USER_DS_SELECTOR, USER_EFLAGS};
use onyx_kernel::trap::{vector, CpuState, IdtInfo, StackState, TrapFrame};

/// Simulated RAM size. The frame allocator's first-fit scan stays well
/// below this as long as tests allocate a few hundred frames at most.
pub const RAM_BYTES: usize = 16 * 1024 * 1024;

/// Where tests place boot modules: far above anything the allocator will
/// hand out during a test run.
pub const MODULE_BASE: u32 = 0x0030_0000;

/// Where tests place the multiboot info structure.
pub const MBINFO_BASE: u32 = 0x0020_0000;

pub fn window() -> KernelWindow {
    KernelWindow {
        phys_start: PhysAddr::new(0x0010_0000),
        phys_end: PhysAddr::new(0x0014_2000),
        virt_start: VirtAddr::new(0xC010_0000),
        virt_end: VirtAddr::new(0xC014_2000),
    }
}

pub fn fresh_ram() -> std::vec::Vec<u8> {
    vec![0u8; RAM_BYTES]
}

pub fn boot_kernel(mem: &mut BufferMemory) -> Kernel {
    Kernel::new(mem, window()).expect("kernel init failed")
}

/// The frame the stubs would build for an `int 0x80` issued from ring 3.
pub fn syscall_frame(eip: u32, user_esp: u32, regs: CpuState) -> TrapFrame {
    TrapFrame {
        cpu: regs,
        info: IdtInfo {
            vector: vector::SYSCALL,
            error_code: 0,
        },
        stack: StackState {
            eip,
            cs: USER_CS_SELECTOR,
            eflags: USER_EFLAGS,
            esp: user_esp,
            ss: USER_DS_SELECTOR,
        },
    }
}

/// A ring-3 page-fault frame; `error_code` per the IA-32 PF convention.
pub fn page_fault_frame(eip: u32, error_code: u32) -> TrapFrame {
    TrapFrame {
        cpu: CpuState::default(),
        info: IdtInfo {
            vector: vector::PAGE_FAULT,
            error_code,
        },
        stack: StackState {
            eip,
            cs: USER_CS_SELECTOR,
            eflags: USER_EFLAGS,
            esp: 0xBFFF_F000,
            ss: USER_DS_SELECTOR,
        },
    }
}

/// A timer tick frame interrupting ring-3 execution at `eip`.
pub fn tick_frame(eip: u32, user_esp: u32, regs: CpuState) -> TrapFrame {
    TrapFrame {
        cpu: regs,
        info: IdtInfo {
            vector: vector::IRQ_PIT,
            error_code: 0,
        },
        stack: StackState {
            eip,
            cs: USER_CS_SELECTOR,
            eflags: USER_EFLAGS,
            esp: user_esp,
            ss: USER_DS_SELECTOR,
        },
    }
}

/// Registers with the syscall ABI loaded: number in EAX, args in
/// EBX/ECX/EDX/ESI/EDI.
pub fn syscall_regs(num: u32, arg1: u32) -> CpuState {
    CpuState {
        eax: num,
        ebx: arg1,
        ..CpuState::default()
    }
}

/// Serialize a minimal multiboot info block plus `modules` (start, end,
/// cmdline) into simulated memory.
pub fn write_multiboot_info(mem: &mut BufferMemory, modules: &[(u32, u32, u32)]) -> PhysAddr {
    use onyx_kernel::boot::MULTIBOOT_INFO_MODS;

    let info = PhysAddr::new(MBINFO_BASE);
    let list = PhysAddr::new(MBINFO_BASE + 0x100);

    mem.write_u32(info, MULTIBOOT_INFO_MODS);
    mem.write_u32(info.offset(20), modules.len() as u32);
    mem.write_u32(info.offset(24), list.as_u32());

    for (i, &(start, end, cmdline)) in modules.iter().enumerate() {
        let at = list.offset(i as u32 * 16);
        mem.write_u32(at, start);
        mem.write_u32(at.offset(4), end);
        mem.write_u32(at.offset(8), cmdline);
        mem.write_u32(at.offset(12), 0);
    }
    info
}
