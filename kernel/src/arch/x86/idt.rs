//! Interrupt descriptor table and entry stubs
//!
//! 256 generated stubs push a unit-uniform frame — error code (zero when
//! the CPU supplies none), vector number, then the general registers in
//! [`crate::trap::CpuState`] order — and funnel into `trap_common`, which
//! hands the frame pointer to the Rust-side dispatcher. Vectors 0-47 are
//! ring-0 gates; 0x80 is reachable from ring 3.

use core::arch::global_asm;

use lazy_static::lazy_static;

use crate::process::pcb::KERNEL_CS_SELECTOR;
use crate::trap::vector;

// Vectors where the CPU pushes an error code itself: 8, 10-14, 17, 30.
global_asm!(
    r#"
.altmacro
.macro trap_stub n
trap_stub_\n:
.if (\n == 8) || (\n == 10) || (\n == 11) || (\n == 12) || (\n == 13) || (\n == 14) || (\n == 17) || (\n == 30)
.else
    push 0
.endif
    push \n
    jmp trap_common
.endm

.section .text
.set vec, 0
.rept 256
    trap_stub %vec
    .set vec, vec+1
.endr

trap_common:
    push esp
    push eax
    push ebx
    push ecx
    push edx
    push ebp
    push esi
    push edi
    mov eax, esp
    push eax
    call {entry}
    add esp, 4
    pop edi
    pop esi
    pop ebp
    pop edx
    pop ecx
    pop ebx
    pop eax
    add esp, 4
    add esp, 8
    iretd

.macro trap_ptr n
    .long trap_stub_\n
.endm

.section .rodata
.global trap_stub_table
trap_stub_table:
.set vec, 0
.rept 256
    trap_ptr %vec
    .set vec, vec+1
.endr
.section .text
"#,
    entry = sym super::entry::trap_entry
);

extern "C" {
    static trap_stub_table: [u32; vector::COUNT];
}

const FLAG_PRESENT: u8 = 0x80;
/// 32-bit trap gate.
const GATE_TRAP_32: u8 = 0x0F;

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
struct IdtGate {
    handler_low: u16,
    segsel: u16,
    zero: u8,
    config: u8,
    handler_high: u16,
}

impl IdtGate {
    fn new(handler: u32, privilege: u8) -> Self {
        Self {
            handler_low: (handler & 0xFFFF) as u16,
            segsel: KERNEL_CS_SELECTOR as u16,
            zero: 0,
            config: FLAG_PRESENT | ((privilege & 0x3) << 5) | GATE_TRAP_32,
            handler_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

lazy_static! {
    static ref IDT: [IdtGate; vector::COUNT] = {
        let mut idt = [IdtGate::new(0, 0); vector::COUNT];
        for (vec, gate) in idt.iter_mut().enumerate() {
            // SAFETY: the table is emitted by the global_asm block above
            // with exactly vector::COUNT entries.
            let handler = unsafe { trap_stub_table[vec] };
            let privilege = if vec == vector::SYSCALL as usize { 3 } else { 0 };
            *gate = IdtGate::new(handler, privilege);
        }
        idt
    };
}

pub fn init() {
    log::info!("Setting up protected mode exceptions, IRQs and the syscall gate");

    let pointer = IdtPointer {
        limit: (core::mem::size_of::<IdtGate>() * vector::COUNT - 1) as u16,
        base: IDT.as_ptr() as u32,
    };

    // SAFETY: the pointer references the lazily initialized static IDT,
    // which lives for the whole kernel run.
    unsafe {
        core::arch::asm!("lidt [{ptr}]", ptr = in(reg) &pointer as *const IdtPointer);
    }

    log::info!("IDT initialized");
}
