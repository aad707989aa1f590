//! 32-bit protected-mode x86 support

pub mod entry;
pub mod gdt;
pub mod idt;
pub mod io;
pub mod pic;
pub mod pit;
pub mod serial;

use core::arch::asm;

use crate::mm::VirtAddr;

/// Interrupt flag control. These are the only places the kernel touches
/// IF: the end of boot (`enable`), the idle loop, and the moments before a
/// context switch or fatal halt (`disable`).
pub mod interrupts {
    use core::arch::asm;

    #[inline]
    pub fn enable() {
        // SAFETY: setting IF has no memory effects.
        unsafe { asm!("sti", options(nomem, nostack)) }
    }

    #[inline]
    pub fn disable() {
        // SAFETY: clearing IF has no memory effects.
        unsafe { asm!("cli", options(nomem, nostack)) }
    }
}

/// Invalidate the TLB entry covering `virt`.
#[inline]
pub fn invlpg(virt: VirtAddr) {
    // SAFETY: invlpg only drops a TLB entry.
    unsafe {
        asm!("invlpg [{}]", in(reg) virt.as_u32(), options(nostack, preserves_flags));
    }
}

/// Faulting linear address of the most recent page fault.
#[inline]
pub fn read_cr2() -> VirtAddr {
    let value: u32;
    // SAFETY: reading CR2 has no side effects.
    unsafe {
        asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    VirtAddr::new(value)
}

/// Load `cr3`, enable PSE and turn paging on.
///
/// # Safety
///
/// The directory must map the currently executing code or the next fetch
/// faults irrecoverably.
pub unsafe fn enable_paging(cr3: u32) {
    // SAFETY: contract of the function.
    unsafe {
        asm!(
            "mov cr3, {cr3}",
            "mov {tmp}, cr4",
            "or {tmp}, 0x10",
            "mov cr4, {tmp}",
            "mov {tmp}, cr0",
            "or {tmp}, 0x80000000",
            "mov cr0, {tmp}",
            cr3 = in(reg) cr3,
            tmp = out(reg) _,
        );
    }
}

/// Halt forever with interrupts off. The fatal-fault landing pad.
pub fn halt_loop() -> ! {
    interrupts::disable();
    loop {
        // SAFETY: hlt with IF clear just stops the clock.
        unsafe { asm!("hlt", options(nomem, nostack)) }
    }
}

/// Wait for the next interrupt, forever. A timer tick may schedule away
/// from here and never come back; that is the point.
pub fn idle_loop() -> ! {
    loop {
        interrupts::enable();
        // SAFETY: hlt with IF set resumes at the next interrupt.
        unsafe { asm!("hlt", options(nomem, nostack)) }
    }
}
