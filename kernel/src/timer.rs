//! Periodic timer
//!
//! The PIT drives scheduling: every tick on IRQ0 lands in
//! [`tick_handler`], which acknowledges the interrupt (done by the arch
//! glue before dispatch) and runs the scheduler. The divisor math lives
//! here so it can be checked off-target; the port programming is in
//! [`crate::arch`].

use crate::kernel::Kernel;
use crate::mm::{PhysMemory, VirtAddr};
use crate::process::scheduler;
use crate::trap::{TrapFrame, TrapOutcome};

/// Base frequency of the 8254 input clock, in Hz.
pub const PIT_HZ: u32 = 1_193_182;

/// Default scheduling quantum.
pub const DEFAULT_TICK_MS: u32 = 10;

/// Channel-0 divisor for a tick every `interval_ms` milliseconds, written
/// low byte then high byte to the data port.
pub fn pit_divisor(interval_ms: u32) -> u16 {
    let frequency = 1000 / interval_ms;
    (PIT_HZ / frequency) as u16
}

/// Trap handler for the PIT vector (IRQ0). EOI has already been sent by
/// the interrupt glue so the next tick can arrive after the switch.
pub fn tick_handler(
    kernel: &mut Kernel,
    _mem: &mut dyn PhysMemory,
    frame: &mut TrapFrame,
    _fault_addr: VirtAddr,
) -> TrapOutcome {
    scheduler::timer_tick(kernel, frame)
}
