//! 8254 programmable interval timer

use super::io::outb;
use crate::timer::{pit_divisor, DEFAULT_TICK_MS};

const COMMAND_PORT: u16 = 0x43;
const CHANNEL_0_DATA: u16 = 0x40;

/// Channel 0, access low byte then high byte, mode 3 (square wave),
/// binary counting.
const MODE: u8 = (1 << 5) | (1 << 4) | (1 << 2) | (1 << 1);

pub fn init() {
    outb(COMMAND_PORT, MODE);
    set_interval(DEFAULT_TICK_MS);
    log::info!("PIT initialized");
}

/// Reprogram channel 0 for one tick every `interval_ms` milliseconds.
pub fn set_interval(interval_ms: u32) {
    let divisor = pit_divisor(interval_ms);
    outb(CHANNEL_0_DATA, divisor as u8);
    outb(CHANNEL_0_DATA, (divisor >> 8) as u8);
    log::debug!("PIT set to {}Hz", 1000 / interval_ms);
}
