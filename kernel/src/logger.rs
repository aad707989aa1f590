//! Kernel logger
//!
//! Backend for the `log` facade: level-tagged, ANSI-coloured lines on the
//! COM1 UART. The tag column is padded so message bodies align regardless
//! of level. Host builds never install it; test runs either discard
//! records or install their own capture logger.

use log::Level;

pub const COLOR_RESET: &str = "\x1b[0m";
pub const COLOR_DEBUG: &str = "\x1b[36m";
pub const COLOR_INFO: &str = "\x1b[32m";
pub const COLOR_WARN: &str = "\x1b[33m";
pub const COLOR_ERROR: &str = "\x1b[31m";
pub const COLOR_TRACE: &str = "\x1b[35m";

/// Width of the `[LEVEL]` column including trailing padding.
pub const TAG_COLUMN: usize = 10;

pub fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "[ERROR]",
        Level::Warn => "[WARN]",
        Level::Info => "[INFO]",
        Level::Debug => "[DEBUG]",
        Level::Trace => "[TRACE]",
    }
}

pub fn level_color(level: Level) -> &'static str {
    match level {
        Level::Error => COLOR_ERROR,
        Level::Warn => COLOR_WARN,
        Level::Info => COLOR_INFO,
        Level::Debug => COLOR_DEBUG,
        Level::Trace => COLOR_TRACE,
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod serial_backend {
    use core::fmt::Write;

    use log::{LevelFilter, Log, Metadata, Record};
    use spin::Mutex;

    use super::{level_color, level_tag, COLOR_RESET, TAG_COLUMN};
    use crate::arch::x86::serial;

    /// Serializes whole log lines; interrupts stay disabled for the
    /// duration of a kernel path anyway, the lock only guards against
    /// interleaving with the idle loop.
    static WRITE_LOCK: Mutex<()> = Mutex::new(());

    struct SerialWriter;

    impl Write for SerialWriter {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            serial::write_str(s);
            Ok(())
        }
    }

    struct SerialLogger;

    impl Log for SerialLogger {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }

            let _guard = WRITE_LOCK.lock();
            let mut writer = SerialWriter;
            let tag = level_tag(record.level());
            let _ = write!(writer, "{}{}{}", level_color(record.level()), tag, COLOR_RESET);
            for _ in tag.len()..TAG_COLUMN {
                serial::write_str(" ");
            }
            let _ = writeln!(writer, "{}", record.args());
        }

        fn flush(&self) {}
    }

    static LOGGER: SerialLogger = SerialLogger;

    /// Bring up the UART and install the logger. Called once, first thing
    /// in the arch entry, so every later subsystem can log.
    pub fn init() {
        serial::init();
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(if cfg!(debug_assertions) {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            });
        }
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use serial_backend::init;
