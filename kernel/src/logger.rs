//! `log`-crate facade over the serial diagnostic sink.
//!
//! Installed first, before any other component, so every subsystem can log
//! from the moment it initializes (frame database construction, page-table
//! setup, etc. all want to trace their progress).

use crate::serial_println;
use log::{LevelFilter, Log, Metadata, Record};

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            serial_println!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the serial logger as the global `log` facade. Idempotent; safe to
/// call more than once (subsequent calls are no-ops reported via the
/// `log::SetLoggerError` they'd otherwise return).
pub fn init() {
    let max_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(max_level));
}
