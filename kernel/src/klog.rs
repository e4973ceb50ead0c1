//! Serial-backed implementation of the `log` facade.
//!
//! Installed early in boot so every subsystem can use `log::info!` and
//! friends; the level filter defaults to Info and may be overridden with
//! `loglevel=` on the boot command line.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => " WARN",
            Level::Info => " INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        crate::println!("[{}] {}: {}", tag, record.target(), record.args());
    }

    fn flush(&self) {}
}

/// Install the logger. Later calls only adjust the level filter.
pub fn init(level: LevelFilter) {
    // set_logger fails if a logger is already installed; that happens when
    // init is called twice (e.g. host tests), and the filter update is all
    // that is wanted then.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
