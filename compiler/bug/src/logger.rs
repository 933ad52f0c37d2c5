//! A small stderr logger for the `log` facade used across the compiler
//! crates.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct CompilerLogger;

static LOGGER: CompilerLogger = CompilerLogger;

impl Log for CompilerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let label = match record.level() {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        };
        eprintln!("{label}: {}", record.args());
    }

    fn flush(&self) {}
}

/// Install the logger. In debug mode everything down to trace is shown;
/// otherwise only warnings and errors.
pub fn init(debug: bool) {
    let filter = if debug { LevelFilter::Trace } else { LevelFilter::Warn };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(filter);
    }
}
