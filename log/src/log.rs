//! Sink registration and the log dispatch entry point

use crate::levels::{Level, LevelFilter};
use lazy_static::lazy_static;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Receiver of log output installed with [`pipe`]. Returning `true`
/// from [`Sink::write`] lets the message continue to the console,
/// returning `false` consumes it.
pub trait Sink: Send + Sync {
    fn write(&self, target: Option<&str>, level: Level, args: &std::fmt::Arguments<'_>) -> bool;
}

lazy_static! {
    static ref SINK: Mutex<Option<Arc<dyn Sink>>> = Mutex::new(None);
}

static LEVEL_FILTER: AtomicUsize = AtomicUsize::new(LevelFilter::Info as usize);

/// Install (or with `None`, remove) the process-wide log sink.
pub fn pipe(sink: Option<Arc<dyn Sink>>) {
    *SINK.lock().unwrap() = sink;
}

pub fn set_log_level(filter: LevelFilter) {
    LEVEL_FILTER.store(filter as usize, Ordering::Relaxed);
}

pub fn log_level() -> LevelFilter {
    LevelFilter::from_usize(LEVEL_FILTER.load(Ordering::Relaxed))
}

#[doc(hidden)]
pub fn write_log(level: Level, args: std::fmt::Arguments<'_>) {
    if !log_level().allows(level) {
        return;
    }

    if let Some(sink) = SINK.lock().unwrap().clone() {
        if !sink.write(None, level, &args) {
            return;
        }
    }

    match level {
        Level::Error | Level::Warn => eprintln!("[{level:>5}] {args}"),
        _ => println!("[{level:>5}] {args}"),
    }
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::write_log($crate::Level::Error, core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::write_log($crate::Level::Warn, core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::write_log($crate::Level::Info, core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::write_log($crate::Level::Debug, core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::write_log($crate::Level::Trace, core::format_args!($($arg)*))
    };
}
