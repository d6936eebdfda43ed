//!
//! Logging macros with a pluggable sink.
//!
//! The following macros are available and behave like `println!()`:
//! `log_trace!()`, `log_debug!()`, `log_info!()`, `log_warn!()` and
//! `log_error!()`.
//!
//! By default messages at or above the configured [`LevelFilter`] are
//! printed to the console (stderr for errors). A host application can
//! route all log output to its own appender by installing a [`Sink`]
//! with [`pipe`]:
//!
//! ```
//! use ferrite_log::*;
//! use std::sync::Arc;
//!
//! struct FileAppender;
//! impl Sink for FileAppender {
//!     fn write(&self, target: Option<&str>, level: Level, args: &std::fmt::Arguments<'_>) -> bool {
//!         // write to the appender...
//!         // return true to continue with console output, false to consume
//!         false
//!     }
//! }
//!
//! ferrite_log::pipe(Some(Arc::new(FileAppender)));
//! log_trace!("routed");
//! ```
//!

extern crate self as ferrite_log;

mod levels;
mod log;

pub use self::levels::*;
pub use self::log::*;

pub mod prelude {
    pub use crate::levels::*;
    pub use crate::log::*;
    pub use crate::{log_debug, log_error, log_info, log_trace, log_warn};
}

#[cfg(test)]
mod test {
    use crate::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn log_sink_capture() {
        struct Capture {
            lines: Mutex<Vec<String>>,
        }
        impl Sink for Capture {
            fn write(
                &self,
                _target: Option<&str>,
                level: Level,
                args: &std::fmt::Arguments<'_>,
            ) -> bool {
                self.lines
                    .lock()
                    .unwrap()
                    .push(format!("{level}: {args}"));
                false
            }
        }

        let capture = Arc::new(Capture {
            lines: Mutex::new(Vec::new()),
        });
        pipe(Some(capture.clone()));
        set_log_level(LevelFilter::Trace);
        log_info!("hello {}", 42);
        pipe(None);

        let lines = capture.lines.lock().unwrap();
        assert_eq!(lines.as_slice(), ["INFO: hello 42"]);
    }
}
