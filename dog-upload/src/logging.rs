//! Injected logging capability for upload orchestration.
//!
//! The orchestrator never reaches for a process-wide logger. Whatever sink the
//! caller places in [`UploadConfig`](crate::UploadConfig) receives every event,
//! and the default [`NoopLogger`] keeps library use silent.
//!
//! ```rust
//! use std::sync::Arc;
//! use dog_upload::{TracingLogger, UploadConfig};
//!
//! let config = UploadConfig::default().with_logger(Arc::new(TracingLogger));
//! ```

use std::fmt::{self, Display};

/// Severity of a log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level name, case-insensitively. Unknown names yield `None`.
    pub fn parse(level: &str) -> Option<Self> {
        match level.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key/value context attached to a log event
pub type LogFields<'a> = &'a [(&'a str, &'a dyn Display)];

/// Sink for leveled upload events
pub trait UploadLogger: Send + Sync {
    /// Record one event
    fn log(&self, level: LogLevel, message: &str, fields: LogFields<'_>);

    fn debug(&self, message: &str, fields: LogFields<'_>) {
        self.log(LogLevel::Debug, message, fields);
    }

    fn info(&self, message: &str, fields: LogFields<'_>) {
        self.log(LogLevel::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: LogFields<'_>) {
        self.log(LogLevel::Warn, message, fields);
    }

    fn error(&self, message: &str, fields: LogFields<'_>) {
        self.log(LogLevel::Error, message, fields);
    }
}

/// Logger that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl UploadLogger for NoopLogger {
    fn log(&self, _level: LogLevel, _message: &str, _fields: LogFields<'_>) {}
}

/// Logger that forwards events to `tracing`.
///
/// Keys the orchestrator emits become individual event fields; any other
/// pairs are rendered together into `extra`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

/// Field names recorded individually by [`TracingLogger`]
const KNOWN_FIELDS: [&str; 12] = [
    "destination",
    "upload_id",
    "file",
    "part",
    "offset",
    "size",
    "part_size",
    "parts",
    "bytes",
    "elapsed_ms",
    "timeout",
    "error",
];

/// Split fields into one slot per [`KNOWN_FIELDS`] entry plus the rendered leftovers
fn split_fields(fields: LogFields<'_>) -> ([Option<String>; 12], String) {
    let mut known: [Option<String>; 12] = Default::default();
    let mut rest: Vec<(&str, &dyn Display)> = Vec::new();
    for &(key, value) in fields {
        match KNOWN_FIELDS.iter().position(|name| *name == key) {
            Some(index) => known[index] = Some(value.to_string()),
            None => rest.push((key, value)),
        }
    }
    (known, render_fields(&rest))
}

macro_rules! emit {
    ($level:expr, $message:expr, $known:expr, $extra:expr) => {
        tracing::event!(
            target: "dog_upload",
            $level,
            destination = $known[0].as_deref(),
            upload_id = $known[1].as_deref(),
            file = $known[2].as_deref(),
            part = $known[3].as_deref(),
            offset = $known[4].as_deref(),
            size = $known[5].as_deref(),
            part_size = $known[6].as_deref(),
            parts = $known[7].as_deref(),
            bytes = $known[8].as_deref(),
            elapsed_ms = $known[9].as_deref(),
            timeout = $known[10].as_deref(),
            error = $known[11].as_deref(),
            extra = $extra,
            "{}",
            $message
        )
    };
}

impl UploadLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, fields: LogFields<'_>) {
        let (known, rest) = split_fields(fields);
        let extra = (!rest.is_empty()).then_some(rest.as_str());
        match level {
            LogLevel::Debug => emit!(tracing::Level::DEBUG, message, known, extra),
            LogLevel::Info => emit!(tracing::Level::INFO, message, known, extra),
            LogLevel::Warn => emit!(tracing::Level::WARN, message, known, extra),
            LogLevel::Error => emit!(tracing::Level::ERROR, message, known, extra),
        }
    }
}

/// Render fields as space separated `key=value` pairs
fn render_fields(fields: LogFields<'_>) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Install a stdout `tracing` subscriber filtered at `level`.
///
/// `RUST_LOG` takes precedence when set. Unknown level names fall back to
/// `info`. Calling this twice is harmless; the second install is ignored.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let level = LogLevel::parse(level).unwrap_or(LogLevel::Info);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Captured {
        events: Mutex<Vec<(LogLevel, String, String)>>,
    }

    impl UploadLogger for Captured {
        fn log(&self, level: LogLevel, message: &str, fields: LogFields<'_>) {
            self.events
                .lock()
                .push((level, message.to_string(), render_fields(fields)));
        }
    }

    #[test]
    fn parse_levels() {
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse(" warning "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("verbose"), None);
    }

    #[test]
    fn helpers_route_to_log_with_level() {
        let logger = Captured::default();
        let part = 7u32;
        logger.debug("uploading file part", &[("part", &part), ("size", &"5242880")]);
        logger.warn("abort failed", &[]);

        let events = logger.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, LogLevel::Debug);
        assert_eq!(events[0].2, "part=7 size=5242880");
        assert_eq!(events[1].0, LogLevel::Warn);
        assert_eq!(events[1].2, "");
    }

    #[test]
    fn known_keys_become_separate_fields() {
        let part = 3u32;
        let fields: LogFields<'_> = &[("part", &part), ("attempt", &2), ("error", &"boom"), ("zone", &"a")];
        let (known, extra) = split_fields(fields);

        assert_eq!(known[3].as_deref(), Some("3"));
        assert_eq!(known[11].as_deref(), Some("boom"));
        assert!(known[0].is_none());
        assert_eq!(extra, "attempt=2 zone=a");
    }

    #[test]
    fn noop_and_tracing_loggers_accept_events() {
        let fields: LogFields<'_> = &[("file", &"/tmp/x")];
        NoopLogger.info("ignored", fields);
        TracingLogger.error("no subscriber installed", fields);
    }
}
