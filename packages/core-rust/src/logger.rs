//! Structured logger capability handed to every module call.
//!
//! A [`Logger`] is a value: `with_field`/`with_fields` return a new logger
//! carrying the merged field set and leave the receiver untouched, so one
//! base logger can be shared by concurrent calls without field leakage.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

/// Accumulated structured fields, ordered by name.
pub type Fields = BTreeMap<String, Value>;

/// Log severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Host-supplied backend that receives fully formatted records.
///
/// Implementations must not panic; logging never affects module control flow.
pub trait LogSink: Send + Sync {
    fn emit(&self, level: LogLevel, fields: &Fields, message: &str);
}

/// Leveled, field-annotated logger.
#[derive(Clone)]
pub struct Logger {
    fields: Arc<Fields>,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    /// Create a root logger with no fields.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            fields: Arc::new(Fields::new()),
            sink,
        }
    }

    /// A logger that discards every record.
    #[must_use]
    pub fn discard() -> Self {
        Self::new(Arc::new(DiscardSink))
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    pub fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        let message = match args.as_str() {
            Some(s) => s.to_string(),
            None => args.to_string(),
        };
        self.sink.emit(level, &self.fields, &message);
    }

    /// Return a logger with `key` set to `value`. Later values win.
    #[must_use]
    pub fn with_field(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut fields = (*self.fields).clone();
        fields.insert(key.into(), value.into());
        Self {
            fields: Arc::new(fields),
            sink: Arc::clone(&self.sink),
        }
    }

    /// Return a logger with every entry of `extra` merged over the current fields.
    #[must_use]
    pub fn with_fields<I, K, V>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut fields = (*self.fields).clone();
        fields.extend(extra.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self {
            fields: Arc::new(fields),
            sink: Arc::clone(&self.sink),
        }
    }

    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("fields", &self.fields).finish_non_exhaustive()
    }
}

struct DiscardSink;

impl LogSink for DiscardSink {
    fn emit(&self, _level: LogLevel, _fields: &Fields, _message: &str) {}
}

/// A captured log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub fields: Fields,
    pub message: String,
}

/// Sink that keeps every record in memory. Intended for module tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn emit(&self, level: LogLevel, fields: &Fields, message: &str) {
        self.records.lock().push(LogRecord {
            level,
            fields: fields.clone(),
            message: message.to_string(),
        });
    }
}
