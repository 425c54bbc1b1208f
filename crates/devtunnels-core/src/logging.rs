//! Level-filtered diagnostic log with a bounded in-memory ring buffer.
//!
//! Each record is kept in the buffer for later inspection and forwarded to
//! `tracing` at the matching level, so an installed subscriber (see
//! [`crate::tracing_init`]) prints the same diagnostics.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DevTunnelsConfig;

/// Default ring buffer capacity.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Log severity, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Debug,
            1 => Self::Info,
            2 => Self::Warn,
            _ => Self::Error,
        }
    }

    /// Parse a level name (`debug`, `info`, `warn`/`warning`, `error`).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        })
    }
}

/// One diagnostic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Diagnostic sink shared by every service component.
///
/// Construct isolated instances with [`Logger::new`] (tests do this to avoid
/// cross-test pollution) or share the process-wide [`Logger::global`].
#[derive(Debug)]
pub struct Logger {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    level: AtomicU8,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl Logger {
    /// Create a logger keeping at most `capacity` entries at level `Info`.
    pub fn new(capacity: usize) -> Self {
        Self::with_level(capacity, LogLevel::Info)
    }

    pub fn with_level(capacity: usize, level: LogLevel) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY))),
            capacity: capacity.max(1),
            level: AtomicU8::new(level as u8),
        }
    }

    /// Logger built from `log_level` and `log_capacity`. Unknown level names
    /// fall back to `Info`.
    pub fn from_config(config: &DevTunnelsConfig) -> Self {
        let level = LogLevel::parse(&config.log_level).unwrap_or(LogLevel::Info);
        Self::with_level(config.log_capacity, level)
    }

    /// The lazily created process-wide logger.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<Logger>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::default())))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn debug(&self, component: &str, message: impl Into<String>) {
        self.log(LogLevel::Debug, component, message.into(), None);
    }

    pub fn info(&self, component: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, component, message.into(), None);
    }

    pub fn warn(&self, component: &str, message: impl Into<String>) {
        self.log(LogLevel::Warn, component, message.into(), None);
    }

    pub fn error(&self, component: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, component, message.into(), None);
    }

    pub fn debug_with(&self, component: &str, message: impl Into<String>, data: Value) {
        self.log(LogLevel::Debug, component, message.into(), Some(data));
    }

    pub fn info_with(&self, component: &str, message: impl Into<String>, data: Value) {
        self.log(LogLevel::Info, component, message.into(), Some(data));
    }

    pub fn warn_with(&self, component: &str, message: impl Into<String>, data: Value) {
        self.log(LogLevel::Warn, component, message.into(), Some(data));
    }

    pub fn error_with(&self, component: &str, message: impl Into<String>, data: Value) {
        self.log(LogLevel::Error, component, message.into(), Some(data));
    }

    /// Record an entry. Entries below the current level are dropped.
    pub fn log(&self, level: LogLevel, component: &str, message: String, data: Option<Value>) {
        if level < self.level() {
            return;
        }

        emit(level, component, &message, data.as_ref());

        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            component: component.to_string(),
            message,
            data,
        };

        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Buffered entries, oldest first, optionally filtered by component and
    /// minimum level.
    pub fn entries(&self, component: Option<&str>, min_level: Option<LogLevel>) -> Vec<LogEntry> {
        self.lock()
            .iter()
            .filter(|e| component.is_none_or(|c| e.component == c))
            .filter(|e| min_level.is_none_or(|l| e.level >= l))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    // A panic while holding the lock cannot leave the deque half-updated,
    // so a poisoned buffer is still usable.
    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn emit(level: LogLevel, component: &str, message: &str, data: Option<&Value>) {
    match (level, data) {
        (LogLevel::Debug, Some(d)) => tracing::debug!(component, data = %d, "{message}"),
        (LogLevel::Debug, None) => tracing::debug!(component, "{message}"),
        (LogLevel::Info, Some(d)) => tracing::info!(component, data = %d, "{message}"),
        (LogLevel::Info, None) => tracing::info!(component, "{message}"),
        (LogLevel::Warn, Some(d)) => tracing::warn!(component, data = %d, "{message}"),
        (LogLevel::Warn, None) => tracing::warn!(component, "{message}"),
        (LogLevel::Error, Some(d)) => tracing::error!(component, data = %d, "{message}"),
        (LogLevel::Error, None) => tracing::error!(component, "{message}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn default_level_is_info() {
        let logger = Logger::new(10);
        logger.debug("Test", "hidden");
        logger.info("Test", "shown");
        assert_eq!(logger.len(), 1);
        assert_eq!(logger.entries(None, None)[0].message, "shown");
    }

    #[test]
    fn set_level_changes_filter() {
        let logger = Logger::new(10);
        logger.set_level(LogLevel::Debug);
        logger.debug("Test", "now visible");
        assert_eq!(logger.level(), LogLevel::Debug);
        assert_eq!(logger.len(), 1);

        logger.set_level(LogLevel::Error);
        logger.warn("Test", "dropped");
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let logger = Logger::new(3);
        for i in 0..5 {
            logger.info("Test", format!("msg {i}"));
        }
        let messages: Vec<_> = logger
            .entries(None, None)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[test]
    fn filters_by_component_and_level() {
        let logger = Logger::with_level(10, LogLevel::Debug);
        logger.debug("CLIWrapper", "probe");
        logger.warn("CLIWrapper", "slow");
        logger.error("AuthManager", "failed");

        assert_eq!(logger.entries(Some("CLIWrapper"), None).len(), 2);
        assert_eq!(logger.entries(None, Some(LogLevel::Warn)).len(), 2);
        let only = logger.entries(Some("CLIWrapper"), Some(LogLevel::Warn));
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].message, "slow");
    }

    #[test]
    fn structured_payload_is_kept() {
        let logger = Logger::new(10);
        logger.info_with("CLIInstaller", "prerequisites", json!({ "npm": true }));
        let entry = &logger.entries(None, None)[0];
        assert_eq!(entry.data, Some(json!({ "npm": true })));
    }

    #[test]
    fn from_config_applies_level_and_capacity() {
        let config = DevTunnelsConfig {
            log_level: "warn".into(),
            log_capacity: 2,
            ..DevTunnelsConfig::default()
        };
        let logger = Logger::from_config(&config);
        assert_eq!(logger.level(), LogLevel::Warn);
        assert_eq!(logger.capacity(), 2);

        logger.info("Test", "dropped");
        for msg in ["a", "b", "c"] {
            logger.error("Test", msg);
        }
        let kept: Vec<_> = logger.entries(None, None).into_iter().map(|e| e.message).collect();
        assert_eq!(kept, vec!["b", "c"]);

        let fallback = Logger::from_config(&DevTunnelsConfig {
            log_level: "chatty".into(),
            ..DevTunnelsConfig::default()
        });
        assert_eq!(fallback.level(), LogLevel::Info);
    }

    #[test]
    fn clear_empties_buffer() {
        let logger = Logger::new(10);
        logger.error("Test", "x");
        assert!(!logger.is_empty());
        logger.clear();
        assert!(logger.is_empty());
    }

    #[test]
    fn global_is_shared() {
        let a = Logger::global();
        let b = Logger::global();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn parse_level_names() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" debug "), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("verbose"), None);
    }

    #[test]
    fn entry_serializes_camel_case() {
        let logger = Logger::new(1);
        logger.warn("Monitor", "lost");
        let json = serde_json::to_value(&logger.entries(None, None)[0]).unwrap();
        assert_eq!(json["level"], "warn");
        assert_eq!(json["component"], "Monitor");
        assert!(json.get("data").is_none());
    }
}
