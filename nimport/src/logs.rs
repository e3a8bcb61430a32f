use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::job::JobId;

/// Severity of a captured log line.
///
/// Ordered from least to most severe so thresholds compare naturally.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// `ERROR` and `CRITICAL` entries mark a job as having errors.
    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical)
    }

    /// Map a `tracing` level. `TRACE` folds into `DEBUG`; `CRITICAL` has no
    /// `tracing` equivalent and is signalled with a `critical = true` field.
    pub fn from_tracing(level: &tracing::Level, critical: bool) -> Self {
        match *level {
            tracing::Level::ERROR if critical => LogLevel::Critical,
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::INFO => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown log level '{s}'"))
    }
}

/// A log line captured during one job execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub job_id: JobId,
    /// Per-job append order, starting at 1.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Name of the channel the line was emitted on.
    pub source: String,
}

/// A log line before the store assigns it a sequence number.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
}

impl NewLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            source: source.into(),
        }
    }
}

/// Filter for reading a job's log.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LogFilter {
    /// Only return entries at exactly this level.
    pub level: Option<LogLevel>,
    /// Only return entries at or above this level.
    pub min_level: Option<LogLevel>,
}

impl LogFilter {
    pub fn level(level: LogLevel) -> Self {
        Self {
            level: Some(level),
            min_level: None,
        }
    }

    pub fn errors() -> Self {
        Self {
            level: None,
            min_level: Some(LogLevel::Error),
        }
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.level.is_none_or(|level| entry.level == level)
            && self.min_level.is_none_or(|min| entry.level >= min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_levels() {
        assert!(LogLevel::Error.is_error());
        assert!(LogLevel::Critical.is_error());
        assert!(!LogLevel::Warning.is_error());
        assert!(LogLevel::Debug < LogLevel::Critical);
    }

    #[test]
    fn test_from_tracing_level() {
        assert_eq!(
            LogLevel::from_tracing(&tracing::Level::TRACE, false),
            LogLevel::Debug
        );
        assert_eq!(
            LogLevel::from_tracing(&tracing::Level::WARN, false),
            LogLevel::Warning
        );
        assert_eq!(
            LogLevel::from_tracing(&tracing::Level::ERROR, true),
            LogLevel::Critical
        );
        // The critical flag only escalates errors.
        assert_eq!(
            LogLevel::from_tracing(&tracing::Level::INFO, true),
            LogLevel::Info
        );
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("CRITICAL".parse::<LogLevel>().unwrap(), LogLevel::Critical);
        assert!("WARN".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_filter_matches() {
        let entry = LogEntry {
            job_id: JobId::new(),
            sequence: 1,
            timestamp: Utc::now(),
            level: LogLevel::Warning,
            message: "slow device".into(),
            source: "network_importer".into(),
        };
        assert!(LogFilter::default().matches(&entry));
        assert!(LogFilter::level(LogLevel::Warning).matches(&entry));
        assert!(!LogFilter::errors().matches(&entry));
    }
}
