//! # Evaluation Log
//!
//! User-facing debug console. Collects `console.*` output from user code
//! and the errors the engine swallows on its behalf, tagged by category.
//! Every entry is also emitted as a `tracing` event for operators.

use crate::primitives::DEFAULT_LOG_CAPACITY;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

/// Where a log entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogCategory {
    /// `console.*` called by user code.
    UserConsole,
    /// A binding or function raised while being evaluated.
    ExpressionEvaluation,
    /// Async classification of a function failed.
    ClassificationProbe,
    /// A recorded patch had an unusable path.
    MalformedPatchPath,
    /// Bindings depend on each other in a cycle.
    CyclicDependency,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UserConsole => "USER_CONSOLE",
            Self::ExpressionEvaluation => "EXPRESSION_EVALUATION",
            Self::ClassificationProbe => "CLASSIFICATION_PROBE",
            Self::MalformedPatchPath => "MALFORMED_PATCH_PATH",
            Self::CyclicDependency => "CYCLIC_DEPENDENCY",
        })
    }
}

/// A single log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub category: LogCategory,
    /// Entity (or `Entity.prop` path) the entry relates to, if any.
    pub entity: Option<String>,
    pub message: String,
}

/// Bounded log; the oldest entries are dropped once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct EvalLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for EvalLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl EvalLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry.
    pub fn push(
        &mut self,
        level: LogLevel,
        category: LogCategory,
        entity: Option<&str>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        match level {
            LogLevel::Info => {
                tracing::debug!(%category, entity = entity.unwrap_or("-"), "{}", message);
            }
            LogLevel::Warn | LogLevel::Error => {
                tracing::warn!(%category, entity = entity.unwrap_or("-"), "{}", message);
            }
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            level,
            category,
            entity: entity.map(str::to_string),
            message,
        });
    }

    /// Shorthand for an error-level entry.
    pub fn error(&mut self, category: LogCategory, entity: Option<&str>, message: impl Into<String>) {
        self.push(LogLevel::Error, category, entity, message);
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Entries of one category.
    pub fn by_category(&self, category: LogCategory) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.category == category)
    }

    /// Remove and return every entry.
    pub fn drain(&mut self) -> Vec<LogEntry> {
        self.entries.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_capacity_drops_oldest() {
        let mut log = EvalLog::new(2);
        log.push(LogLevel::Info, LogCategory::UserConsole, None, "a");
        log.push(LogLevel::Info, LogCategory::UserConsole, None, "b");
        log.push(LogLevel::Warn, LogCategory::UserConsole, None, "c");
        let messages: Vec<_> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["b", "c"]);
    }

    #[test]
    fn filter_and_drain() {
        let mut log = EvalLog::new(10);
        log.error(LogCategory::ClassificationProbe, Some("Obj1.f"), "boom");
        log.push(LogLevel::Info, LogCategory::UserConsole, Some("Obj1"), "hi");
        assert_eq!(log.by_category(LogCategory::ClassificationProbe).count(), 1);
        let drained = log.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].entity.as_deref(), Some("Obj1.f"));
        assert!(log.is_empty());
    }

    #[test]
    fn entry_serializes() {
        let mut log = EvalLog::new(10);
        log.error(LogCategory::MalformedPatchPath, None, "bad");
        let json = serde_json::to_value(log.entries().next()).expect("serialize");
        assert_eq!(json["level"], "error");
        assert_eq!(json["category"], "MALFORMED_PATCH_PATH");
    }
}
