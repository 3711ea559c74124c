//! In-process system log: a bounded ring buffer surfaced at
//! `/admin/system-logs`, mirrored to `tracing`.
//!
//! A fresh replica boots to an empty buffer; there is no cross-replica
//! recovery.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::SYSTEM_LOG_CAPACITY;

#[derive(Debug, Clone, Copy)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemLogEntry {
    pub ts: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

static LOGS: Mutex<VecDeque<SystemLogEntry>> = Mutex::new(VecDeque::new());

pub fn log(level: Level, message: impl Into<String>) {
    let message = message.into();
    match level {
        Level::Info => tracing::info!("{message}"),
        Level::Warn => tracing::warn!("{message}"),
        Level::Error => tracing::error!("{message}"),
    }

    let entry = SystemLogEntry {
        ts: Utc::now(),
        level: level.as_str().to_string(),
        message,
    };

    let mut logs = LOGS.lock().expect("system log mutex poisoned");
    if logs.len() >= SYSTEM_LOG_CAPACITY {
        logs.pop_front();
    }
    logs.push_back(entry);
}

pub fn info(message: impl Into<String>) {
    log(Level::Info, message);
}

pub fn warn(message: impl Into<String>) {
    log(Level::Warn, message);
}

pub fn error(message: impl Into<String>) {
    log(Level::Error, message);
}

/// Snapshot of the buffer, newest first.
pub fn recent() -> Vec<SystemLogEntry> {
    let logs = LOGS.lock().expect("system log mutex poisoned");
    logs.iter().rev().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_is_bounded_and_newest_first() {
        for i in 0..(SYSTEM_LOG_CAPACITY + 20) {
            info(format!("entry {i}"));
        }
        let entries = recent();
        assert_eq!(entries.len(), SYSTEM_LOG_CAPACITY);
        assert_eq!(
            entries[0].message,
            format!("entry {}", SYSTEM_LOG_CAPACITY + 19)
        );
    }
}
