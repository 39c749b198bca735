use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const ACTIVITY_LOG_FILE: &str = "activity.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Sink for one-line structured records. Logging never fails the caller.
pub trait ActivityLog: Send + Sync {
    fn record(&self, level: LogLevel, source: &str, message: &str);

    fn info(&self, source: &str, message: &str) {
        self.record(LogLevel::Info, source, message);
    }

    fn warn(&self, source: &str, message: &str) {
        self.record(LogLevel::Warn, source, message);
    }

    fn error(&self, source: &str, message: &str) {
        self.record(LogLevel::Error, source, message);
    }
}

/// Appends JSON objects, one per line, to `logs/activity.log`.
#[derive(Debug)]
pub struct JsonLinesActivityLog {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonLinesActivityLog {
    pub fn new(logs_dir: &Path) -> Self {
        Self {
            path: logs_dir.join(ACTIVITY_LOG_FILE),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ActivityLog for JsonLinesActivityLog {
    fn record(&self, level: LogLevel, source: &str, message: &str) {
        let Ok(_guard) = self.guard.lock() else {
            return;
        };
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level.as_str(),
            "source": source,
            "message": message,
        });

        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct InMemoryActivityLog {
    records: Mutex<Vec<LogRecord>>,
}

impl InMemoryActivityLog {
    pub fn records(&self) -> Vec<LogRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn records_at(&self, level: LogLevel) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.level == level)
            .collect()
    }
}

impl ActivityLog for InMemoryActivityLog {
    fn record(&self, level: LogLevel, source: &str, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push(LogRecord {
                level,
                source: source.to_string(),
                message: message.to_string(),
            });
        }
    }
}
