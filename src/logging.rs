//! Structured logging for flows and scenarios.
//!
//! Flow code reports progress through [`HarnessLogger`], which produces
//! [`HarnessLogRecord`]s and hands them to an external sink, the `log`
//! facade, or a plain console printer. The low-level action layer logs
//! through the `log` macros directly.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{HarnessConfig, Verbosity};

/// Convenience alias for external logging callbacks.
pub type LogCallback = Arc<dyn Fn(&HarnessLogRecord) + Send + Sync + 'static>;

/// Where records go when no external callback is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    Console,
    Facade,
}

#[derive(Clone)]
pub struct LogConfig {
    pub verbose: Verbosity,
    pub sink: LogSink,
    pub external_logger: Option<LogCallback>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbose: Verbosity::Medium,
            sink: LogSink::Console,
            external_logger: None,
        }
    }
}

impl LogConfig {
    pub fn new(verbose: Verbosity) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    /// Logger settings derived from a resolved [`HarnessConfig`].
    ///
    /// A configured string logger receives the rendered message line.
    pub fn from_harness(config: &HarnessConfig) -> Self {
        let external_logger = config.logger.clone().map(|callback| {
            let forward: LogCallback = Arc::new(move |record: &HarnessLogRecord| {
                callback(&record.render());
            });
            forward
        });
        Self {
            verbose: config.verbose,
            sink: LogSink::Console,
            external_logger,
        }
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level == LogLevel::Error || level.as_u8() <= self.verbose.as_u8()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Info = 1,
    Debug = 2,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    fn facade_level(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

/// Structured log entry shared with external callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessLogRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Value>,
}

impl HarnessLogRecord {
    pub fn new(
        message: impl Into<String>,
        level: LogLevel,
        category: Option<String>,
        auxiliary: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            category,
            auxiliary,
        }
    }

    /// Single-line rendering without timestamp or level.
    pub fn render(&self) -> String {
        let mut line = match &self.category {
            Some(category) => format!("[{category}] {}", self.message),
            None => self.message.clone(),
        };
        if let Some(aux) = self.auxiliary.as_ref().filter(|aux| !aux.is_null()) {
            line.push(' ');
            line.push_str(&aux.to_string());
        }
        line
    }
}

/// Default console printer used when no external logger is configured.
pub fn default_log_handler(record: &HarnessLogRecord) {
    let timestamp = record
        .timestamp
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    if let Some(category) = &record.category {
        println!(
            "[{}] {:<5} [{}] {}",
            timestamp,
            record.level.label(),
            category,
            record.message
        );
    } else {
        println!(
            "[{}] {:<5} {}",
            timestamp,
            record.level.label(),
            record.message
        );
    }
    if let Some(aux) = &record.auxiliary {
        if !aux.is_null() {
            println!("    {}", aux);
        }
    }
}

fn facade_log_handler(record: &HarnessLogRecord) {
    log::log!(
        target: "onboarding_harness::flow",
        record.level.facade_level(),
        "{}",
        record.render()
    );
}

pub struct HarnessLogger {
    config: LogConfig,
}

impl fmt::Debug for HarnessLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessLogger")
            .field("verbosity", &self.config.verbose)
            .field("sink", &self.config.sink)
            .field("external_logger", &self.config.external_logger.is_some())
            .finish()
    }
}

impl HarnessLogger {
    pub fn with_config(config: LogConfig) -> Self {
        Self { config }
    }

    pub fn new(verbose: Verbosity) -> Self {
        Self::with_config(LogConfig::new(verbose))
    }

    pub fn set_external_logger(&mut self, logger: Option<LogCallback>) {
        self.config.external_logger = logger;
    }

    pub fn log(
        &self,
        message: impl Into<String>,
        level: LogLevel,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        if !self.config.should_log(level) {
            return;
        }

        let record =
            HarnessLogRecord::new(message, level, category.map(|c| c.to_string()), auxiliary);

        match (&self.config.external_logger, self.config.sink) {
            (Some(callback), _) => callback(&record),
            (None, LogSink::Facade) => facade_log_handler(&record),
            (None, LogSink::Console) => default_log_handler(&record),
        }
    }

    pub fn error(
        &self,
        message: impl Into<String>,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        self.log(message, LogLevel::Error, category, auxiliary);
    }

    pub fn info(
        &self,
        message: impl Into<String>,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        self.log(message, LogLevel::Info, category, auxiliary);
    }

    pub fn debug(
        &self,
        message: impl Into<String>,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        self.log(message, LogLevel::Debug, category, auxiliary);
    }
}

#[cfg(test)]
pub(crate) fn capturing_logger() -> (Arc<HarnessLogger>, Arc<std::sync::Mutex<Vec<HarnessLogRecord>>>) {
    let records = Arc::new(std::sync::Mutex::new(Vec::new()));
    let capture = Arc::clone(&records);
    let callback: LogCallback = Arc::new(move |record| {
        capture.lock().unwrap().push(record.clone());
    });
    let mut logger = HarnessLogger::new(Verbosity::Detailed);
    logger.set_external_logger(Some(callback));
    (Arc::new(logger), records)
}
