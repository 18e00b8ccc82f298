/// Human-readable status reporting.
///
/// Monitors and the launch sequencer never print; they hand every status line
/// to a [`Notifier`], which fans it out to the registered handlers.  Handlers
/// run synchronously on the emitting task, so a UI must marshal to its own
/// thread (e.g. by forwarding into a channel) rather than block inside one.
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    pub fn tag(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Success => "OK",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
        }
    }

    /// Renders `[yyyy-MM-dd HH:mm:ss.ffffff] message`.
    pub fn format_line(&self) -> String {
        format!(
            "[{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"),
            self.message
        )
    }
}

pub type LogHandler = Arc<dyn Fn(&LogEvent) + Send + Sync>;
pub type StartedHandler = Arc<dyn Fn() + Send + Sync>;

/// Observer registry for log lines and the "all programs started" signal.
#[derive(Default)]
pub struct Notifier {
    log_handlers: Mutex<Vec<LogHandler>>,
    started_handlers: Mutex<Vec<StartedHandler>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_log_message(&self, handler: impl Fn(&LogEvent) + Send + Sync + 'static) {
        self.log_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    pub fn on_all_programs_started(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.started_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(&LogEvent::new(level, message));
    }

    /// Delivers an already-built event, keeping its timestamp.
    pub fn emit(&self, event: &LogEvent) {
        // Snapshot so a handler may register further handlers without deadlocking.
        let handlers = self
            .log_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    pub fn all_programs_started(&self) {
        let handlers = self
            .started_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler();
        }
    }
}
