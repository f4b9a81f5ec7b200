use crate::types::SkipReason;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

pub fn log_event(level: LogLevel, message: &str, context: Option<serde_json::Value>) {
    let context = context.map(|value| value.to_string()).unwrap_or_default();
    match level {
        LogLevel::Debug => tracing::debug!("[Extract] {} {}", message, context),
        LogLevel::Info => tracing::info!("[Extract] {} {}", message, context),
        LogLevel::Warn => tracing::warn!("[Extract] {} {}", message, context),
        LogLevel::Error => tracing::error!("[Extract] {} {}", message, context),
    }
}

/// Stylesheets without a form binding are routine; anything else deserves attention.
pub fn skip_level(reason: &SkipReason) -> LogLevel {
    match reason {
        SkipReason::NotAFormDocument => LogLevel::Info,
        SkipReason::NotParseable(_) | SkipReason::Unreadable(_) => LogLevel::Warn,
    }
}

pub fn log_skip(path: &Path, reason: &SkipReason) {
    log_event(
        skip_level(reason),
        "skipped stylesheet",
        Some(serde_json::json!({
            "path": path.display().to_string(),
            "reason": reason.as_str(),
            "detail": reason.detail(),
        })),
    );
}
