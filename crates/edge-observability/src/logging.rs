//! Structured logging with render context.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use edge_core::RequestId;
use serde::Serialize;

/// Log level for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// A structured log entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Log level.
    pub level: LogLevel,
    /// Log message.
    pub message: String,
    /// Request ID for correlation.
    pub request_id: String,
    /// Route being rendered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Rendering phase (e.g. "request", "prerender").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Additional structured fields.
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
    /// Microseconds since the logger was created.
    pub elapsed_us: u64,
}

impl LogEntry {
    /// Format as JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }

    /// Format as human-readable string.
    pub fn to_human(&self) -> String {
        let mut s = format!("[{}]", self.level);
        if let Some(route) = &self.route {
            s.push_str(&format!(" {}", route));
        }
        if let Some(phase) = &self.phase {
            s.push_str(&format!(" ({})", phase));
        }
        s.push(' ');
        s.push_str(&self.message);

        if !self.fields.is_empty() {
            let fields: Vec<String> = self
                .fields
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            s.push_str(" | ");
            s.push_str(&fields.join(" "));
        }

        s
    }
}

/// Output format for logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON lines on stderr (for production/log aggregation).
    #[default]
    Json,
    /// Human-readable lines on stderr (for development).
    Human,
    /// Forward to the active `tracing` subscriber.
    Tracing,
}

/// Structured logger with render context.
///
/// Cheap to clone; each render attempt typically derives its own logger
/// with `with_route` / `with_phase`.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    request_id: RequestId,
    route: Option<String>,
    phase: Option<String>,
    start_time: Instant,
    min_level: LogLevel,
    format: LogFormat,
}

impl StructuredLogger {
    /// Create a new logger for a request.
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            route: None,
            phase: None,
            start_time: Instant::now(),
            min_level: LogLevel::Info,
            format: LogFormat::Json,
        }
    }

    /// Set the route being rendered.
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Set the rendering phase.
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// Set minimum log level.
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Set output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Log at debug level.
    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, BTreeMap::new());
    }

    /// Log at info level.
    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, BTreeMap::new());
    }

    /// Log at warn level.
    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message, BTreeMap::new());
    }

    /// Log at error level.
    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message, BTreeMap::new());
    }

    /// Build the entry that would be logged, or `None` if filtered by level.
    pub fn entry(
        &self,
        level: LogLevel,
        message: &str,
        fields: BTreeMap<String, serde_json::Value>,
    ) -> Option<LogEntry> {
        if level < self.min_level {
            return None;
        }

        Some(LogEntry {
            level,
            message: message.to_string(),
            request_id: self.request_id.to_string(),
            route: self.route.clone(),
            phase: self.phase.clone(),
            fields,
            elapsed_us: self.elapsed_us(),
        })
    }

    fn log(&self, level: LogLevel, message: &str, fields: BTreeMap<String, serde_json::Value>) {
        let Some(entry) = self.entry(level, message, fields) else {
            return;
        };

        match self.format {
            LogFormat::Json => eprintln!("{}", entry.to_json()),
            LogFormat::Human => eprintln!("{}", entry.to_human()),
            LogFormat::Tracing => forward_to_tracing(&entry),
        }
    }

    /// Get the request ID.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Get elapsed time since logger creation.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Start building a log entry at the given level.
    pub fn builder(&self, level: LogLevel, message: impl Into<String>) -> LogBuilder<'_> {
        LogBuilder::new(self, level, message)
    }

    /// Start building a warn log entry.
    pub fn warn_builder(&self, message: impl Into<String>) -> LogBuilder<'_> {
        LogBuilder::new(self, LogLevel::Warn, message)
    }

    /// Start building a debug log entry.
    pub fn debug_builder(&self, message: impl Into<String>) -> LogBuilder<'_> {
        LogBuilder::new(self, LogLevel::Debug, message)
    }
}

fn forward_to_tracing(entry: &LogEntry) {
    let route = entry.route.as_deref().unwrap_or("");
    let phase = entry.phase.as_deref().unwrap_or("");
    let fields = serde_json::Value::Object(entry.fields.clone().into_iter().collect());

    match entry.level {
        LogLevel::Trace => tracing::trace!(request_id = %entry.request_id, route, phase, %fields, "{}", entry.message),
        LogLevel::Debug => tracing::debug!(request_id = %entry.request_id, route, phase, %fields, "{}", entry.message),
        LogLevel::Info => tracing::info!(request_id = %entry.request_id, route, phase, %fields, "{}", entry.message),
        LogLevel::Warn => tracing::warn!(request_id = %entry.request_id, route, phase, %fields, "{}", entry.message),
        LogLevel::Error => tracing::error!(request_id = %entry.request_id, route, phase, %fields, "{}", entry.message),
    }
}

/// Builder for log entries with fluent API.
pub struct LogBuilder<'a> {
    logger: &'a StructuredLogger,
    level: LogLevel,
    message: String,
    fields: BTreeMap<String, serde_json::Value>,
}

impl<'a> LogBuilder<'a> {
    /// Create a new log builder.
    pub fn new(logger: &'a StructuredLogger, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            logger,
            level,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a string field.
    pub fn field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields
            .insert(key.to_string(), serde_json::json!(value.into()));
        self
    }

    /// Add an integer field.
    pub fn field_i64(mut self, key: &str, value: i64) -> Self {
        self.fields.insert(key.to_string(), serde_json::json!(value));
        self
    }

    /// Add a boolean field.
    pub fn field_bool(mut self, key: &str, value: bool) -> Self {
        self.fields.insert(key.to_string(), serde_json::json!(value));
        self
    }

    /// Build the entry without emitting it.
    pub fn build(self) -> Option<LogEntry> {
        self.logger.entry(self.level, &self.message, self.fields)
    }

    /// Emit the log entry.
    pub fn emit(self) {
        self.logger.log(self.level, &self.message, self.fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> StructuredLogger {
        StructuredLogger::new(RequestId::from_string("req-1"))
            .with_route("/blog/[slug]")
            .with_phase("request")
    }

    #[test]
    fn test_entry_filtered_below_min_level() {
        let logger = logger().with_min_level(LogLevel::Warn);
        assert!(logger.entry(LogLevel::Info, "hidden", BTreeMap::new()).is_none());
        assert!(logger.entry(LogLevel::Warn, "shown", BTreeMap::new()).is_some());
    }

    #[test]
    fn test_json_contains_context_and_fields() {
        let entry = logger()
            .warn_builder("sync access")
            .field("expression", "cookies().get('x')")
            .field_bool("escalated", false)
            .build()
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&entry.to_json()).unwrap();
        assert_eq!(json["level"], "warn");
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["route"], "/blog/[slug]");
        assert_eq!(json["phase"], "request");
        assert_eq!(json["expression"], "cookies().get('x')");
        assert_eq!(json["escalated"], false);
    }

    #[test]
    fn test_human_format() {
        let entry = logger()
            .builder(LogLevel::Info, "decided")
            .field_i64("revalidate", 0)
            .build()
            .unwrap();
        assert_eq!(
            entry.to_human(),
            "[INFO] /blog/[slug] (request) decided | revalidate=0"
        );
    }
}
