use crate::config::{self, OutputFormat};
use crate::env;
use crate::exc::{self, ExcInfo, ExceptionInfo};
use crate::level::Level;
use crate::pipeline;
use crate::record::Event;
use crate::value::{Fields, Value};

/// A logger with no bound context. Cheap to construct per call site.
pub fn get_logger() -> BoundLogger {
    BoundLogger::default()
}

/// Per-call entry point into the enrichment pipeline.
///
/// Every call merges the bound context with the caller's fields, injects the
/// concurrency-unit identifier (`task_id`) and the environment tag (`env`,
/// when the process environment names one), then feeds the pipeline. Exactly
/// one line reaches the configured sink per call, or zero when the record is
/// filtered by severity.
#[derive(Debug, Clone, Default)]
pub struct BoundLogger {
    context: Fields,
}

impl BoundLogger {
    /// Return a logger carrying additional persistent context fields.
    /// Per-call fields win over bound ones on collision.
    pub fn bind(mut self, fields: Fields) -> Self {
        for (key, value) in fields {
            self.context.insert(key, value);
        }
        self
    }

    pub fn debug(&self, event: &str, fields: Fields) {
        self.log_with(Level::Debug, event, fields, None, false);
    }

    pub fn info(&self, event: &str, fields: Fields) {
        self.log_with(Level::Info, event, fields, None, false);
    }

    pub fn warning(&self, event: &str, fields: Fields) {
        self.log_with(Level::Warning, event, fields, None, false);
    }

    pub fn error(&self, event: &str, fields: Fields) {
        self.log_with(Level::Error, event, fields, None, false);
    }

    pub fn critical(&self, event: &str, fields: Fields) {
        self.log_with(Level::Critical, event, fields, None, false);
    }

    /// Error-severity record that renders the currently-active error (see
    /// [`crate::exc::set_current_error`]) into the `exception` field. When no
    /// current error is recorded the field is silently omitted.
    pub fn exception(&self, event: &str, fields: Fields) {
        self.log_with(Level::Error, event, fields, Some(ExcInfo::Current), false);
    }

    /// Error-severity record for an explicit error value. Breaks the error
    /// into the stable `error_name`/`error_message`/`error_traceback` fields;
    /// explicit caller fields override the generated ones.
    pub fn error_with<E: std::error::Error>(&self, event: &str, err: &E, fields: Fields) {
        let info = ExceptionInfo::from_error(err);
        self.error_info(event, &info, fields);
    }

    /// Like [`BoundLogger::error_with`], for an already-captured
    /// [`ExceptionInfo`].
    pub fn error_info(&self, event: &str, info: &ExceptionInfo, fields: Fields) {
        let mut merged = exc::error_log_context(info);
        for (key, value) in fields {
            merged.insert(key, value);
        }
        self.log_with(Level::Error, event, merged, None, false);
    }

    /// Low-level emission with explicit exception-info and stack requests.
    pub fn log_with(
        &self,
        level: Level,
        event: &str,
        fields: Fields,
        exc_info: Option<ExcInfo>,
        include_stack: bool,
    ) {
        let state = config::state();
        if level < state.min_level {
            return;
        }

        let mut record = Event::new(level, event);
        record.extend(self.context.clone());
        record.extend(fields);
        // The positional message always wins over an `event` context field.
        record.insert("event", Value::Text(event.to_string()));
        record.insert("task_id", Value::Text(concurrency_unit_id()));
        if let Ok(env_name) = std::env::var(env::ENV_TAG_ENV) {
            record.insert("env", Value::Text(env_name));
        }
        record.exc_info = exc_info;
        record.include_stack = include_stack;

        let Some(line) = state.pipeline.run(record) else {
            return;
        };
        let line = match state.format {
            OutputFormat::Json => line,
            OutputFormat::Human { ansi } => pipeline::render_human(level, &line, ansi),
        };
        // Sink failures are swallowed; logging must never crash the caller.
        let _ = state.sink.emit(&line);
    }
}

/// Identifier of the current lightweight work unit, for correlating
/// interleaved log lines: the tokio task id inside a runtime, the OS thread
/// id otherwise.
fn concurrency_unit_id() -> String {
    match tokio::task::try_id() {
        Some(id) => format!("task-{}", id),
        None => format!("{:?}", std::thread::current().id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_unit_id_outside_runtime_is_thread_id() {
        let id = concurrency_unit_id();
        assert!(id.starts_with("ThreadId"), "got {}", id);
    }

    #[test]
    fn bind_layers_context() {
        let log = get_logger().bind(crate::fields! { "request_id" => "abc" });
        assert_eq!(
            log.context["request_id"],
            Value::Text("abc".to_string())
        );
    }
}
