use crate::bridge::PipelineBridge;
use crate::exc::{self, ExceptionInfo};
use crate::level::Level;
use crate::pipeline::Pipeline;
use crate::sink::{RecordSink, StdoutSink};
use std::io::IsTerminal;
use std::sync::{Arc, Once, RwLock};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// How rendered records are written out: line-delimited JSON for
/// non-interactive processes, a colored human wrapper on a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Human { ansi: bool },
}

/// Process-wide logging state: the configured threshold, the enrichment
/// pipeline built for it, the active sink and the output format. Replaced
/// wholesale by every configuration call, so repeated configuration never
/// duplicates a sink.
pub struct LoggingState {
    pub min_level: Level,
    pub pipeline: Pipeline,
    pub sink: Arc<dyn RecordSink>,
    pub format: OutputFormat,
}

/// Explicit configuration for [`configure_logging_with`].
///
/// **Fields**
/// - `level`: minimum severity; `None` means Info.
/// - `sink`: target for rendered lines; `None` means standard output.
/// - `format`: output format; `None` infers from whether stdout is a TTY.
/// - `extra_ignores`: additional module prefixes the frame locator skips
///   when attributing the call site (ORM layers, framework internals).
/// - `install_panic_hook`: replace the default panic output with a
///   structured JSON error record.
pub struct LogConfig {
    pub level: Option<Level>,
    pub sink: Option<Arc<dyn RecordSink>>,
    pub format: Option<OutputFormat>,
    pub extra_ignores: Vec<String>,
    pub install_panic_hook: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: None,
            sink: None,
            format: None,
            extra_ignores: Vec::new(),
            install_panic_hook: true,
        }
    }
}

static STATE: RwLock<Option<Arc<LoggingState>>> = RwLock::new(None);
static INSTALL_SUBSCRIBER: Once = Once::new();
static INSTALL_PANIC_HOOK: Once = Once::new();

/// Idempotently configure logging.
///
/// Infers the output format based on whether stdout is a TTY. Sets the
/// threshold to Info if not otherwise specified. Overrides top-level panics
/// to also print as JSON, rather than the default plaintext trace on stderr.
/// Safe to call multiple times; each call replaces the previous sink and
/// threshold instead of stacking them.
pub fn configure_logging(level: Option<Level>) {
    configure_logging_with(LogConfig {
        level,
        ..LogConfig::default()
    });
}

/// Configure logging from an explicit [`LogConfig`]. The `tracing` bridge
/// subscriber is installed once, on the first call in the process.
pub fn configure_logging_with(config: LogConfig) {
    let min_level = config.level.unwrap_or(Level::Info);
    let format = config.format.unwrap_or_else(detect_format);
    let sink = config
        .sink
        .unwrap_or_else(|| Arc::new(StdoutSink) as Arc<dyn RecordSink>);
    let pipeline = Pipeline::standard(min_level, config.extra_ignores);

    let state = Arc::new(LoggingState {
        min_level,
        pipeline,
        sink,
        format,
    });
    if let Ok(mut slot) = STATE.write() {
        *slot = Some(state);
    }

    if config.install_panic_hook {
        INSTALL_PANIC_HOOK.call_once(install_panic_hook);
    }
    INSTALL_SUBSCRIBER.call_once(|| {
        let subscriber = Registry::default().with(PipelineBridge);
        // Another subscriber may already be installed (tests, embedding
        // applications); the pipeline still works without the bridge.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Current state, configuring defaults on first use.
pub(crate) fn state() -> Arc<LoggingState> {
    if let Some(state) = read_state() {
        return state;
    }
    configure_logging(None);
    read_state().unwrap_or_else(|| {
        // Reachable only with a poisoned lock; run unregistered defaults.
        Arc::new(LoggingState {
            min_level: Level::Info,
            pipeline: Pipeline::standard(Level::Info, Vec::new()),
            sink: Arc::new(StdoutSink),
            format: OutputFormat::Json,
        })
    })
}

fn read_state() -> Option<Arc<LoggingState>> {
    STATE.read().ok().and_then(|guard| guard.clone())
}

fn detect_format() -> OutputFormat {
    if std::io::stdout().is_terminal() {
        OutputFormat::Human {
            ansi: std::env::var_os("NO_COLOR").is_none(),
        }
    } else {
        OutputFormat::Json
    }
}

/// Uncaught-exception hook: intercepts otherwise-unhandled panics and emits
/// them as a structured JSON error record.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info.location().map(|l| (l.file(), l.line()));
        let captured = ExceptionInfo::from_panic(info.payload(), location);
        exc::set_current_error(captured.clone());
        let fields = exc::error_log_context(&captured);
        crate::logger::get_logger().log_with(
            Level::Error,
            "Uncaught exception",
            fields,
            None,
            false,
        );
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    // Single test: the state is process-global, and parallel mutation would
    // make the assertions racy.
    #[test]
    fn reconfigure_replaces_threshold_and_sink() {
        let first = MemorySink::new();
        configure_logging_with(LogConfig {
            level: Some(Level::Error),
            sink: Some(Arc::new(first.clone())),
            format: Some(OutputFormat::Json),
            ..LogConfig::default()
        });
        assert_eq!(state().min_level, Level::Error);

        let second = MemorySink::new();
        configure_logging_with(LogConfig {
            level: Some(Level::Critical),
            sink: Some(Arc::new(second.clone())),
            format: Some(OutputFormat::Json),
            ..LogConfig::default()
        });
        assert_eq!(state().min_level, Level::Critical);

        // Only the most recent sink is active.
        crate::logger::get_logger().critical("boom", crate::fields!());
        assert!(first.lines().is_empty());
        assert_eq!(second.lines().len(), 1);

        configure_logging(None);
        assert_eq!(state().min_level, Level::Info);
    }
}
