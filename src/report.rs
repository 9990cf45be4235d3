use crate::exc::{self, ExceptionInfo};
use crate::logger::{self, BoundLogger};
use crate::scrub;
use crate::value::Fields;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::error::Error;
use std::sync::{Arc, RwLock};

/// Remote destination for scrubbed error payloads.
///
/// The reporter calls `capture_exception` on the work unit that reported the
/// error, with no retry, queue or added timeout; whatever the transport
/// provides is the only delivery guarantee ("best effort").
#[async_trait]
pub trait ErrorTracker: Send + Sync {
    /// Submit one error payload (shape defined by [`build_payload`], already
    /// scrubbed).
    ///
    /// **Returns**
    /// - `Ok(())` if the tracker accepted the payload.
    /// - `Err(..)` on transport failure. The reporter swallows the error;
    ///   no response contract is relied upon.
    async fn capture_exception(
        &self,
        payload: &serde_json::Value,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;
}

static TRACKER: RwLock<Option<Arc<dyn ErrorTracker>>> = RwLock::new(None);

/// Register the process-wide error tracker. Reporting stays disabled (and
/// [`report`] a no-op) until a tracker is registered.
pub fn set_error_tracker(tracker: Arc<dyn ErrorTracker>) {
    if let Ok(mut slot) = TRACKER.write() {
        *slot = Some(tracker);
    }
}

/// Disable remote reporting process-wide.
pub fn disable_error_reporting() {
    if let Ok(mut slot) = TRACKER.write() {
        *slot = None;
    }
}

pub fn reporting_enabled() -> bool {
    TRACKER.read().map(|slot| slot.is_some()).unwrap_or(false)
}

fn current_tracker() -> Option<Arc<dyn ErrorTracker>> {
    TRACKER.read().ok().and_then(|slot| slot.clone())
}

/// Capture an exception and hand the scrubbed payload to the registered
/// tracker.
///
/// When `exception_info` is `None` the ambient current error is used; with
/// neither, a bare payload (context only) is still submitted. Submission
/// failures are swallowed; remote reporting is best-effort and must never
/// crash the caller.
pub async fn report(exception_info: Option<ExceptionInfo>, context: Fields) {
    let tracker = match current_tracker() {
        Some(tracker) => tracker,
        None => return,
    };

    let info = exception_info.or_else(exc::current_error);
    let mut payload = build_payload(info.as_ref(), &context);
    scrub::scrub_error_payload(&mut payload);
    let _ = tracker.capture_exception(&payload).await;
}

/// Log an error-severity record with full exception info, then report the
/// same context remotely. Used as the top-level handler for errors that
/// escape all other recovery.
pub async fn log_uncaught(logger: Option<&BoundLogger>, context: Fields) {
    let default_logger;
    let logger = match logger {
        Some(logger) => logger,
        None => {
            default_logger = logger::get_logger();
            &default_logger
        }
    };
    logger.exception("Uncaught error", context.clone());
    report(None, context).await;
}

/// Error-tracking payload for an optional exception plus caller context.
/// Shape: `exception.values[]` entries with `type`, `value` and
/// `stacktrace.frames[]` (module/filename/lineno/vars), caller context under
/// `extra`.
pub fn build_payload(info: Option<&ExceptionInfo>, context: &Fields) -> serde_json::Value {
    let extra: serde_json::Map<String, serde_json::Value> = context
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect();

    let mut payload = json!({
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        "platform": "rust",
        "extra": extra,
    });

    if let Some(info) = info {
        let frames: Vec<serde_json::Value> = info
            .frames
            .iter()
            .map(|frame| {
                let vars: serde_json::Map<String, serde_json::Value> = frame
                    .vars
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect();
                json!({
                    "module": frame.module,
                    "filename": frame.file,
                    "lineno": frame.line,
                    "vars": vars,
                })
            })
            .collect();

        payload["exception"] = json!({
            "values": [{
                "type": info.name,
                "value": info.message,
                "stacktrace": { "frames": frames },
            }]
        });
    }

    payload
}
