use crate::frames;
use crate::value::{Fields, Value};
use backtrace::Backtrace;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;

/// Cap applied to the exception summary line (and to exception values in the
/// error-tracking payload). Some library errors embed enormous diagnostic
/// payloads that would otherwise bloat log storage unboundedly.
pub const MAX_EXCEPTION_LENGTH: usize = 10_000;

/// Frames captured per exception; deep stacks are cut here, the formatter's
/// own `limit` can cut further.
const MAX_CAPTURED_FRAMES: usize = 50;

/// One frame of a normalized exception traceback.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TraceFrame {
    pub module: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    /// Snapshot of known-relevant local values, attached by the caller.
    /// Scrubbed down to the whitelist before any remote transmission.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, Value>,
}

/// Normalized exception information: type name, message and traceback.
///
/// Ephemeral: captured at the moment of a logging call or capture request
/// and consumed immediately by the formatter or the error reporter.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExceptionInfo {
    pub name: String,
    pub message: String,
    pub frames: Vec<TraceFrame>,
}

impl ExceptionInfo {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        ExceptionInfo {
            name: name.into(),
            message: message.into(),
            frames: Vec::new(),
        }
    }

    /// Capture an error value together with the current call stack. The
    /// recorded name is the error's short type name, which keeps the
    /// `error_name` field stable for aggregation.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        ExceptionInfo {
            name: short_type_name(std::any::type_name::<E>()),
            message: err.to_string(),
            frames: capture_frames(),
        }
    }

    /// Capture a panic payload. Panic hooks hand us an opaque `Any`; only
    /// `&str` and `String` payloads carry a usable message.
    pub fn from_panic(
        payload: &(dyn std::any::Any + Send),
        location: Option<(&str, u32)>,
    ) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };

        let mut frames = capture_frames();
        if let Some((file, line)) = location {
            frames.insert(
                0,
                TraceFrame {
                    module: None,
                    file: Some(file.to_string()),
                    line: Some(line),
                    vars: BTreeMap::new(),
                },
            );
        }

        ExceptionInfo {
            name: "panic".to_string(),
            message,
            frames,
        }
    }

    pub fn with_frame(mut self, frame: TraceFrame) -> Self {
        self.frames.push(frame);
        self
    }

    /// Attach a local-value snapshot to the innermost frame, creating a
    /// synthetic frame when no traceback was captured.
    pub fn with_var(mut self, key: impl Into<String>, value: Value) -> Self {
        if self.frames.is_empty() {
            self.frames.push(TraceFrame::default());
        }
        self.frames[0].vars.insert(key.into(), value);
        self
    }
}

/// Render an exception as one text block: a traceback header, one line per
/// frame (at most `limit` when given), then the `name: message` summary.
///
/// Only the first summary line is truncated to [`MAX_EXCEPTION_LENGTH`]
/// characters; subsequent summary lines and the traceback body pass through
/// unchanged, so multi-line messages survive intact.
pub fn format_exception(info: &ExceptionInfo, limit: Option<usize>) -> String {
    let mut out = String::new();

    if !info.frames.is_empty() {
        out.push_str("Traceback (most recent call last):\n");
        let depth = limit.unwrap_or(info.frames.len()).min(info.frames.len());
        for frame in &info.frames[..depth] {
            out.push_str("  at ");
            out.push_str(frame.module.as_deref().unwrap_or("?"));
            out.push_str(" (");
            out.push_str(frame.file.as_deref().unwrap_or("?"));
            out.push(':');
            match frame.line {
                Some(line) => out.push_str(&line.to_string()),
                None => out.push('?'),
            }
            out.push_str(")\n");
        }
    }

    let summary = if info.message.is_empty() {
        info.name.clone()
    } else {
        format!("{}: {}", info.name, info.message)
    };
    match summary.split_once('\n') {
        Some((first, rest)) => {
            out.push_str(&truncate_chars(first, MAX_EXCEPTION_LENGTH));
            out.push('\n');
            out.push_str(rest);
        }
        None => out.push_str(&truncate_chars(&summary, MAX_EXCEPTION_LENGTH)),
    }

    out
}

/// Break an exception into the stable fields used for aggregation of
/// similar error types: `error_name`, `error_message`, `error_traceback`.
pub fn error_log_context(info: &ExceptionInfo) -> Fields {
    let mut fields = Fields::new();
    fields.insert("error_name".to_string(), Value::Text(info.name.clone()));
    fields.insert("error_message".to_string(), Value::Text(info.message.clone()));
    fields.insert(
        "error_traceback".to_string(),
        Value::Text(format_exception(info, None)),
    );
    fields
}

/// Truncate to a character count, not a byte count, so multi-byte text never
/// splits inside a code point.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn capture_frames() -> Vec<TraceFrame> {
    let backtrace = Backtrace::new();
    let mut frames = Vec::new();
    let mut started = false;

    'outer: for frame in backtrace.frames() {
        for symbol in frame.symbols() {
            let module = symbol
                .name()
                .map(|n| n.to_string())
                .and_then(|n| frames::symbol_path(&n));
            // Drop the leading run of capture/logging machinery so the
            // traceback starts at the code that held the error.
            if !started {
                match &module {
                    Some(m) if frames::is_ignored(m, &[]) => continue,
                    None => continue,
                    _ => started = true,
                }
            }
            frames.push(TraceFrame {
                module,
                file: symbol.filename().map(|p| p.display().to_string()),
                line: symbol.lineno(),
                vars: BTreeMap::new(),
            });
            if frames.len() >= MAX_CAPTURED_FRAMES {
                break 'outer;
            }
        }
    }

    frames
}

/// Short type name: the final path segment, with path prefixes inside
/// generic parameters stripped as well, so
/// `core::num::ParseIntError` becomes `ParseIntError`.
fn short_type_name(full: &str) -> String {
    let mut out = String::new();
    let mut segment = String::new();
    for c in full.chars() {
        match c {
            ':' => segment.clear(),
            '<' | '>' | ',' | ' ' => {
                out.push_str(&segment);
                out.push(c);
                segment.clear();
            }
            _ => segment.push(c),
        }
    }
    out.push_str(&segment);
    out
}

/// Exception-info request attached to an event: either an explicit capture
/// or a flag meaning "use the currently-active error".
#[derive(Debug, Clone, PartialEq)]
pub enum ExcInfo {
    /// Resolve from the ambient current-error slot at pipeline time.
    Current,
    Caught(ExceptionInfo),
}

thread_local! {
    static CURRENT_ERROR: RefCell<Option<ExceptionInfo>> = const { RefCell::new(None) };
}

/// Record `err` as the current error for this thread. Outermost error
/// handlers call this before logging with the ambient-exception flag.
pub fn set_current_error(info: ExceptionInfo) {
    CURRENT_ERROR.with(|slot| *slot.borrow_mut() = Some(info));
}

/// Clone of the current error, if any. Empty outside error handling; the
/// exception-info stage then omits the field rather than failing.
pub fn current_error() -> Option<ExceptionInfo> {
    CURRENT_ERROR.with(|slot| slot.borrow().clone())
}

pub fn clear_current_error() {
    CURRENT_ERROR.with(|slot| *slot.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct ValueError(String);

    #[test]
    fn summary_line_is_truncated_to_cap() {
        let info = ExceptionInfo::new("DataError", "x".repeat(12_000));
        let rendered = format_exception(&info, None);
        // "DataError: " prefix counts toward the capped summary line.
        assert_eq!(rendered.chars().count(), MAX_EXCEPTION_LENGTH);
        assert!(rendered.starts_with("DataError: xxx"));
    }

    #[test]
    fn multi_line_summary_only_first_line_truncated() {
        let message = format!("{}\nsecond line\nthird line", "y".repeat(12_000));
        let info = ExceptionInfo::new("SyntaxError", message);
        let rendered = format_exception(&info, None);
        let mut lines = rendered.lines();
        assert_eq!(lines.next().unwrap().chars().count(), MAX_EXCEPTION_LENGTH);
        assert_eq!(lines.next(), Some("second line"));
        assert_eq!(lines.next(), Some("third line"));
    }

    #[test]
    fn traceback_lines_never_truncated() {
        let long_file = "f".repeat(20_000);
        let info = ExceptionInfo::new("Error", "boom").with_frame(TraceFrame {
            module: Some("myapp".to_string()),
            file: Some(long_file.clone()),
            line: Some(1),
            vars: BTreeMap::new(),
        });
        let rendered = format_exception(&info, None);
        assert!(rendered.contains(&long_file));
        assert!(rendered.starts_with("Traceback (most recent call last):\n"));
        assert!(rendered.ends_with("Error: boom"));
    }

    #[test]
    fn depth_limit_caps_frames() {
        let mut info = ExceptionInfo::new("Error", "boom");
        for i in 0..5 {
            info = info.with_frame(TraceFrame {
                module: Some(format!("m{}", i)),
                ..TraceFrame::default()
            });
        }
        let rendered = format_exception(&info, Some(2));
        assert!(rendered.contains("m0"));
        assert!(rendered.contains("m1"));
        assert!(!rendered.contains("m2"));
    }

    #[test]
    fn empty_message_renders_bare_name() {
        let info = ExceptionInfo::new("Interrupted", "");
        assert_eq!(format_exception(&info, None), "Interrupted");
    }

    #[test]
    fn from_error_uses_short_type_name() {
        let err = ValueError("Test message".to_string());
        let info = ExceptionInfo::from_error(&err);
        assert_eq!(info.name, "ValueError");
        assert_eq!(info.message, "Test message");
    }

    #[test]
    fn short_type_name_handles_generics() {
        assert_eq!(short_type_name("core::num::ParseIntError"), "ParseIntError");
        assert_eq!(
            short_type_name("module::Wrapper<alloc::string::String>"),
            "Wrapper<String>"
        );
    }

    #[test]
    fn error_context_fields() {
        let info = ExceptionInfo::new("ValueError", "Test message");
        let ctx = error_log_context(&info);
        assert_eq!(ctx["error_name"], Value::Text("ValueError".to_string()));
        assert_eq!(ctx["error_message"], Value::Text("Test message".to_string()));
        assert!(matches!(&ctx["error_traceback"], Value::Text(t) if !t.is_empty()));
    }

    #[test]
    fn panic_payload_capture() {
        let info = ExceptionInfo::from_panic(&"boom", Some(("src/main.rs", 7)));
        assert_eq!(info.name, "panic");
        assert_eq!(info.message, "boom");
        assert_eq!(info.frames[0].file.as_deref(), Some("src/main.rs"));
        assert_eq!(info.frames[0].line, Some(7));

        let opaque = ExceptionInfo::from_panic(&42u32, None);
        assert_eq!(opaque.message, "Box<dyn Any>");
    }

    #[test]
    fn current_error_slot_round_trip() {
        clear_current_error();
        assert!(current_error().is_none());
        set_current_error(ExceptionInfo::new("ValueError", "Test message"));
        let current = current_error().unwrap();
        assert_eq!(current.name, "ValueError");
        clear_current_error();
        assert!(current_error().is_none());
    }

    #[test]
    fn with_var_attaches_to_innermost_frame() {
        let info = ExceptionInfo::new("Error", "boom")
            .with_var("account_id", Value::Text("1".to_string()));
        assert_eq!(
            info.frames[0].vars["account_id"],
            Value::Text("1".to_string())
        );
    }
}
