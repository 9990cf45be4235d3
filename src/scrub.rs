use crate::exc::{truncate_chars, MAX_EXCEPTION_LENGTH};
use serde_json::Value;

/// Local-variable names safe to keep in an error payload. Stack-local values
/// routinely contain personally-identifiable data (message bodies, tokens);
/// only these correlation identifiers survive scrubbing.
pub const SCRUB_WHITELIST: &[&str] = &["account_id", "message_id"];

/// Scrub an error-tracking payload in place before transmission.
///
/// Expects the capture shape `exception.values[]`, each entry with a `value`
/// string and an optional `stacktrace.frames[]` list whose frames carry a
/// `vars` mapping:
/// - every `value` is truncated to [`MAX_EXCEPTION_LENGTH`] characters;
/// - every `vars` key outside [`SCRUB_WHITELIST`] is removed.
///
/// Missing `exception`, `values`, `stacktrace` or `vars` leave the payload
/// unchanged; the shape varies with the exception type, so absence is not an
/// error.
pub fn scrub_error_payload(data: &mut Value) {
    let values = match data
        .get_mut("exception")
        .and_then(|e| e.get_mut("values"))
        .and_then(Value::as_array_mut)
    {
        Some(values) => values,
        None => return,
    };

    for item in values {
        truncate_value(item);
        scrub_frames(item);
    }
}

fn truncate_value(item: &mut Value) {
    if let Some(text) = item.get("value").and_then(Value::as_str) {
        if text.chars().count() > MAX_EXCEPTION_LENGTH {
            let truncated = truncate_chars(text, MAX_EXCEPTION_LENGTH);
            item["value"] = Value::String(truncated);
        }
    }
}

fn scrub_frames(item: &mut Value) {
    let frames = match item
        .get_mut("stacktrace")
        .and_then(|s| s.get_mut("frames"))
        .and_then(Value::as_array_mut)
    {
        Some(frames) => frames,
        None => return,
    };

    for frame in frames {
        let vars = match frame.get_mut("vars").and_then(Value::as_object_mut) {
            Some(vars) => vars,
            None => continue,
        };
        let removed: Vec<String> = vars
            .keys()
            .filter(|key| !SCRUB_WHITELIST.contains(&key.as_str()))
            .cloned()
            .collect();
        for key in removed {
            vars.remove(&key);
        }
    }
}
