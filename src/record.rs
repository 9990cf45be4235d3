use crate::exc::ExcInfo;
use crate::level::Level;
use crate::value::{Fields, Value};

/// Mutable structured event flowing through the enrichment pipeline.
///
/// Built fresh for every logging call. The field map starts with the caller's
/// message under `event` plus any bound/per-call fields; pipeline stages add
/// `timestamp`, `module`, `level` and the optional `exception`/`stack` fields
/// before serialization.
#[derive(Debug, Clone)]
pub struct Event {
    pub level: Level,
    pub fields: Fields,
    /// Pending exception-info request, consumed by the exception-info stage.
    pub exc_info: Option<ExcInfo>,
    /// Caller asked for a rendered stack trace of the call site.
    pub include_stack: bool,
}

impl Event {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        let mut fields = Fields::new();
        fields.insert("event".to_string(), Value::Text(message.into()));
        Event {
            level,
            fields,
            exc_info: None,
            include_stack: false,
        }
    }

    /// Merge `extra` into the event; on key collision the incoming value
    /// wins (last write wins).
    pub fn extend(&mut self, extra: Fields) {
        for (key, value) in extra {
            self.fields.insert(key, value);
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }
}
