use crate::level::Level;
use crate::logger;
use crate::value::{Fields, Value};
use tracing::field::{Field, Visit};
use tracing::{Event as TracingEvent, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// `tracing_subscriber` layer that routes ecosystem `tracing` events through
/// the record enrichment pipeline, so third-party libraries land in the same
/// JSON stream as direct [`crate::logger::BoundLogger`] calls.
///
/// Severity filtering is left to the pipeline's level-filter stage, so the
/// bridge honors reconfiguration without being reinstalled.
pub struct PipelineBridge;

impl<S> Layer<S> for PipelineBridge
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &TracingEvent, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let level = Level::from_tracing(meta.level());

        let mut fields = Fields::new();
        let mut message: Option<String> = None;
        let mut visitor = FieldVisitor {
            fields: &mut fields,
            message: &mut message,
        };
        event.record(&mut visitor);

        fields.insert(
            "target".to_string(),
            Value::Text(meta.target().to_string()),
        );

        let message = message.unwrap_or_else(|| meta.name().to_string());
        logger::get_logger().log_with(level, &message, fields, None, false);
    }
}

/// Collects a `tracing` event's fields into the pipeline's [`Value`] model,
/// splitting out the `message` field as the event text.
pub struct FieldVisitor<'a> {
    pub fields: &'a mut Fields,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), Value::Text(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::Int(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::Uint(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::Float(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields
                .insert(field.name().to_string(), Value::Text(format!("{:?}", value)));
        }
    }
}

