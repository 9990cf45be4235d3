use crate::exc::{self, ExcInfo};
use crate::frames;
use crate::level::Level;
use crate::record::Event;
use crate::value::Value;
use chrono::{SecondsFormat, Utc};

/// Outcome of one enrichment stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    /// Stop the pipeline and emit nothing for this event.
    Drop,
}

/// One step of the record enrichment pipeline. Stages mutate the event in
/// place and must never fail past their boundary: a stage either substitutes
/// a safe default or omits its field.
pub trait Stage: Send + Sync {
    fn apply(&self, event: &mut Event) -> Control;
}

/// Drops events below the process-wide minimum severity before any further
/// enrichment runs.
pub struct LevelFilter {
    pub min_level: Level,
}

impl Stage for LevelFilter {
    fn apply(&self, event: &mut Event) -> Control {
        if event.level < self.min_level {
            Control::Drop
        } else {
            Control::Continue
        }
    }
}

/// Attaches the current UTC time as ISO-8601 text with microsecond
/// precision.
pub struct Timestamper;

impl Stage for Timestamper {
    fn apply(&self, event: &mut Event) -> Control {
        event.insert(
            "timestamp",
            Value::Text(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        Control::Continue
    }
}

/// Attaches a rendered stack trace when the caller asked for one.
pub struct StackInfoRenderer {
    pub extra_ignores: Vec<String>,
}

impl Stage for StackInfoRenderer {
    fn apply(&self, event: &mut Event) -> Control {
        if event.include_stack {
            event.insert("stack", Value::Text(frames::render_stack(&self.extra_ignores)));
        }
        Control::Continue
    }
}

/// Resolves a pending exception-info request into the formatted `exception`
/// field. The ambient-exception form fails silently (field omitted) when no
/// current error is recorded.
pub struct ExcInfoRenderer;

impl Stage for ExcInfoRenderer {
    fn apply(&self, event: &mut Event) -> Control {
        let info = match event.exc_info.take() {
            Some(ExcInfo::Caught(info)) => Some(info),
            Some(ExcInfo::Current) => exc::current_error(),
            None => None,
        };
        if let Some(info) = info {
            event.insert("exception", Value::Text(exc::format_exception(&info, None)));
        }
        Control::Continue
    }
}

/// Replaces every bytes value, recursively, with lossily decoded UTF-8 text.
/// Undecodable sequences become U+FFFD; decoding failures are masked, never
/// propagated. Non-text values pass through unchanged.
pub struct EncodingSafety;

impl EncodingSafety {
    fn normalize(value: &mut Value) {
        match value {
            Value::Bytes(bytes) => {
                let decoded = Value::decoded(bytes);
                *value = decoded;
            }
            Value::Seq(items) => {
                for item in items {
                    Self::normalize(item);
                }
            }
            Value::Map(entries) => {
                for entry in entries.values_mut() {
                    Self::normalize(entry);
                }
            }
            _ => {}
        }
    }
}

impl Stage for EncodingSafety {
    fn apply(&self, event: &mut Event) -> Control {
        for value in event.fields.values_mut() {
            Self::normalize(value);
        }
        Control::Continue
    }
}

/// Attaches `module` as `name:line` of the nearest application frame.
/// Recomputed fresh per call; call sites vary, so this is never cached.
pub struct ModuleRecorder {
    pub extra_ignores: Vec<String>,
}

impl Stage for ModuleRecorder {
    fn apply(&self, event: &mut Event) -> Control {
        let site = frames::find_first_app_frame(&self.extra_ignores);
        event.insert("module", Value::Text(site.display()));
        Control::Continue
    }
}

/// Attaches the severity name as the `level` text field.
pub struct LevelName;

impl Stage for LevelName {
    fn apply(&self, event: &mut Event) -> Control {
        event.insert("level", Value::Text(event.level.as_str().to_string()));
        Control::Continue
    }
}

/// Fixed, ordered chain of enrichment stages. Order is significant:
/// encoding safety must run after exception formatting (so the rendered
/// traceback is itself normalized) and before serialization.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// The standard stage chain applied to every emitted record.
    pub fn standard(min_level: Level, extra_ignores: Vec<String>) -> Self {
        Pipeline {
            stages: vec![
                Box::new(LevelFilter { min_level }),
                Box::new(Timestamper),
                Box::new(StackInfoRenderer {
                    extra_ignores: extra_ignores.clone(),
                }),
                Box::new(ExcInfoRenderer),
                Box::new(EncodingSafety),
                Box::new(ModuleRecorder { extra_ignores }),
                Box::new(LevelName),
            ],
        }
    }

    /// Run all stages over the event. Returns `false` when a stage dropped
    /// the record.
    pub fn process(&self, event: &mut Event) -> bool {
        for stage in &self.stages {
            if let Control::Drop = stage.apply(event) {
                return false;
            }
        }
        true
    }

    /// Run the stages and render the surviving record as a single-line JSON
    /// object. A serialization failure is masked as a dropped record; no
    /// stage may raise past the pipeline boundary.
    pub fn run(&self, mut event: Event) -> Option<String> {
        if !self.process(&mut event) {
            return None;
        }
        render_json(&event)
    }
}

/// Serialization stage: one JSON object per line, unique keys.
pub fn render_json(event: &Event) -> Option<String> {
    serde_json::to_string(&event.fields).ok()
}

const COLOR_RESET: &str = "\x1b[0m";

fn level_color(level: Level) -> &'static str {
    match level {
        Level::Debug => "\x1b[36m",                  // cyan
        Level::Info => "\x1b[32m",                   // green
        Level::Warning => "\x1b[33m",                // yellow
        Level::Error | Level::Critical => "\x1b[31m", // red
    }
}

/// Interactive-terminal wrapper around a rendered line: a colored
/// `[LEVEL]` tag followed by the record itself.
pub fn render_human(level: Level, line: &str, ansi: bool) -> String {
    let tag = level.as_str().to_uppercase();
    if ansi {
        format!("{}[{}]{} {}", level_color(level), tag, COLOR_RESET, line)
    } else {
        format!("[{}] {}", tag, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exc::ExceptionInfo;
    use crate::fields;

    fn run_standard(event: Event) -> Option<serde_json::Value> {
        let pipeline = Pipeline::standard(Level::Debug, Vec::new());
        pipeline.run(event).map(|line| {
            serde_json::from_str(&line).expect("pipeline output must be valid JSON")
        })
    }

    #[test]
    fn below_threshold_is_dropped_entirely() {
        let pipeline = Pipeline::standard(Level::Warning, Vec::new());
        assert!(pipeline.run(Event::new(Level::Info, "Hi")).is_none());
    }

    #[test]
    fn plain_info_record_shape() {
        let record = run_standard(Event::new(Level::Info, "Hi")).unwrap();
        assert_eq!(record["event"], "Hi");
        assert_eq!(record["level"], "info");
        assert!(record["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(record["module"].as_str().unwrap().contains(':'));
        assert!(record.get("exception").is_none());
        assert!(record.get("error_name").is_none());
        assert!(record.get("error_message").is_none());
    }

    #[test]
    fn encoding_stage_masks_undecodable_bytes() {
        let mut event = Event::new(Level::Info, "Hi");
        // "une chaîne pas comme les autres" in latin-1: î is 0xEE.
        event.insert("s", Value::Bytes(b"une cha\xeene pas comme les autres".to_vec()));
        // "På gensyn!" in cp865: å is 0x86.
        event.insert("s2", Value::Bytes(b"P\x86 gensyn!".to_vec()));
        event.insert("nested", Value::Seq(vec![Value::Bytes(vec![0xff, b'a'])]));

        let record = run_standard(event).unwrap();
        assert_eq!(record["s"], "une cha\u{fffd}ne pas comme les autres");
        assert_eq!(record["s2"], "P\u{fffd} gensyn!");
        assert_eq!(record["nested"][0], "\u{fffd}a");
    }

    #[test]
    fn encoding_stage_leaves_valid_values_untouched() {
        let mut event = Event::new(Level::Info, "Hi");
        event.insert("ascii_string", Value::Text("ascii_str".to_string()));
        event.insert("count", Value::Int(3));
        event.insert(
            "regular_object",
            Value::Seq(vec![Value::Text("has strings inside".to_string())]),
        );

        let record = run_standard(event).unwrap();
        assert_eq!(record["ascii_string"], "ascii_str");
        assert_eq!(record["count"], 3);
        assert_eq!(record["regular_object"][0], "has strings inside");
    }

    #[test]
    fn exc_info_stage_renders_exception_field() {
        let mut event = Event::new(Level::Error, "Oh no");
        event.exc_info = Some(ExcInfo::Caught(ExceptionInfo::new(
            "ValueError",
            "Test message",
        )));
        let record = run_standard(event).unwrap();
        assert_eq!(record["exception"], "ValueError: Test message");
    }

    #[test]
    fn ambient_flag_with_no_current_error_omits_field() {
        exc::clear_current_error();
        let mut event = Event::new(Level::Error, "Oh no");
        event.exc_info = Some(ExcInfo::Current);
        let record = run_standard(event).unwrap();
        assert!(record.get("exception").is_none());
    }

    #[test]
    fn stack_info_only_on_request() {
        let record = run_standard(Event::new(Level::Info, "Hi")).unwrap();
        assert!(record.get("stack").is_none());

        let mut event = Event::new(Level::Info, "Hi");
        event.include_stack = true;
        let record = run_standard(event).unwrap();
        assert!(record.get("stack").is_some());
    }

    #[test]
    fn later_writes_win_over_caller_fields() {
        let mut event = Event::new(Level::Info, "Hi");
        event.extend(fields! { "level" => "bogus" });
        let record = run_standard(event).unwrap();
        // The level-name stage runs later, so it overwrites the caller.
        assert_eq!(record["level"], "info");
    }

    #[test]
    fn human_wrapper_formats_tag() {
        assert_eq!(render_human(Level::Info, "{}", false), "[INFO] {}");
        let colored = render_human(Level::Error, "{}", true);
        assert!(colored.starts_with("\x1b[31m[ERROR]\x1b[0m"));
        assert!(colored.ends_with("{}"));
    }
}
