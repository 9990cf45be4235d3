use backtrace::Backtrace;

/// Module prefixes that never count as application code when attributing a
/// log line to its call site. Mirrors the ignore list the module stage always
/// applies on top of caller-configured prefixes.
pub const DEFAULT_IGNORES: &[&str] = &[
    "jsonlog",
    "backtrace",
    "tracing",
    "tracing_core",
    "tracing_subscriber",
    "tokio",
    "std",
    "core",
    "alloc",
    "test",
    "rust_begin_unwind",
    "__rust",
];

/// Nearest application call site as resolved by [`find_first_app_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub module: String,
    pub line: Option<u32>,
}

impl CallSite {
    /// Render as the `module:line` record field, `?` when the line number
    /// could not be resolved (stripped debug info).
    pub fn display(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{}", self.module, line),
            None => format!("{}:?", self.module),
        }
    }
}

/// Walk the active call stack and return the first frame whose module path
/// does not start with any ignored prefix.
///
/// Frames without a resolvable symbol name are treated as not-yet-found and
/// skipped; this guards against call sites reached through dynamic dispatch
/// or built without debug info, where name lookup fails. If no frame
/// qualifies, the outermost named frame wins rather than failing; a fully
/// unresolvable stack yields the placeholder module `unknown`.
pub fn find_first_app_frame(extra_ignores: &[String]) -> CallSite {
    let backtrace = Backtrace::new();
    let mut outermost: Option<CallSite> = None;

    for frame in backtrace.frames() {
        for symbol in frame.symbols() {
            let name = match symbol.name() {
                Some(name) => name.to_string(),
                None => continue,
            };
            let module = match module_of(&name) {
                Some(module) => module,
                None => continue,
            };
            let site = CallSite {
                module,
                line: symbol.lineno(),
            };
            if !is_ignored(&site.module, extra_ignores) {
                return site;
            }
            outermost = Some(site);
        }
    }

    outermost.unwrap_or(CallSite {
        module: "unknown".to_string(),
        line: None,
    })
}

/// Render the current call stack as indented `module (line)` text, used by
/// the stack-info pipeline stage. Frames from the ignore set are elided so
/// the trace starts at application code.
pub fn render_stack(extra_ignores: &[String]) -> String {
    let backtrace = Backtrace::new();
    let mut out = String::new();
    let mut started = false;

    for frame in backtrace.frames() {
        for symbol in frame.symbols() {
            let name = match symbol.name() {
                Some(name) => name.to_string(),
                None => continue,
            };
            let module = match module_of(&name) {
                Some(module) => module,
                None => continue,
            };
            if !started {
                if is_ignored(&module, extra_ignores) {
                    continue;
                }
                started = true;
            }
            let site = CallSite {
                module,
                line: symbol.lineno(),
            };
            out.push_str("  ");
            out.push_str(&site.display());
            out.push('\n');
        }
    }

    out
}

pub(crate) fn is_ignored(module: &str, extra_ignores: &[String]) -> bool {
    DEFAULT_IGNORES.iter().any(|pre| matches_prefix(module, pre))
        || extra_ignores
            .iter()
            .any(|pre| matches_prefix(module, pre.as_str()))
}

/// A prefix matches only on a path-segment boundary, so the `test` entry
/// covers `test::run` but not an application crate named `testapp`.
fn matches_prefix(module: &str, prefix: &str) -> bool {
    match module.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with("::"),
        None => false,
    }
}

/// Reduce a demangled symbol name to a plain `::` path: trait-impl symbols
/// are flattened so the path starts at the implementing type's module, the
/// trailing hash segment is dropped, and `{{closure}}` segments are elided.
/// The function name itself is kept. Returns `None` when nothing is left.
pub(crate) fn symbol_path(symbol_name: &str) -> Option<String> {
    let flattened = flatten_trait_impl(symbol_name);
    let mut parts: Vec<&str> = flattened.split("::").collect();

    // Legacy mangling appends a 16 hex digit hash segment prefixed with 'h'.
    if parts
        .last()
        .is_some_and(|p| p.len() == 17 && p.starts_with('h') && p[1..].chars().all(|c| c.is_ascii_hexdigit()))
    {
        parts.pop();
    }
    parts.retain(|p| *p != "{{closure}}");

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("::"))
    }
}

/// Trait methods demangle as `<path::Type as path::Trait>::method`, which
/// would defeat prefix matching against the leading `<`. Rewrite those to
/// the implementing type's module path followed by the method segments.
fn flatten_trait_impl(symbol_name: &str) -> String {
    if let Some(rest) = symbol_name.strip_prefix('<') {
        if let Some((impl_ty, tail)) = rest.split_once(" as ") {
            if let Some((_, method)) = tail.split_once(">::") {
                let module = impl_ty.rsplit_once("::").map_or(impl_ty, |(m, _)| m);
                return format!("{}::{}", module, method);
            }
        }
    }
    symbol_name.to_string()
}

/// Module path of a symbol: [`symbol_path`] with the function name dropped.
/// Returns `None` for free symbols without a path.
fn module_of(symbol_name: &str) -> Option<String> {
    let path = symbol_path(symbol_name)?;
    path.rsplit_once("::").map(|(module, _)| module.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_of_strips_hash_and_function() {
        assert_eq!(
            module_of("myapp::api::handler::h0123456789abcdef"),
            Some("myapp::api".to_string())
        );
        assert_eq!(
            module_of("myapp::api::handler::{{closure}}::h0123456789abcdef"),
            Some("myapp::api".to_string())
        );
        assert_eq!(module_of("main"), None);
    }

    #[test]
    fn module_of_flattens_trait_impl_symbols() {
        assert_eq!(
            module_of(
                "<jsonlog::pipeline::ModuleRecorder as jsonlog::pipeline::Stage>::apply::h0123456789abcdef"
            ),
            Some("jsonlog::pipeline".to_string())
        );
        assert_eq!(
            module_of("<myapp::api::Handler as tower::Service>::call::h0123456789abcdef"),
            Some("myapp::api".to_string())
        );
        // Generic impl without a module path on the type.
        assert_eq!(
            module_of("<T as core::fmt::Debug>::fmt::h0123456789abcdef"),
            Some("T".to_string())
        );
    }

    #[test]
    fn own_trait_frames_are_classified_as_infrastructure() {
        let module = module_of(
            "<jsonlog::sink::StdoutSink as jsonlog::sink::RecordSink>::emit::h0123456789abcdef",
        );
        assert!(is_ignored(&module.unwrap(), &[]));
    }

    #[test]
    fn locator_skips_own_crate() {
        let site = find_first_app_frame(&[]);
        assert!(!site.module.starts_with("jsonlog"), "got {}", site.module);
        assert!(!site.module.starts_with("backtrace"), "got {}", site.module);
    }

    #[test]
    fn ignore_prefixes_match_whole_path_segments() {
        assert!(is_ignored("std::rt", &[]));
        assert!(is_ignored("test", &[]));
        assert!(!is_ignored("testapp::handlers", &[]));
        assert!(!is_ignored("test_harness::run", &[]));
        assert!(!is_ignored("core_engine::run", &[]));
        assert!(!is_ignored("std_utils::io", &[]));
    }

    #[test]
    fn extra_ignores_are_honored() {
        let extra = vec!["myapp".to_string()];
        assert!(is_ignored("myapp", &extra));
        assert!(is_ignored("myapp::vendored", &extra));
        assert!(!is_ignored("myapp_extras::run", &extra));
    }

    #[test]
    fn call_site_display() {
        let site = CallSite {
            module: "myapp::api".to_string(),
            line: Some(42),
        };
        assert_eq!(site.display(), "myapp::api:42");

        let unresolved = CallSite {
            module: "myapp::api".to_string(),
            line: None,
        };
        assert_eq!(unresolved.display(), "myapp::api:?");
    }
}
