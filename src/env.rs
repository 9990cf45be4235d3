/// Environment variable names recognized by this crate.
///
/// These are purely helpers; the core pipeline types remain decoupled from
/// environment access.

/// Environment-name tag injected into every record when set, e.g. "prod",
/// "staging", "dev".
pub const ENV_TAG_ENV: &str = "JSONLOG_ENV";

/// DSN of the remote error-tracking service, e.g.
/// `https://<key>@errors.example.com/<project>`.
pub const SENTRY_DSN_ENV: &str = "JSONLOG_SENTRY_DSN";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
