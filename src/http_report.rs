use crate::env;
use crate::report::{self, ErrorTracker};
use async_trait::async_trait;
use reqwest::Client;
use std::error::Error;
use std::sync::Arc;

/// Error type for error-tracking configuration.
///
/// Requesting remote reporting without a usable DSN is a programming error,
/// not a runtime condition, so it is signaled immediately at the call site.
#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error("error-tracking DSN must not be empty")]
    EmptyDsn,

    #[error("malformed error-tracking DSN: {0}")]
    MalformedDsn(String),
}

/// Connection settings parsed from a DSN of the form
/// `https://<public-key>@<host>/<project-id>`.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub endpoint: String,
    pub public_key: String,
}

/// Parse a DSN string into a [`TrackerConfig`].
///
/// Example: "https://abc123@errors.example.com/42" submits to
/// "https://errors.example.com/api/42/store/".
pub fn parse_dsn(dsn: &str) -> Result<TrackerConfig, ReportError> {
    if dsn.is_empty() {
        return Err(ReportError::EmptyDsn);
    }

    let (scheme, rest) = if let Some(rest) = dsn.strip_prefix("https://") {
        ("https", rest)
    } else if let Some(rest) = dsn.strip_prefix("http://") {
        ("http", rest)
    } else {
        return Err(ReportError::MalformedDsn(dsn.to_string()));
    };

    let (public_key, location) = rest
        .split_once('@')
        .ok_or_else(|| ReportError::MalformedDsn(dsn.to_string()))?;
    let (host, project) = location
        .split_once('/')
        .ok_or_else(|| ReportError::MalformedDsn(dsn.to_string()))?;
    if public_key.is_empty() || host.is_empty() || project.is_empty() {
        return Err(ReportError::MalformedDsn(dsn.to_string()));
    }

    Ok(TrackerConfig {
        endpoint: format!("{}://{}/api/{}/store/", scheme, host, project),
        public_key: public_key.to_string(),
    })
}

/// HTTP implementation of [`ErrorTracker`] posting scrubbed JSON payloads to
/// the DSN-derived store endpoint.
#[derive(Clone)]
pub struct HttpTracker {
    client: Client,
    config: TrackerConfig,
}

impl HttpTracker {
    pub fn new(config: TrackerConfig) -> Self {
        HttpTracker {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ErrorTracker for HttpTracker {
    async fn capture_exception(
        &self,
        payload: &serde_json::Value,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let resp = self
            .client
            .post(&self.config.endpoint)
            .header(
                "X-Sentry-Auth",
                format!("Sentry sentry_version=7, sentry_key={}", self.config.public_key),
            )
            .json(payload)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(format!("error tracker rejected payload with status {}: {}", status, text).into())
        }
    }
}

/// Enable remote error reporting against `dsn`. Fails hard on an empty or
/// malformed DSN; see [`ReportError`].
pub fn init_error_reporting(dsn: &str) -> Result<(), ReportError> {
    let config = parse_dsn(dsn)?;
    report::set_error_tracker(Arc::new(HttpTracker::new(config)));
    Ok(())
}

/// Enable remote error reporting from `JSONLOG_SENTRY_DSN`. An unset or
/// empty variable leaves reporting disabled, which is a valid deployment
/// (e.g. development), not an error.
pub fn init_error_reporting_from_env() -> Result<(), ReportError> {
    let dsn = env::env_or(env::SENTRY_DSN_ENV, "");
    if dsn.is_empty() {
        return Ok(());
    }
    init_error_reporting(&dsn)
}
