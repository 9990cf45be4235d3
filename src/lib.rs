pub mod value;
pub mod level;
pub mod record;
pub mod frames;
pub mod exc;
pub mod pipeline;
pub mod sink;
pub mod logger;
pub mod config;
pub mod bridge;
pub mod scrub;
pub mod report;

#[cfg(feature = "reporting")]
pub mod http_report;

pub mod env;

pub use config::{configure_logging, configure_logging_with, LogConfig, OutputFormat};
pub use exc::{ExceptionInfo, MAX_EXCEPTION_LENGTH};
pub use level::Level;
pub use logger::{get_logger, BoundLogger};
pub use report::{log_uncaught, report};
pub use value::{Fields, Value};
