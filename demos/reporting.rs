use jsonlog::exc;
use jsonlog::http_report;
use jsonlog::{configure_logging, fields, ExceptionInfo, Level};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    configure_logging(Some(Level::Info));

    // Reporting stays disabled unless JSONLOG_SENTRY_DSN is set.
    if let Err(err) = http_report::init_error_reporting_from_env() {
        eprintln!("error-tracking misconfigured: {}", err);
        return;
    }

    let parsed: Result<i32, _> = "not-a-number".parse();
    if let Err(err) = parsed {
        exc::set_current_error(ExceptionInfo::from_error(&err));
        jsonlog::log_uncaught(None, fields! { "account_id" => "1" }).await;
        exc::clear_current_error();
    }
}
