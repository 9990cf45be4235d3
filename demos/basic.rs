use jsonlog::{configure_logging, fields, get_logger, Level};

fn main() {
    configure_logging(Some(Level::Debug));

    let log = get_logger().bind(fields! { "service" => "sync-engine" });
    log.info("service started", fields! { "port" => 4000 });
    log.debug("cache warmed", fields! { "entries" => 128usize });

    let parsed: Result<i32, _> = "not-a-number".parse();
    if let Err(err) = parsed {
        log.error_with("failed to parse config value", &err, fields! { "key" => "port" });
    }
}
