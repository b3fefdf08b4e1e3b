/// Initializes the `log` facade with an `env_logger` backend, using
/// `filter` (normally the CLI's `--log-level` / `RUST_LOG` value) as the
/// filter spec. Falls back to `info` on an empty filter.
pub fn init(filter: &str) {
    let filter = if filter.trim().is_empty() { "info" } else { filter };
    env_logger::Builder::new()
        .parse_filters(filter)
        .format_timestamp_millis()
        .init();
}
