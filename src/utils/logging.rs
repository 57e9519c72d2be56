use tracing_subscriber::EnvFilter;

/// Diagnostics go to stderr so they never interleave with the run log on
/// stdout. `RUST_LOG` overrides the default `warn` level and
/// `BACKUP_LOG_JSON=1` switches to structured output.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let json = std::env::var("BACKUP_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // try_init so a second call (tests, embedding) is harmless
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
