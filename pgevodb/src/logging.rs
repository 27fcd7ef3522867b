use tracing_subscriber::EnvFilter;


/// Sets up the tracing subscriber for the process.
///
/// Diagnostics go to stderr so command output stays parseable; the filter
/// comes from `RUST_LOG` and defaults to warnings only. Server NOTICE and
/// WARNING messages forwarded by the driver surface here as well.
pub fn initialize_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
