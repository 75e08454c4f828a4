use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Initialize tracing
///
/// Logs go to stderr; stdout carries the JSON error object read by the hook.
pub async fn init() {

    let logger = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Decide on layers
    let reg = Registry::default();
    reg.with(env_filter).with(logger).init();
}
