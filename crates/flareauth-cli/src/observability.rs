use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initializes logging to stderr so stdout carries only command output.
///
/// `RUST_LOG` wins over `level` when set.
pub fn init_tracing_with_level(level: &str) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
