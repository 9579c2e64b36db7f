//! Logging setup
//!
//! The library only emits `tracing` events; binaries and tests that want to
//! see them call [`init`] once.

use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber
///
/// `RUST_LOG` takes precedence; otherwise `level` applies to this crate.
/// Calling this more than once is harmless.
pub fn init(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("macsy_core={}", level)));

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Install a subscriber using the configured log level
pub fn init_from_config(config: &crate::config::Config) {
    init(&config.log_level);
}
