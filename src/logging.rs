//! Tracing setup for binaries and tests embedding this library.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the host's job. These helpers cover the common cases.

use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber honoring `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    init_with_filter("info");
}

/// Install a stderr subscriber with an explicit default filter directive.
pub fn init_with_filter(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Subscriber wired to the libtest capture buffer.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
