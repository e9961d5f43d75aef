//! Process-wide tracing setup shared by the `sellerdesk` binary and tests.

pub mod tracing;

pub use crate::tracing::{LogConfig, LogFormat};

/// Initialize tracing with JSON output and `RUST_LOG` filtering.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    crate::tracing::init(&LogConfig::default());
}

pub fn init_with(config: &LogConfig) {
    crate::tracing::init(config);
}
