//! Tracing subscriber setup for hosts embedding the retrieval core

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter directive when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVE: &str = "ragcore=info";

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global fmt subscriber.
///
/// Panics if a global subscriber is already set; use [`try_init_logging`]
/// from tests or hosts that may initialize twice.
pub fn init_logging(default_directive: &str) {
    fmt()
        .with_env_filter(env_filter(default_directive))
        .with_target(false)
        .init();
}

/// Install the global fmt subscriber, returning `false` if one already exists
pub fn try_init_logging(default_directive: &str) -> bool {
    fmt()
        .with_env_filter(env_filter(default_directive))
        .with_target(false)
        .try_init()
        .is_ok()
}
