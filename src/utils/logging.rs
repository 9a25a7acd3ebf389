//! Logging setup

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
///
/// Safe to call more than once; later calls are ignored.
pub fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_thread_ids(false))
        .with(filter)
        .try_init()
        .ok();
}

/// Map a `-v` count onto a filter level
pub fn level_for_verbosity(verbose: u8, default: &str) -> &str {
    match verbose {
        0 => default,
        1 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging_is_idempotent() {
        setup_logging("warn");
        setup_logging("debug");
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for_verbosity(0, "info"), "info");
        assert_eq!(level_for_verbosity(1, "info"), "debug");
        assert_eq!(level_for_verbosity(5, "info"), "trace");
    }
}
