//! Tracing setup
//!
//! The library only emits `tracing` events. Binaries and tests that want
//! to see them call [`init_tracing`] once; later calls are no-ops.

mod config;

pub use config::{LogConfig, LogFormat};

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber. Returns false if one was already set.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directives));

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(config.ansi)
            .with_target(false)
            .try_init(),
    };
    installed.is_ok()
}

/// [`init_tracing`] with settings from the environment
pub fn init_tracing_from_env() -> bool {
    init_tracing(&LogConfig::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let config = LogConfig::default().with_format(LogFormat::Json);
        let first = init_tracing(&config);
        // Whichever call won, the next one reports a subscriber already set
        assert!(!init_tracing(&config) || !first);
    }
}
