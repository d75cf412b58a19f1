use calmirror_core::config::LoggingConfig;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
/// Nothing is installed when logging is disabled.
pub fn init(config: &LoggingConfig) {
    if !config.enabled {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("calmirror={level},calmirror_core={level}", level = config.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.pretty {
        registry
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}
