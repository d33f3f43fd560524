//! Tracing subscriber setup driven by [`LoggingConfig`].

use crate::config::LoggingConfig;
use crate::error::{MealsmithError, MealsmithResult};
use tracing::Subscriber;
use tracing_subscriber::util::SubscriberInitExt;

/// A subscriber ready to be installed globally or scoped with
/// [`tracing::subscriber::with_default`].
pub type BoxedSubscriber = Box<dyn Subscriber + Send + Sync + 'static>;

/// Build the subscriber described by `config` without installing it.
pub fn subscriber(config: &LoggingConfig) -> BoxedSubscriber {
    let level: tracing::Level = config.level.into();
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(config.include_targets);

    match (config.json_format, config.include_timestamps) {
        (true, true) => Box::new(builder.json().finish()),
        (true, false) => Box::new(builder.json().without_time().finish()),
        (false, true) => Box::new(builder.with_ansi(config.colored).finish()),
        (false, false) => Box::new(builder.with_ansi(config.colored).without_time().finish()),
    }
}

/// Install a global `tracing` subscriber built from `config`.
///
/// Fails instead of panicking when a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> MealsmithResult<()> {
    subscriber(config)
        .try_init()
        .map_err(|e| MealsmithError::config(format!("failed to install subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogLevel, MealsmithConfig};
    use tracing::Level;

    #[test]
    fn test_level_filter_is_applied() {
        let config = MealsmithConfig::production().logging;
        tracing::subscriber::with_default(subscriber(&config), || {
            assert!(tracing::enabled!(Level::INFO));
            assert!(!tracing::enabled!(Level::DEBUG));
        });

        let mut config = MealsmithConfig::testing().logging;
        config.level = LogLevel::Warn;
        tracing::subscriber::with_default(subscriber(&config), || {
            assert!(tracing::enabled!(Level::WARN));
            assert!(!tracing::enabled!(Level::INFO));
        });
    }

    #[test]
    fn test_every_format_builds() {
        for json_format in [true, false] {
            for include_timestamps in [true, false] {
                let mut config = MealsmithConfig::development().logging;
                config.json_format = json_format;
                config.include_timestamps = include_timestamps;
                config.level = LogLevel::Error;
                tracing::subscriber::with_default(subscriber(&config), || {
                    assert!(tracing::enabled!(Level::ERROR));
                    assert!(!tracing::enabled!(Level::WARN));
                });
            }
        }
    }
}
