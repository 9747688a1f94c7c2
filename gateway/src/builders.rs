use crate::Config;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "use-sentry")]
use sentry::types::Dsn;
#[cfg(feature = "use-sentry")]
use std::str::FromStr;
#[cfg(feature = "use-sentry")]
use std::sync::Arc;

/// Keeps the error reporter alive. Events are flushed when it is dropped.
pub struct ObservabilityGuard {
    #[cfg(feature = "use-sentry")]
    _sentry: sentry::ClientInitGuard,
}

/// Installs the global tracing subscriber, forwarding warnings and errors to
/// sentry when enabled. Filtered through `RUST_LOG`.
pub fn configure_observability(config: &Config) -> ObservabilityGuard {
    #[cfg(feature = "use-sentry")]
    {
        let (dsn, dsn_error) = match config.sentry_dsn.as_deref().map(Dsn::from_str) {
            Some(Ok(dsn)) => (Some(dsn), None),
            Some(Err(e)) => (None, Some(e)),
            None => (None, None),
        };

        let guard = sentry::init(sentry::ClientOptions {
            dsn,
            debug: config.debug_mode,
            release: sentry::release_name!(),
            default_integrations: false,
            integrations: vec![
                Arc::new(sentry_panic::PanicIntegration::default()),
                Arc::new(sentry::integrations::contexts::ContextIntegration::default()),
            ],
            ..Default::default()
        });

        let sentry_layer = sentry_tracing::layer().event_filter(|meta| match *meta.level() {
            tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Exception,
            _ => sentry_tracing::EventFilter::Ignore,
        });

        let registry = tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(sentry_layer);

        if config.json_log {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }

        if let Some(e) = dsn_error {
            tracing::warn!(error = %e, "Invalid sentry DSN, error reporting disabled");
        }

        ObservabilityGuard { _sentry: guard }
    }

    #[cfg(not(feature = "use-sentry"))]
    {
        let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());

        if config.json_log {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }

        ObservabilityGuard {}
    }
}
