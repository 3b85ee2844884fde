//! Tracing setup: JSON logs in production, pretty logs locally.

use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Environment;

/// Install the global subscriber. `RUST_LOG` overrides the per-environment
/// default filter. Safe to call more than once; later calls are no-ops.
pub fn init_tracing(environment: Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if environment.is_production() {
            EnvFilter::new("info")
        } else {
            EnvFilter::new("debug")
        }
    });

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default());

    // try_init so a second call (test harnesses) is a no-op.
    let _ = if environment.is_production() {
        registry
            .with(fmt::layer().json().flatten_event(true).with_target(false))
            .try_init()
    } else {
        registry.with(fmt::layer().pretty()).try_init()
    };
}
