//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directive added when stream debugging is on.
const WS_DEBUG_DIRECTIVE: &str = "mfeed_ws=debug";

/// Filter used when `RUST_LOG` is not set.
pub fn default_directives(debug_ws: bool) -> String {
    if debug_ws {
        format!("info,{WS_DEBUG_DIRECTIVE}")
    } else {
        "info".to_string()
    }
}

/// Initialize structured logging.
///
/// JSON output when `RUST_ENV=production`, pretty output otherwise.
/// `debug_ws` enables connector debug logs on top of `RUST_LOG`.
pub fn init_logging(debug_ws: bool) -> TelemetryResult<()> {
    let mut env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug_ws)));
    if debug_ws {
        let directive: Directive = WS_DEBUG_DIRECTIVE
            .parse()
            .map_err(|e| TelemetryError::LoggingInit(format!("{e}")))?;
        env_filter = env_filter.add_directive(directive);
    }

    let is_production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let result = if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(true))
            .try_init()
    };

    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}
