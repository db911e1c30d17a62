//! # Structured Logging
//!
//! Sets up `tracing` for the node. The interesting targets are:
//!
//! - `tontine_protocol::governance::engine` — one event per committed
//!   submit, vote, settlement, closure, and a `warn` per settlement failure.
//! - `tontine_protocol::outbox::dispatcher` — drain summaries at `debug`,
//!   delivery retries and dropped entries at `warn`.
//! - `tontine_node` — startup, listener addresses, shutdown.
//! - `tower_http` — one span per HTTP request.
//!
//! Output goes to stderr; `init` and `version` print their results on stdout.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directive used by `run` when neither `--log-level` nor `RUST_LOG` is set.
pub const RUN_DIRECTIVE: &str = "tontine_node=info,tontine_protocol=info,tower_http=info";

/// Directive used by `init`, which never serves HTTP.
pub const INIT_DIRECTIVE: &str = "tontine_node=info,tontine_protocol=info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colored, multi-field lines for a terminal.
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

impl LogFormat {
    /// `"json"` in any case selects [`LogFormat::Json`]; anything else is
    /// [`LogFormat::Pretty`].
    pub fn from_str_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Builds the filter: `RUST_LOG` wins over `directive`, and an invalid
/// `directive` falls back to [`RUN_DIRECTIVE`].
fn build_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new(RUN_DIRECTIVE))
}

/// Installs the global subscriber. Must run once, before anything logs.
pub fn init_logging(directive: &str, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(build_filter(directive));

    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_line_number(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true),
            )
            .init(),
    }

    tracing::info!(?format, directive, "logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_is_lenient() {
        assert_eq!(LogFormat::from_str_lossy("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str_lossy("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str_lossy("yaml"), LogFormat::Pretty);
    }

    #[test]
    fn built_in_directives_parse() {
        assert!(EnvFilter::try_new(RUN_DIRECTIVE).is_ok());
        assert!(EnvFilter::try_new(INIT_DIRECTIVE).is_ok());
    }
}
