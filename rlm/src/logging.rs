//! Diagnostic tracing for the controller.
//!
//! Output goes to stderr only; stdout is reserved for command results.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::io::config::{LogFormat, LoggingSection};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `logging.level` from the config applies.
///
/// # Example
/// ```bash
/// RUST_LOG=rlm=debug rlm analyze README.md "summarize"
/// ```
pub fn init(section: &LoggingSection) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(section.level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    match section.format {
        LogFormat::Compact => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .init(),
    }
}
