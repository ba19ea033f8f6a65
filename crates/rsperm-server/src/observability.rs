//! Logging setup for hosts that do not install their own subscriber.
//!
//! rsperm logs through `tracing` with `platform_id`, `permission` and `group`
//! fields. [`init_logging`] sends those to stdout, either as text or as one
//! JSON object per line:
//!
//! ```json
//! {"timestamp":"2024-01-15T10:30:00.000Z","level":"WARN","fields":{"message":"command rejected","platform_id":7},"target":"rsperm_server::commands"}
//! ```

use tracing::Subscriber;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Installs the global subscriber described by `settings`.
///
/// `RUST_LOG` overrides `settings.level`. Returns false if a subscriber was
/// already installed, by the host or by an earlier call.
pub fn init_logging(settings: &LoggingSettings) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let subscriber = build_subscriber(filter, settings.json, std::io::stdout);
    tracing::subscriber::set_global_default(subscriber).is_ok()
}

pub(crate) fn build_subscriber<W>(
    filter: EnvFilter,
    json: bool,
    writer: W,
) -> impl Subscriber + Send + Sync
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let output = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_writer(writer).boxed()
    };
    tracing_subscriber::registry().with(filter).with(output)
}
