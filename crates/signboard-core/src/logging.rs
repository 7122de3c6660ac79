//! Console logging setup.
//!
//! The level comes from `SIGNBOARD_LOG`, then `RUST_LOG`, then defaults to
//! `info`. Both accept full `EnvFilter` directives such as
//! `signboard_core=debug,reqwest=warn`.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_ENV: &str = "SIGNBOARD_LOG";
const DEFAULT_LEVEL: &str = "info";

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber once. Later calls are no-ops, and an
/// already-installed subscriber from elsewhere is left in place.
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let filter = log_filter();
        let use_ansi = std::io::stderr().is_terminal();

        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_ansi(use_ansi)
            .with_filter(EnvFilter::new(&filter));

        let subscriber = tracing_subscriber::registry().with(console_layer);
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already installed");
        } else {
            tracing::debug!(filter = %filter, ansi_colors = use_ansi, "logging initialized");
        }
    });
}

fn log_filter() -> String {
    filter_from(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
    )
}

fn filter_from(explicit: Option<String>, rust_log: Option<String>) -> String {
    explicit
        .into_iter()
        .chain(rust_log)
        .map(|value| value.trim().to_lowercase())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_LEVEL.to_owned())
}
