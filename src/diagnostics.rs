//! Diagnostics sink.
//!
//! Library code only emits `tracing` events; the binary installs this
//! subscriber once at startup. Output goes to standard error with the level
//! name as severity marker, colorized when stderr is a terminal.

use std::io::IsTerminal;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info";

/// `RUST_LOG` if set and valid, otherwise `default`
pub fn filter_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber
pub fn init(default_filter: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter_or(default_filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .try_init()?;

    Ok(())
}
