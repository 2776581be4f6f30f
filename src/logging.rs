//! Logging configuration using tracing

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when neither `--verbose` nor `RUST_LOG` is given
const DEFAULT_FILTER: &str = "info";

/// Build the filter for the subscriber.
///
/// `verbose` wins over `RUST_LOG`.
pub fn filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Initialize the logging system. Logs go to stderr so captured child
/// output printed on stdout stays clean.
///
/// Text output omits targets: child lines then read as the child wrote them,
/// and the level already tells stdout (INFO) from stderr (ERROR). The
/// `process_helpers::stdout`/`::stderr` targets still work in `RUST_LOG`
/// directives and appear in JSON output.
pub fn init(verbose: bool, json: bool) -> anyhow::Result<()> {
    let filter = filter(verbose);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}
