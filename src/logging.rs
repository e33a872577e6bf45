//! Logging setup.
//!
//! Installs a global tracing subscriber writing to stdout. The filter defaults
//! to `info` and can be overridden with `RUST_LOG`.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

static LOG_INIT: OnceLock<()> = OnceLock::new();

const DEFAULT_FILTER: &str = "info";

/// Initialize tracing. Subsequent calls are no-ops.
pub fn init() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    if LOG_INIT.get().is_some() {
        return Ok(());
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let stdout_layer = fmt::layer().with_target(false).with_writer(std::io::stdout);

    let subscriber = Registry::default().with(env_filter).with(stdout_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = LOG_INIT.set(());

    tracing::debug!("Logging initialized");
    Ok(())
}
