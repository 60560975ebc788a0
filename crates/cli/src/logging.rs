use anyhow::Result;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Setup tracing + log integration
///
/// Filtering follows `RUST_LOG`, defaulting to warnings only. Output goes to
/// stderr so predictions on stdout stay clean.
pub fn setup_logging() -> Result<()> {
    LogTracer::init()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
