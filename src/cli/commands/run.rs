//! `syncq run`: replay pending writes once.

use std::sync::Arc;

use super::{open_failure_log, open_store};
use crate::backend::{Backend, HttpBackend, InMemoryBackend};
use crate::cli::args::OutputFormat;
use crate::config::{Config, Paths};
use crate::context::{AppContext, Components};
use crate::error::SyncqError;
use crate::output::format_summary;
use crate::schema::SchemaRegistry;
use crate::sync::Connectivity;

/// Probe the backend and drain the queue once.
///
/// # Errors
///
/// Returns `Config` for an invalid backend URL, or `StorageUnavailable` if
/// the database cannot be opened.
pub async fn run(
    config: &Config,
    paths: &Paths,
    offline: bool,
    loopback: bool,
    format: OutputFormat,
) -> Result<String, SyncqError> {
    let (backend, reachable): (Arc<dyn Backend>, bool) = if loopback {
        (Arc::new(InMemoryBackend::new()), !offline)
    } else {
        let http = HttpBackend::from_config(&config.backend)?;
        let reachable = !offline && http.probe().await;
        (Arc::new(http), reachable)
    };
    let connectivity = Connectivity::from_online(reachable);
    tracing::debug!(%connectivity, loopback, "backend probed");

    let components = Components {
        store: Box::new(open_store(paths)?),
        failures: open_failure_log(paths)?,
        backend,
        schemas: SchemaRegistry::with_defaults(),
        initial: connectivity,
    };
    let ctx = AppContext::init(config, components)?;

    let summary = ctx.drain_now().await;
    ctx.shutdown().await;

    format_summary(&summary, connectivity, format)
}
