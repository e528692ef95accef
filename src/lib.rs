//! Drive metadata sync daemon.
//!
//! Facade over the workspace crates plus the wiring shared by the
//! `drive-sync` binary: opening the store from a [`DaemonConfig`] and
//! assembling a [`JobRunner`] with the metadata sync handler registered.

pub use bridge_traits;
pub use core_runtime;
pub use core_store;
pub use core_sync;

#[cfg(feature = "desktop")]
pub use bridge_desktop;
#[cfg(feature = "desktop")]
pub use provider_google_drive;

use bridge_traits::MetadataSource;
use core_runtime::config::DaemonConfig;
use core_runtime::events::EventBus;
use core_store::{DatabaseConfig, DurableStore, SqliteStore};
use core_sync::{HandlerRegistry, JobRunner, MetadataSyncEngine, MetadataSyncHandler};
use std::sync::Arc;

/// Open (creating and migrating if needed) the database named by `config`.
pub async fn open_store(config: &DaemonConfig) -> core_store::Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(DatabaseConfig::new(config.database_path.clone())).await?;
    Ok(Arc::new(store))
}

/// Sync engine over `source` with the page size and deadline from `config`.
pub fn build_engine(
    config: &DaemonConfig,
    source: Arc<dyn MetadataSource>,
    store: Arc<dyn DurableStore>,
    events: Arc<EventBus>,
) -> MetadataSyncEngine {
    let engine = MetadataSyncEngine::new(source, store, events).with_page_size(config.page_size);
    match config.source_timeout {
        Some(timeout) => engine.with_source_timeout(timeout),
        None => engine,
    }
}

/// Runner with `metadata_sync` jobs bound to `source`.
pub fn build_runner(
    config: &DaemonConfig,
    source: Arc<dyn MetadataSource>,
    store: Arc<dyn DurableStore>,
    events: Arc<EventBus>,
) -> JobRunner {
    let engine = build_engine(config, source, store.clone(), events.clone());
    let registry = HandlerRegistry::new().with_handler(
        core_sync::METADATA_SYNC_JOB_TYPE,
        Arc::new(MetadataSyncHandler::new(Arc::new(engine))),
    );

    JobRunner::new(store, registry, events)
        .with_poll_interval(config.poll_interval)
        .with_batch_size(config.batch_size)
        .with_dead_on_permanent_error(config.dead_on_permanent_error)
}
