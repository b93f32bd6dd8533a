//! # novahv-core
//!
//! The VM service layer: everything in spec.md's C1-C11 components, wired
//! into a single [`Core`] handle that an embedding process (TUI, web
//! backend, CLI) owns and drives.
//!
//! There is no process-wide singleton here: `Core::new` takes a [`Config`]
//! and an [`EventSender`] and owns every component itself, so multiple
//! independent `Core`s (e.g. under test) never share state.

pub mod action;
pub mod backend;
pub mod bulk;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod migration;
pub mod query;
pub mod stats;
pub mod storage;
pub mod types;
pub mod webconsole;
pub mod workers;
pub mod xml;

use std::sync::Arc;

pub use action::VmActionService;
pub use backend::{LibvirtConnection, MockConnection};
pub use bulk::BulkOrchestrator;
pub use cache::MetadataCache;
pub use config::Config;
pub use connection::ConnectionPool;
pub use error::{Error, Result};
pub use events::{Event, EventSender, Severity};
pub use migration::MigrationEngine;
pub use query::VmQueryService;
pub use stats::StatsEngine;
pub use storage::StorageEngine;
pub use webconsole::WebConsoleSupervisor;
pub use workers::WorkerRegistry;

/// The VM service layer, owning every component and the `EventSender` they
/// all emit through (spec §9's Design Note: "no process-wide singletons,
/// one `Core` per embedding process").
pub struct Core {
    pub connections: Arc<ConnectionPool>,
    pub cache: Arc<MetadataCache>,
    pub query: Arc<VmQueryService>,
    pub actions: Arc<VmActionService>,
    pub stats: Arc<StatsEngine>,
    pub storage: Arc<StorageEngine>,
    pub migration: Arc<MigrationEngine>,
    pub bulk: Arc<BulkOrchestrator>,
    pub webconsole: Arc<WebConsoleSupervisor>,
    pub workers: Arc<WorkerRegistry>,
    pub config: Config,
}

impl Core {
    /// Builds every component from `config`, sharing `events` as the single
    /// channel every long-running operation reports through.
    pub fn new(config: Config, events: EventSender) -> Self {
        let connections = Arc::new(ConnectionPool::new_real(events.clone()));
        let cache = Arc::new(MetadataCache::new(config.info_ttl(), config.xml_ttl()));
        let query = Arc::new(VmQueryService::new(cache.clone()));
        let actions = Arc::new(VmActionService::new(cache.clone()));
        let total_memory_kib = system_total_memory_kib();
        let stats = Arc::new(StatsEngine::new(cache.clone(), total_memory_kib));
        let storage = Arc::new(StorageEngine::new());
        let migration = Arc::new(MigrationEngine::new());
        let bulk = Arc::new(BulkOrchestrator::new(actions.clone(), events.clone()));
        let webconsole = Arc::new(WebConsoleSupervisor::new(config.clone(), events.clone()));
        let workers = Arc::new(WorkerRegistry::new(events));

        Self { connections, cache, query, actions, stats, storage, migration, bulk, webconsole, workers, config }
    }

    /// Builds a `Core` backed purely by [`MockConnection`]s, with no
    /// dependency on the `libvirt` feature or a live `libvirtd` — used by
    /// integration tests and by embedders running in demo mode.
    pub fn new_mocked(config: Config, events: EventSender) -> Self {
        let connections = Arc::new(ConnectionPool::new(
            events.clone(),
            Arc::new(|uri: &str| Ok(MockConnection::new(uri) as Arc<dyn LibvirtConnection>)),
        ));
        let cache = Arc::new(MetadataCache::new(config.info_ttl(), config.xml_ttl()));
        let query = Arc::new(VmQueryService::new(cache.clone()));
        let actions = Arc::new(VmActionService::new(cache.clone()));
        let stats = Arc::new(StatsEngine::new(cache.clone(), system_total_memory_kib()));
        let storage = Arc::new(StorageEngine::new());
        let migration = Arc::new(MigrationEngine::new());
        let bulk = Arc::new(BulkOrchestrator::new(actions.clone(), events.clone()));
        let webconsole = Arc::new(WebConsoleSupervisor::new(config.clone(), events.clone()));
        let workers = Arc::new(WorkerRegistry::new(events));

        Self { connections, cache, query, actions, stats, storage, migration, bulk, webconsole, workers, config }
    }

    /// Disconnects every pooled connection and tears down active web
    /// console sessions; call before process exit.
    pub async fn shutdown(&self) {
        self.webconsole.terminate_all().await;
        self.workers.cancel_all().await;
        self.connections.disconnect_all().await;
    }
}

/// Reads `/proc/meminfo`'s `MemTotal`, falling back to a conservative 4 GiB
/// if unavailable (non-Linux, containerized with a masked `/proc`).
fn system_total_memory_kib() -> u64 {
    const FALLBACK_KIB: u64 = 4 * 1024 * 1024;
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|content| {
            content.lines().find_map(|line| {
                line.strip_prefix("MemTotal:").and_then(|rest| rest.trim().split_whitespace().next()).and_then(|n| n.parse::<u64>().ok())
            })
        })
        .unwrap_or(FALLBACK_KIB)
}
