use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::config::DatabaseConfig;
use crate::nodepool::NodePool;
use crate::phase::Refreshable;
use crate::primitives::io::StdFileIo;
use crate::session::{
    DecisionLog, RecoveryReport, RegisteredResource, ResourceContext, ResourceRegistry,
    SessionCoordinator,
};
use crate::storage::{StatementSnapshot, StatementStore, StoreOptions};
use crate::types::{PhaseNumber, Result, StoreError};

/// A directory of phase resources committed together.
///
/// Opening builds every configured participant through a [`ResourceRegistry`] and runs
/// coordinated recovery, so the returned database is always at a consistent phase.
///
/// ```no_run
/// use quadstore::{Database, DatabaseConfig};
///
/// let mut db = Database::open(DatabaseConfig::new("data"))?;
/// let node = db.nodes()?.lock().allocate()?;
/// db.statements()?.lock().add_triple(node, node, node, node)?;
/// db.commit()?;
/// # Ok::<(), quadstore::StoreError>(())
/// ```
pub struct Database {
    config: DatabaseConfig,
    options: StoreOptions,
    coordinator: SessionCoordinator,
    resources: Vec<(String, RegisteredResource)>,
    recovery: RecoveryReport,
}

impl Database {
    /// Opens with the default registry.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        Self::open_with(config, &ResourceRegistry::with_defaults())
    }

    /// Opens, building resources through `registry`.
    pub fn open_with(config: DatabaseConfig, registry: &ResourceRegistry) -> Result<Self> {
        Self::open_with_options(config.store_options()?, config, registry)
    }

    /// Opens with explicit store options, e.g. to inject a metrics sink or selector.
    pub fn open_with_options(
        options: StoreOptions,
        config: DatabaseConfig,
        registry: &ResourceRegistry,
    ) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.directory)?;
        let log = DecisionLog::open(Arc::new(StdFileIo::open(config.decision_log_path())?))?;
        let mut coordinator = SessionCoordinator::new(log);
        let ctx = ResourceContext {
            dir: &config.directory,
            options: &options,
        };
        let mut resources = Vec::with_capacity(config.resources.len());
        for entry in &config.resources {
            let resource = registry.build(&entry.scheme, &ctx, &entry.name)?;
            coordinator.register(entry.name.clone(), resource.shared())?;
            resources.push((entry.name.clone(), resource));
        }
        let recovery = coordinator.recover()?;
        info!(
            directory = %config.directory.display(),
            fresh = recovery.fresh,
            selected = ?recovery.selected,
            "database.open"
        );
        Ok(Self {
            config,
            options,
            coordinator,
            resources,
            recovery,
        })
    }

    /// Configuration the database was opened with.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Store options shared by every statement store.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// What recovery selected at open.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// The coordinator.
    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    /// Participants in commit order.
    pub fn resources(&self) -> impl Iterator<Item = (&str, &RegisteredResource)> {
        self.resources.iter().map(|(name, r)| (name.as_str(), r))
    }

    /// Participant by name.
    pub fn resource(&self, name: &str) -> Option<&RegisteredResource> {
        self.resources
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    /// The first configured statement store.
    pub fn statements(&self) -> Result<Arc<Mutex<StatementStore>>> {
        self.resources
            .iter()
            .find_map(|(_, r)| match r {
                RegisteredResource::Statements(store) => Some(Arc::clone(store)),
                _ => None,
            })
            .ok_or_else(|| StoreError::invalid("database has no statement store"))
    }

    /// The first configured node pool.
    pub fn nodes(&self) -> Result<Arc<Mutex<NodePool>>> {
        self.resources
            .iter()
            .find_map(|(_, r)| match r {
                RegisteredResource::Nodes(pool) => Some(Arc::clone(pool)),
                _ => None,
            })
            .ok_or_else(|| StoreError::invalid("database has no node pool"))
    }

    /// A read-only view of the first statement store's committed phase.
    pub fn snapshot(&self) -> Result<StatementSnapshot> {
        self.statements()?.lock().snapshot()
    }

    /// Prepares and commits every participant.
    pub fn commit(&mut self) -> Result<Vec<(String, PhaseNumber)>> {
        let phases = self.coordinator.prepare()?;
        self.coordinator.commit()?;
        Ok(phases)
    }

    /// Discards every participant's write phase.
    pub fn rollback(&mut self) -> Result<()> {
        self.coordinator.rollback()
    }

    /// Re-runs recovery over every participant, as a reopen would. This is the way out
    /// after a commit or rollback left the coordinator poisoned.
    pub fn recover(&mut self) -> Result<&RecoveryReport> {
        self.recovery = self.coordinator.recover()?;
        Ok(&self.recovery)
    }

    /// Moves every participant and `views` to the latest committed phase.
    pub fn refresh(&mut self, views: &mut [&mut dyn Refreshable]) -> Result<()> {
        self.coordinator.refresh(views)
    }
}
