use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::nodepool::NodePool;
use crate::phase::{PhaseFiles, SharedResource};
use crate::storage::{StatementStore, StoreIo, StoreOptions};
use crate::types::{Result, StoreError};

/// Scheme of the built-in statement store.
pub const STATEMENTS_SCHEME: &str = "statements";
/// Scheme of the built-in node pool.
pub const NODES_SCHEME: &str = "nodes";

/// What a factory needs to build a resource.
pub struct ResourceContext<'a> {
    /// Directory holding the resource's files.
    pub dir: &'a Path,
    /// Store configuration shared by every resource of the database.
    pub options: &'a StoreOptions,
}

/// A resource built by the registry, keeping its concrete type where one is known.
#[derive(Clone)]
pub enum RegisteredResource {
    /// A statement store.
    Statements(Arc<Mutex<StatementStore>>),
    /// A node pool.
    Nodes(Arc<Mutex<NodePool>>),
    /// Any other phase resource.
    Other(SharedResource),
}

impl RegisteredResource {
    /// The resource as a coordinator participant.
    pub fn shared(&self) -> SharedResource {
        match self {
            RegisteredResource::Statements(store) => Arc::clone(store) as SharedResource,
            RegisteredResource::Nodes(pool) => Arc::clone(pool) as SharedResource,
            RegisteredResource::Other(resource) => Arc::clone(resource),
        }
    }
}

/// Builds a resource named `name`.
pub type ResourceFactory = fn(&ResourceContext<'_>, &str) -> Result<RegisteredResource>;

/// Maps resource schemes to factory functions.
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    factories: BTreeMap<String, ResourceFactory>,
}

impl ResourceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `statements` and `nodes` schemes.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(STATEMENTS_SCHEME.into(), build_statements);
        registry.factories.insert(NODES_SCHEME.into(), build_nodes);
        registry
    }

    /// Adds a scheme. Registering a scheme twice is an error.
    pub fn register(&mut self, scheme: impl Into<String>, factory: ResourceFactory) -> Result<()> {
        let scheme = scheme.into();
        if self.factories.contains_key(&scheme) {
            return Err(StoreError::invalid(format!(
                "resource scheme {scheme} already registered"
            )));
        }
        self.factories.insert(scheme, factory);
        Ok(())
    }

    /// Registered schemes in sorted order.
    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Builds resource `name` with the factory for `scheme`.
    pub fn build(
        &self,
        scheme: &str,
        ctx: &ResourceContext<'_>,
        name: &str,
    ) -> Result<RegisteredResource> {
        let factory = self
            .factories
            .get(scheme)
            .ok_or_else(|| StoreError::invalid(format!("unknown resource scheme {scheme}")))?;
        factory(ctx, name)
    }
}

fn build_statements(ctx: &ResourceContext<'_>, name: &str) -> Result<RegisteredResource> {
    let io = StoreIo::open_dir(ctx.dir, name)?;
    let store = StatementStore::with_io(name, io, ctx.options.clone())?;
    Ok(RegisteredResource::Statements(Arc::new(Mutex::new(store))))
}

fn build_nodes(ctx: &ResourceContext<'_>, name: &str) -> Result<RegisteredResource> {
    let files = PhaseFiles::open_dir(ctx.dir, name)?;
    let pool = NodePool::with_files(name, files, Arc::clone(&ctx.options.metrics));
    Ok(RegisteredResource::Nodes(Arc::new(Mutex::new(pool))))
}
