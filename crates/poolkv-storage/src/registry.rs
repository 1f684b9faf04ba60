//! Name-to-backend lookup.
//!
//! Engines are opened by backend name. The default registry knows the
//! built-in backends and their aliases; embedders can register their own
//! factories under new names.

use crate::backend::Backend;
use crate::discard::DiscardBackend;
use crate::tree::TreeBackend;
use crate::vsmap::VsMapBackend;
use poolkv_core::{Config, Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds a backend from a validated configuration
pub type BackendFactory = Arc<dyn Fn(&Config) -> Result<Box<dyn Backend>> + Send + Sync>;

/// Registered backend factories keyed by name
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in backends:
    ///
    /// | Name | Aliases | Backend |
    /// |------|---------|---------|
    /// | `tree` | `tree3`, `kvtree3`, `btree` | [`TreeBackend`] |
    /// | `discard` | `blackhole` | [`DiscardBackend`] |
    /// | `vsmap` | | [`VsMapBackend`] |
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(TreeBackend::NAME, |config| {
            Ok(Box::new(TreeBackend::open(config)?))
        });
        registry.register(DiscardBackend::NAME, |config| {
            Ok(Box::new(DiscardBackend::open(config)?))
        });
        registry.register(VsMapBackend::NAME, |config| {
            Ok(Box::new(VsMapBackend::open(config)?))
        });

        for alias in ["tree3", "kvtree3", "btree"] {
            registry.factories.insert(
                alias.to_string(),
                Arc::clone(&registry.factories[TreeBackend::NAME]),
            );
        }
        registry.factories.insert(
            "blackhole".to_string(),
            Arc::clone(&registry.factories[DiscardBackend::NAME]),
        );

        registry
    }

    /// Register `factory` under `name`, replacing any previous entry
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Config) -> Result<Box<dyn Backend>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Make `alias` open whatever `target` opens
    pub fn alias(&mut self, alias: &str, target: &str) -> Result<()> {
        let factory = self
            .factories
            .get(target)
            .cloned()
            .ok_or_else(|| Error::UnknownBackend(target.to_string()))?;
        self.factories.insert(alias.to_string(), factory);
        Ok(())
    }

    /// Returns true if `name` resolves to a backend
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order, aliases included
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Validate `config` and open the backend registered as `name`.
    ///
    /// An unknown name fails with [`Error::UnknownBackend`] before the
    /// configuration is looked at.
    pub fn open(&self, name: &str, config: &Config) -> Result<Box<dyn Backend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownBackend(name.to_string()))?;
        config.validate()?;

        let backend = factory(config)?;
        tracing::debug!(name, backend = backend.name(), "backend opened");
        Ok(backend)
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("names", &self.names())
            .finish()
    }
}
