//! Backend registry.
//!
//! Holds the constructed backends in registration order. Read-only once the
//! daemon or CLI has built it.

use std::sync::Arc;

use crate::config::{Config, ProviderConfig};
use crate::error::AppError;

use super::{AdoBackend, GitHubBackend, ProviderBackend};

/// Ordered set of provider backends.
#[derive(Clone, Default)]
pub struct Registry {
    backends: Vec<Arc<dyn ProviderBackend>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every backend listed in the config, in order.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let mut registry = Self::new();
        for provider in &config.providers {
            let backend: Arc<dyn ProviderBackend> = match provider {
                ProviderConfig::Ado(c) => Arc::new(AdoBackend::new(c.clone())?),
                ProviderConfig::Github(c) => Arc::new(GitHubBackend::new(c.clone())?),
            };
            log::debug!("[registry] Registered backend '{}'", backend.name());
            registry.register(backend);
        }
        Ok(registry)
    }

    /// Append a backend. Later registrations lose ties in [`Registry::detect`].
    pub fn register(&mut self, backend: Arc<dyn ProviderBackend>) {
        self.backends.push(backend);
    }

    /// First backend whose URL predicate matches.
    pub fn detect(&self, url: &str) -> Result<Arc<dyn ProviderBackend>, AppError> {
        self.backends
            .iter()
            .find(|b| b.matches_url(url))
            .cloned()
            .ok_or_else(|| AppError::no_backend(url))
    }

    /// Exact, case-sensitive lookup by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderBackend>, AppError> {
        self.backends
            .iter()
            .find(|b| b.name() == name)
            .cloned()
            .ok_or_else(|| AppError::no_backend(format!("provider '{}'", name)))
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
