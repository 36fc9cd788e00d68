//! Module Loader
//!
//! Host-provided loading of external packages for the `imp` helper. The
//! loader itself is async; synchronous evaluation (used when resolving
//! variables mid-substitution) goes through `SyncLoaderAdapter`, which
//! bridges with `tokio::task::block_in_place` + `block_on`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::types::Value;

/// Errors from resolving an external package.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("package `{0}` not found")]
    NotFound(String),
    #[error("failed to load package `{package}`: {reason}")]
    Failed { package: String, reason: String },
}

/// Host interface for loading packages by name. Implementations must be
/// idempotent: the engine may ask for the same package from several
/// instances.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, package: &str) -> Result<Value, LoadError>;
}

/// Synchronous view of a loader, used by the expression evaluator.
pub trait SyncModuleLoader {
    fn load(&self, package: &str) -> Result<Value, LoadError>;
}

/// Bridges an async `ModuleLoader` to the sync `SyncModuleLoader` interface
/// using `block_in_place`, so evaluation can stay synchronous while the host
/// loads packages asynchronously.
pub struct SyncLoaderAdapter {
    inner: Arc<dyn ModuleLoader>,
    handle: tokio::runtime::Handle,
}

impl SyncLoaderAdapter {
    pub fn new(inner: Arc<dyn ModuleLoader>, handle: tokio::runtime::Handle) -> Self {
        Self { inner, handle }
    }
}

impl SyncModuleLoader for SyncLoaderAdapter {
    fn load(&self, package: &str) -> Result<Value, LoadError> {
        tokio::task::block_in_place(|| self.handle.block_on(self.inner.load(package)))
    }
}

/// A loader with no packages; every load fails. The default for hosts that
/// never use `imp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLoader;

#[async_trait]
impl ModuleLoader for NullLoader {
    async fn load(&self, package: &str) -> Result<Value, LoadError> {
        Err(LoadError::NotFound(package.to_string()))
    }
}

impl SyncModuleLoader for NullLoader {
    fn load(&self, package: &str) -> Result<Value, LoadError> {
        Err(LoadError::NotFound(package.to_string()))
    }
}

/// A loader backed by a fixed package map. Useful for hosts that register
/// their packages up front, and for tests.
#[derive(Default)]
pub struct StaticLoader {
    packages: HashMap<String, Value>,
}

impl StaticLoader {
    pub fn with_package(mut self, name: impl Into<String>, value: Value) -> Self {
        self.packages.insert(name.into(), value);
        self
    }
}

#[async_trait]
impl ModuleLoader for StaticLoader {
    async fn load(&self, package: &str) -> Result<Value, LoadError> {
        self.packages
            .get(package)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(package.to_string()))
    }
}

impl SyncModuleLoader for StaticLoader {
    fn load(&self, package: &str) -> Result<Value, LoadError> {
        self.packages
            .get(package)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(package.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
