//! Component Factories
//!
//! Maps the `path` key of a `[modules.*]` or `[services.*]` entry to the
//! code that builds it. Built-in implementations are registered by
//! [`ModuleFactories::with_builtins`] and [`ServiceFactories::with_builtins`];
//! embedders add their own with `register`.
//!
//! An unknown `path` is a configuration error for that one component only;
//! the caller logs it and carries on without the component.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::{ComponentSettings, ConfigError};
use crate::error::SentinelError;
use crate::modules::{BannerModule, Module, ModuleError, SignalModule};
use crate::service::{ScriptService, Service, ServiceError};

/// Builds a module from its slug and settings table
pub type ModuleFactory =
    Arc<dyn Fn(&str, &toml::Table) -> Result<Box<dyn Module>, ModuleError> + Send + Sync>;

/// Builds a service from its name and settings table
pub type ServiceFactory =
    Arc<dyn Fn(&str, &toml::Table) -> Result<Arc<dyn Service>, ServiceError> + Send + Sync>;

// ============================================================================
// Modules
// ============================================================================

/// Module factory table
#[derive(Clone, Default)]
pub struct ModuleFactories {
    factories: BTreeMap<String, ModuleFactory>,
}

impl fmt::Debug for ModuleFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleFactories")
            .field("paths", &self.paths())
            .finish()
    }
}

impl ModuleFactories {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with `signal` and `banner`
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut factories = Self::new();
        factories.register("signal", |slug, settings| {
            Ok(Box::new(SignalModule::from_settings(slug, settings)?) as Box<dyn Module>)
        });
        factories.register("banner", |slug, settings| {
            Ok(Box::new(BannerModule::from_settings(slug, settings)?) as Box<dyn Module>)
        });
        factories
    }

    /// Add or replace the factory for `path`
    pub fn register<F>(&mut self, path: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&str, &toml::Table) -> Result<Box<dyn Module>, ModuleError> + Send + Sync + 'static,
    {
        self.factories.insert(path.into(), Arc::new(factory));
        self
    }

    /// Whether `path` is known
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.factories.contains_key(path)
    }

    /// Registered paths, sorted
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build the module for `slug`
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownImplementation`] if `settings.path` is unknown,
    /// or whatever the factory returns.
    pub fn build(&self, slug: &str, settings: &ComponentSettings) -> Result<Box<dyn Module>, SentinelError> {
        let factory = self
            .factories
            .get(&settings.path)
            .ok_or_else(|| ConfigError::UnknownImplementation {
                section: format!("modules.{slug}"),
                path: settings.path.clone(),
            })?;
        Ok(factory(slug, &settings.settings)?)
    }
}

// ============================================================================
// Services
// ============================================================================

/// Service factory table
#[derive(Clone, Default)]
pub struct ServiceFactories {
    factories: BTreeMap<String, ServiceFactory>,
}

impl fmt::Debug for ServiceFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFactories")
            .field("paths", &self.paths())
            .finish()
    }
}

impl ServiceFactories {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with `script`
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut factories = Self::new();
        factories.register("script", |name, settings| {
            Ok(Arc::new(ScriptService::from_settings(name, settings)?) as Arc<dyn Service>)
        });
        factories
    }

    /// Add or replace the factory for `path`
    pub fn register<F>(&mut self, path: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&str, &toml::Table) -> Result<Arc<dyn Service>, ServiceError> + Send + Sync + 'static,
    {
        self.factories.insert(path.into(), Arc::new(factory));
        self
    }

    /// Whether `path` is known
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.factories.contains_key(path)
    }

    /// Registered paths, sorted
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build the service `name`
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownImplementation`] if `settings.path` is unknown,
    /// or whatever the factory returns.
    pub fn build(&self, name: &str, settings: &ComponentSettings) -> Result<Arc<dyn Service>, SentinelError> {
        let factory = self
            .factories
            .get(&settings.path)
            .ok_or_else(|| ConfigError::UnknownImplementation {
                section: format!("services.{name}"),
                path: settings.path.clone(),
            })?;
        Ok(factory(name, &settings.settings)?)
    }
}
