use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::config::DetectorConfig;

use super::backend::DetectorBackend;
use super::backends::StubBackend;

/// Builds a fresh backend from the frozen detector config.
pub type BackendConstructor = fn(&DetectorConfig) -> Result<Box<dyn DetectorBackend>>;

/// Registry of backend constructors, keyed by backend name.
///
/// The predictor asks for one instance per worker, so the registry stores
/// constructors rather than shared instances.
pub struct BackendRegistry {
    constructors: HashMap<String, BackendConstructor>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", build_stub);
        #[cfg(feature = "backend-tract")]
        registry.register("tract", build_tract);
        registry
    }

    /// Register (or replace) a constructor.
    pub fn register(&mut self, name: &str, constructor: BackendConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Build the backend named by `cfg.backend`.
    pub fn build(&self, cfg: &DetectorConfig) -> Result<Box<dyn DetectorBackend>> {
        let constructor = self.constructors.get(&cfg.backend).ok_or_else(|| {
            anyhow!(
                "backend '{}' not registered (available: {})",
                cfg.backend,
                self.list().join(", ")
            )
        })?;
        constructor(cfg)
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

fn build_stub(_cfg: &DetectorConfig) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(StubBackend::new()))
}

#[cfg(feature = "backend-tract")]
fn build_tract(cfg: &DetectorConfig) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(super::backends::TractBackend::from_config(cfg)?))
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
