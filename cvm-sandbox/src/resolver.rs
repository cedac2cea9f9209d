//! Module resolution for `require`.
//!
//! A module is looked up first as `<module_path>/<name>.js` on disk. A
//! non-empty file is handed back to the script verbatim. Otherwise the
//! host's fallback [`ModuleResolver`] is asked; its source still has to go
//! through gas injection before the engine evaluates it.

use crate::error::{Result, SandboxError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Default search path for local modules
pub const DEFAULT_MODULE_PATH: &str = "v8/libjs";

/// Host-provided fallback for modules not found on the module path.
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, module: &str) -> Option<String>;
}

impl<F> ModuleResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn resolve(&self, module: &str) -> Option<String> {
        self(module)
    }
}

/// Resolver that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFallback;

impl ModuleResolver for NoFallback {
    fn resolve(&self, _module: &str) -> Option<String> {
        None
    }
}

/// In-memory module table.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    modules: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.modules.insert(name.into(), source.into());
        self
    }
}

impl ModuleResolver for StaticResolver {
    fn resolve(&self, module: &str) -> Option<String> {
        self.modules.get(module).cloned()
    }
}

/// Source found for a module, tagged by where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// Read from the module path; returned to the script as-is
    Local(String),
    /// Produced by the fallback resolver; must be gas-instrumented and run
    Fallback(String),
}

/// Per-sandbox module lookup: the module search path plus the fallback.
pub struct ModuleLoader {
    module_path: RwLock<PathBuf>,
    fallback: Arc<dyn ModuleResolver>,
}

impl ModuleLoader {
    pub fn new(fallback: Arc<dyn ModuleResolver>) -> Self {
        Self {
            module_path: RwLock::new(PathBuf::from(DEFAULT_MODULE_PATH)),
            fallback,
        }
    }

    pub fn module_path(&self) -> PathBuf {
        self.module_path.read().clone()
    }

    pub fn set_module_path(&self, path: impl AsRef<Path>) {
        *self.module_path.write() = path.as_ref().to_path_buf();
    }

    /// Find the source for `module`.
    pub fn resolve(&self, module: &str) -> Result<ModuleSource> {
        if module.is_empty() {
            return Err(SandboxError::Require("require empty module".to_string()));
        }
        // Only plain relative names, so the lookup stays under the module path
        if !Path::new(module)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(SandboxError::Require(format!(
                "module '{module}' is outside the module path"
            )));
        }

        if let Some(source) = self.read_local(module) {
            tracing::debug!(module, "Resolved module from module path");
            return Ok(ModuleSource::Local(source));
        }

        match self.fallback.resolve(module) {
            Some(source) if !source.is_empty() => {
                tracing::debug!(module, "Resolved module from fallback resolver");
                Ok(ModuleSource::Fallback(source))
            }
            _ => Err(SandboxError::Require(format!(
                "module '{module}' not found"
            ))),
        }
    }

    fn read_local(&self, module: &str) -> Option<String> {
        let path = self.module_path.read().join(format!("{module}.js"));
        match std::fs::read_to_string(&path) {
            Ok(source) if !source.is_empty() => Some(source),
            Ok(_) => None,
            Err(e) => {
                tracing::trace!(path = %path.display(), error = %e, "Local module unavailable");
                None
            }
        }
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("module_path", &*self.module_path.read())
            .finish_non_exhaustive()
    }
}
