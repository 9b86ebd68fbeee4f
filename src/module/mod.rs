//! Module resolution for execute requests and qualified calls.
//!
//! Two sources back resolution: the process-wide builtin registry
//! ([`registry`]), populated once before any zone is constructed and
//! immutable thereafter, and the per-zone [`ModuleCache`] of natively
//! registered modules. A cached module is held by `Arc` and never evicted
//! while its zone exists, so a call racing a would-be unload cannot observe
//! a dangling module.

pub mod registry;

pub use registry::{builtin, builtins_installed, install_builtins};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// A natively implemented module function over JSON values.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// A module whose functions are implemented in the host, not in script.
pub struct NativeModule {
    name: String,
    functions: HashMap<String, NativeFn>,
}

impl NativeModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: HashMap::new(),
        }
    }

    /// Register a function on this module (builder style).
    pub fn with_function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function(&self, name: &str) -> Option<NativeFn> {
        self.functions.get(name).cloned()
    }
}

impl fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeModule")
            .field("name", &self.name)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Result of a successful module resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleHandle {
    pub name: String,
}

/// External collaborator queried when `ExecuteRequest.module` is set.
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, path: &str) -> Option<ModuleHandle>;
}

/// Zone-scoped registry of native modules with shared ownership.
///
/// Insertion keeps an `Arc` for the life of the cache; the longest-lived
/// holder (cache or in-flight call) keeps the module alive.
#[derive(Default)]
pub struct ModuleCache {
    modules: Mutex<Vec<Arc<NativeModule>>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. A module with the same name shadows earlier
    /// registrations on lookup, but nothing is ever dropped.
    pub fn insert(&self, module: Arc<NativeModule>) {
        self.modules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(module);
    }

    pub fn get(&self, name: &str) -> Option<Arc<NativeModule>> {
        self.modules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .rev()
            .find(|m| m.name() == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.modules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCache")
            .field("modules", &self.len())
            .finish()
    }
}

/// Default resolver: builtin registry first, then the zone's cache.
pub struct RegistryResolver {
    cache: Arc<ModuleCache>,
}

impl RegistryResolver {
    pub fn new(cache: Arc<ModuleCache>) -> Self {
        Self { cache }
    }
}

impl ModuleResolver for RegistryResolver {
    fn resolve(&self, path: &str) -> Option<ModuleHandle> {
        if let Some(module) = registry::builtin(path) {
            return Some(ModuleHandle {
                name: module.name().to_string(),
            });
        }
        self.cache.get(path).map(|module| ModuleHandle {
            name: module.name().to_string(),
        })
    }
}
