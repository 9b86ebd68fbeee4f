//! Process-wide builtin module registry.
//!
//! Builtins are installed exactly once, before any zone is constructed, and
//! are immutable afterwards: every worker reads the same `OnceLock`-backed
//! table without locking.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::{elog, Error, Result};

use super::NativeModule;

static BUILTINS: OnceLock<HashMap<String, NativeModule>> = OnceLock::new();

/// Install the process-wide builtin modules.
///
/// Must be called before any zone is constructed; a second call fails with
/// [`Error::BuiltinsInstalled`] and leaves the registry unchanged. Processes
/// that never call this simply have no builtins.
pub fn install_builtins(modules: Vec<NativeModule>) -> Result<()> {
    let mut table = HashMap::new();
    for module in modules {
        table.insert(module.name().to_string(), module);
    }
    let count = table.len();
    BUILTINS
        .set(table)
        .map_err(|_| Error::BuiltinsInstalled)?;
    elog!("Installed {} builtin module(s)", count);
    Ok(())
}

/// Look up a builtin module. Lock-free; the table never changes after
/// installation.
pub fn builtin(name: &str) -> Option<&'static NativeModule> {
    BUILTINS.get().and_then(|table| table.get(name))
}

/// Whether builtins have been installed in this process.
pub fn builtins_installed() -> bool {
    BUILTINS.get().is_some()
}
