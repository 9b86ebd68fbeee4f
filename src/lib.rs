//! enclave: isolated script-execution zones over fixed worker pools.
//!
//! A [`Zone`] owns a set of workers, each a dedicated OS thread running its
//! own execution engine. Broadcasts replicate state-establishing scripts to
//! every worker; executes dispatch single function calls round-robin with
//! optional deadlines enforced by forced worker reclamation. Every submitted
//! operation resolves to exactly one response, on both the callback and
//! blocking surfaces.
//!
//! ```no_run
//! use enclave::{ExecuteRequest, Zone};
//!
//! # fn main() -> enclave::Result<()> {
//! let zone = Zone::new("compute", "--workers 4")?;
//! zone.broadcast_sync("function add(a, b) { return Number(a) + Number(b); }");
//! let response = zone.execute_sync(ExecuteRequest::function("add").with_arguments(["2", "3"]));
//! assert_eq!(response.return_value.as_deref(), Some("5"));
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod log;
pub mod module;
pub mod zone;

pub use api::{ExecuteRequest, ExecuteResponse, ResponseCode, TaskId, TIMEOUT_MESSAGE};
pub use config::{Config, ZoneSettings};
pub use engine::{EngineError, EngineFactory, ExecutionEngine, MiniEngine, Terminator};
pub use error::{Error, Result};
pub use module::{install_builtins, ModuleCache, NativeModule};
pub use zone::{Zone, ZoneProxy};
