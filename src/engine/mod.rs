//! Execution engine abstraction.
//!
//! The zone core never interprets scripts itself; it drives an
//! [`ExecutionEngine`] owned by each worker. The bundled [`MiniEngine`]
//! implements a small deterministic script subset so the scheduler is fully
//! exercisable without embedding a real language runtime.
//!
//! Forced interruption of a non-cooperative call is modeled as a separate
//! [`Terminator`] handle: the engine's `call` runs on the worker thread while
//! `terminate` must be invokable from a supervisor thread, so the handle is
//! `Send + Sync` and detached from the engine's `&mut` methods.

pub mod mini;

use std::sync::Arc;

use thiserror::Error;

pub use mini::MiniEngine;

/// Failures surfaced by an execution engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The script failed to parse or compile.
    #[error("compile error: {0}")]
    Compile(String),

    /// The call failed at runtime (missing function, bad operand, throw).
    #[error("runtime error: {0}")]
    Runtime(String),

    /// The call was forcibly terminated before producing a value.
    #[error("execution terminated")]
    Terminated,
}

/// Cross-thread handle that forcibly terminates the engine's in-flight call.
///
/// Termination is asynchronous: the running call observes the request at its
/// next interruption point and returns [`EngineError::Terminated`]. The
/// request stays latched until the engine is reset.
pub trait Terminator: Send + Sync {
    fn terminate(&self);
}

/// One isolated execution context.
///
/// An engine instance is owned by exactly one worker and is never shared;
/// state mutated by one engine is invisible to every other except through
/// explicit broadcast replication.
pub trait ExecutionEngine: Send + 'static {
    /// Compile and apply a script to this context.
    fn compile(&mut self, script: &str) -> Result<(), EngineError>;

    /// Invoke a named function with serialized arguments, returning the
    /// serialized result. Blocks until completion or forced termination.
    fn call(&mut self, function: &str, args: &[String]) -> Result<String, EngineError>;

    /// Obtain the cross-thread termination handle for this context.
    fn terminator(&self) -> Arc<dyn Terminator>;

    /// Confirm the context is sound for reuse after a forced termination.
    /// Clears any latched termination request.
    fn reset(&mut self) -> Result<(), EngineError>;
}

/// Factory producing one fresh engine per worker.
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn ExecutionEngine> + Send + Sync>;
