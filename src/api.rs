//! Client-facing request and response types.
//!
//! Every broadcast or execute operation resolves to exactly one
//! [`ResponseCode`] (for broadcasts) or [`ExecuteResponse`] (for executes),
//! on both the synchronous and asynchronous surfaces. Callers branch on the
//! code; there is no separate error channel.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Fixed error message carried by every [`ResponseCode::Timeout`] response.
pub const TIMEOUT_MESSAGE: &str = "Execute exceeded timeout";

/// Outcome classification for zone operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    /// The operation completed successfully on every involved worker.
    Success,
    /// A broadcast script failed to compile or run on at least one worker.
    BroadcastScriptError,
    /// The execute deadline fired before the call completed.
    Timeout,
    /// The target function was missing, threw, or produced an unsupported value.
    ExecutionError,
    /// The requested module could not be resolved.
    ModuleNotFound,
    /// Scheduler or lifecycle failure: zone destroyed, pool exhausted, or a
    /// worker left permanently unrecoverable.
    InternalError,
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseCode::Success => "Success",
            ResponseCode::BroadcastScriptError => "BroadcastScriptError",
            ResponseCode::Timeout => "Timeout",
            ResponseCode::ExecutionError => "ExecutionError",
            ResponseCode::ModuleNotFound => "ModuleNotFound",
            ResponseCode::InternalError => "InternalError",
        };
        write!(f, "{}", name)
    }
}

/// Identifier attached to each dispatched task, for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single function-call request routed to one worker.
///
/// Immutable once submitted. `arguments` are serialized values understood by
/// the execution engine (JSON text for the bundled engine). An absent
/// `timeout` means the call is unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Optional module scoping the function lookup.
    pub module: Option<String>,
    /// Name of the function to invoke.
    pub function: String,
    /// Ordered, serialized call arguments.
    pub arguments: Vec<String>,
    /// Wall-clock deadline, measured from enqueue (queueing delay counts).
    pub timeout: Option<Duration>,
}

impl ExecuteRequest {
    /// Create a request for a global (non-module) function.
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            function: name.into(),
            ..Default::default()
        }
    }

    pub fn in_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The single response produced for an [`ExecuteRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub code: ResponseCode,
    /// Serialized return value, present only on `Success`.
    pub return_value: Option<String>,
    /// Error description, present on failure codes.
    pub error_message: Option<String>,
}

impl ExecuteResponse {
    pub fn success(return_value: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Success,
            return_value: Some(return_value.into()),
            error_message: None,
        }
    }

    pub fn failure(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            return_value: None,
            error_message: Some(message.into()),
        }
    }

    pub fn timeout() -> Self {
        Self::failure(ResponseCode::Timeout, TIMEOUT_MESSAGE)
    }

    pub fn is_success(&self) -> bool {
        self.code == ResponseCode::Success
    }
}
