//! Execute scheduling: resolve, select, dispatch, supervise.
//!
//! A timed request's deadline is armed before the task is enqueued, so time
//! spent waiting in a busy worker's queue counts against the timeout. At the
//! deadline the supervisor races the worker for the completion sink through
//! [`TaskContext::expire`]; it interrupts the worker only if the task had
//! actually started, so a task still sitting in the queue expires without
//! disturbing whatever the worker is running.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::api::{ExecuteRequest, ExecuteResponse, ResponseCode, TaskId};
use crate::module::ModuleResolver;
use crate::{elog_debug, elog_warn};

use super::pool::WorkerPool;
use super::worker::{CompletionSink, TaskContext, TaskOutcome, WorkerTask};

/// Callback receiving the single response for one execute request.
pub type ExecuteCallback = Box<dyn FnOnce(ExecuteResponse) + Send + 'static>;

pub struct ExecuteScheduler {
    pool: Arc<WorkerPool>,
    resolver: Arc<dyn ModuleResolver>,
    runtime: Handle,
    cancel: CancellationToken,
}

impl ExecuteScheduler {
    pub fn new(
        pool: Arc<WorkerPool>,
        resolver: Arc<dyn ModuleResolver>,
        runtime: Handle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            resolver,
            runtime,
            cancel,
        }
    }

    /// Dispatch one request. `callback` is invoked exactly once, from
    /// whichever thread settles the task first.
    pub fn execute(&self, request: ExecuteRequest, callback: ExecuteCallback) {
        let task_id = TaskId::new();

        let function = match &request.module {
            None => request.function.clone(),
            Some(module) => match self.resolver.resolve(module) {
                Some(handle) => format!("{}.{}", handle.name, request.function),
                None => {
                    elog_debug!("Task {}: module '{}' not found", task_id, module);
                    callback(ExecuteResponse::failure(
                        ResponseCode::ModuleNotFound,
                        format!("module not found: {}", module),
                    ));
                    return;
                }
            },
        };

        let worker = match self.pool.select() {
            Ok(worker) => worker,
            Err(e) => {
                elog_warn!("Task {}: no worker available: {}", task_id, e);
                callback(ExecuteResponse::failure(
                    ResponseCode::InternalError,
                    e.to_string(),
                ));
                return;
            }
        };

        let sink: CompletionSink = Box::new(move |outcome| callback(outcome_response(outcome)));
        let ctx = TaskContext::new(task_id, sink);

        // Armed before enqueue: queueing delay counts against the deadline.
        if let Some(timeout) = request.timeout {
            let supervised = ctx.clone();
            let interrupt = worker.interrupt_handle();
            let cancel = self.cancel.child_token();
            let worker_index = worker.index();
            self.runtime.spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        if let Some(sink) = supervised.expire(|| interrupt.interrupt()) {
                            elog_warn!(
                                "Task {} timed out after {:?} on worker {}",
                                supervised.id(),
                                timeout,
                                worker_index
                            );
                            sink(TaskOutcome::TimedOut);
                        }
                    }
                }
            });
        }

        elog_debug!(
            "Task {} dispatching '{}' to worker {}",
            task_id,
            function,
            worker.index()
        );
        let task = WorkerTask::execute(function, request.arguments, ctx);
        if let Err(task) = worker.enqueue(task) {
            task.ctx.fulfill(TaskOutcome::Internal(format!(
                "worker {} stopped",
                worker.index()
            )));
        }
    }
}

fn outcome_response(outcome: TaskOutcome) -> ExecuteResponse {
    match outcome {
        TaskOutcome::Success(value) => ExecuteResponse::success(value),
        TaskOutcome::TimedOut => ExecuteResponse::timeout(),
        TaskOutcome::ExecutionError(msg) | TaskOutcome::ScriptError(msg) => {
            ExecuteResponse::failure(ResponseCode::ExecutionError, msg)
        }
        TaskOutcome::Terminated => ExecuteResponse::failure(
            ResponseCode::InternalError,
            "execution terminated".to_string(),
        ),
        TaskOutcome::Internal(msg) => ExecuteResponse::failure(ResponseCode::InternalError, msg),
    }
}
