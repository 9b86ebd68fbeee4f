//! Fixed-size worker pool with round-robin selection.
//!
//! The pool is sized at zone construction and never grows or shrinks.
//! Execute scheduling advances an atomic cursor and skips workers that are
//! interrupting, resetting, or failed; broadcast fan-out addresses every
//! worker unconditionally so contexts cannot drift apart.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::api::TaskId;
use crate::engine::EngineFactory;
use crate::{elog_debug, elog_warn, Error, Result};

use super::worker::{TaskContext, TaskOutcome, Worker, WorkerState, WorkerTask};

pub struct WorkerPool {
    workers: Vec<Worker>,
    cursor: AtomicUsize,
}

impl WorkerPool {
    /// Spawn `size` workers, each with a fresh engine from `factory`,
    /// replaying `bootstrap` then `history` before accepting tasks. Fails
    /// outright if any worker cannot replay; a pool is never exposed with
    /// diverged contexts.
    pub fn new(
        size: usize,
        factory: &EngineFactory,
        bootstrap: Option<&str>,
        history: &[String],
    ) -> Result<Self> {
        if size == 0 {
            return Err(Error::Validation(
                "worker pool size must be at least 1".to_string(),
            ));
        }

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            workers.push(Worker::spawn(index, factory.clone(), bootstrap, history)?);
        }

        elog_debug!("Worker pool ready with {} worker(s)", size);
        Ok(Self {
            workers,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn worker(&self, index: usize) -> Option<&Worker> {
        self.workers.get(index)
    }

    pub fn states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(|w| w.state()).collect()
    }

    /// Pick the next worker round-robin, skipping any that cannot accept
    /// work. Busy (Running) workers are eligible; their queue preserves FIFO
    /// order behind the in-flight task.
    pub fn select(&self) -> Result<&Worker> {
        let len = self.workers.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        for offset in 0..len {
            let worker = &self.workers[(start + offset) % len];
            if worker.is_selectable() {
                return Ok(worker);
            }
        }
        elog_warn!("No selectable worker ({} total)", len);
        Err(Error::PoolExhausted)
    }

    /// Enqueue `script` on every worker and return one outcome receiver per
    /// worker, in worker-index order.
    pub fn broadcast(&self, script: &str) -> Vec<oneshot::Receiver<TaskOutcome>> {
        let mut receivers = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let (tx, rx) = oneshot::channel();
            let ctx = TaskContext::new(
                TaskId::new(),
                Box::new(move |outcome| {
                    let _ = tx.send(outcome);
                }),
            );
            let task = WorkerTask::broadcast(script, ctx);
            if let Err(task) = worker.enqueue(task) {
                task.ctx.fulfill(TaskOutcome::Internal(format!(
                    "worker {} stopped",
                    worker.index()
                )));
            }
            receivers.push(rx);
        }
        receivers
    }

    /// Tear the pool down: stop every worker, interrupt in-flight calls,
    /// close the queues, and join every thread. Stopping comes first so a
    /// non-terminating task still sitting in a queue is failed instead of
    /// executed after the in-flight interrupt; otherwise the join could
    /// block forever.
    pub fn shutdown(&self) {
        for worker in &self.workers {
            worker.stop();
        }
        for worker in &self.workers {
            if worker.state() == WorkerState::Running {
                worker.interrupt_handle().interrupt();
            }
        }
        for worker in &self.workers {
            worker.shutdown();
        }
        for worker in &self.workers {
            worker.join();
        }
        elog_debug!("Worker pool shut down");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .finish()
    }
}
