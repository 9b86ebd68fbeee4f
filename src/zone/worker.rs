//! Worker: one execution context plus its private FIFO task queue, running
//! on a dedicated thread.
//!
//! Tasks on one worker execute strictly in submission order; no two tasks
//! run concurrently on the same worker. The worker's state machine is
//! `Idle -> Running -> Idle` for the happy path and
//! `Running -> Interrupting -> Resetting -> Idle` when a supervisor forcibly
//! reclaims it. A failed reset parks the worker in `Failed`: it drains its
//! queue with internal errors and is skipped by selection.
//!
//! Exactly-once response delivery is enforced by [`TaskContext`]: the worker
//! and the timeout supervisor race for the completion sink under one lock,
//! and whichever side takes it delivers the single response. Interrupt
//! marking happens inside that same critical section, so a supervisor can
//! never terminate a call that already finished and moved on.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::api::TaskId;
use crate::engine::{EngineError, EngineFactory, ExecutionEngine, Terminator};
use crate::{elog_debug, elog_error, elog_trace, Error, Result};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Running = 1,
    Interrupting = 2,
    Resetting = 3,
    /// Terminal: the post-interrupt reset failed and the context cannot be
    /// trusted for reuse.
    Failed = 4,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Idle,
            1 => WorkerState::Running,
            2 => WorkerState::Interrupting,
            3 => WorkerState::Resetting,
            _ => WorkerState::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "Idle",
            WorkerState::Running => "Running",
            WorkerState::Interrupting => "Interrupting",
            WorkerState::Resetting => "Resetting",
            WorkerState::Failed => "Failed",
        }
    }
}

/// Result of running one task on a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task produced a serialized value (empty for broadcasts).
    Success(String),
    /// A broadcast script failed to compile or apply.
    ScriptError(String),
    /// An execute call failed (missing function, throw, bad operand).
    ExecutionError(String),
    /// The deadline fired; delivered by the timeout supervisor.
    TimedOut,
    /// The call was forcibly terminated outside the timeout path.
    Terminated,
    /// Scheduler-level failure (worker stopped or unrecoverable).
    Internal(String),
}

/// Completion sink invoked exactly once per task.
pub type CompletionSink = Box<dyn FnOnce(TaskOutcome) + Send>;

struct TaskCell {
    sink: Option<CompletionSink>,
    started: bool,
}

/// Shared per-task state mediating the worker/supervisor race.
pub struct TaskContext {
    id: TaskId,
    cell: Mutex<TaskCell>,
}

impl TaskContext {
    pub fn new(id: TaskId, sink: CompletionSink) -> Arc<Self> {
        Arc::new(Self {
            id,
            cell: Mutex::new(TaskCell {
                sink: Some(sink),
                started: false,
            }),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TaskCell> {
        self.cell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Worker side: claim the task for execution. Returns false when the
    /// sink is already gone (the task timed out while still queued), in
    /// which case the worker skips it without any state transition.
    pub fn claim(&self) -> bool {
        let mut cell = self.lock();
        if cell.sink.is_none() {
            return false;
        }
        cell.started = true;
        true
    }

    /// Deliver the response if nobody else has. Returns whether this call
    /// delivered it.
    pub fn fulfill(&self, outcome: TaskOutcome) -> bool {
        let sink = self.lock().sink.take();
        match sink {
            Some(sink) => {
                sink(outcome);
                true
            }
            None => false,
        }
    }

    /// Supervisor side: take the sink at deadline. If the task had already
    /// started, `interrupt_started` runs inside the critical section, so the
    /// worker cannot observe the sink gone without also observing the
    /// interrupt marking. Returns the sink for the caller to deliver the
    /// timeout response, or None if the task already completed.
    pub fn expire<F: FnOnce()>(&self, interrupt_started: F) -> Option<CompletionSink> {
        let mut cell = self.lock();
        let sink = cell.sink.take()?;
        if cell.started {
            interrupt_started();
        }
        Some(sink)
    }
}

/// The work carried by one queue entry.
#[derive(Debug, Clone)]
pub enum TaskKind {
    /// Apply a script to this worker's context.
    Broadcast(String),
    /// Invoke a function with serialized arguments.
    Execute {
        function: String,
        arguments: Vec<String>,
    },
}

/// One unit of work: what to run plus the shared completion state.
pub struct WorkerTask {
    pub kind: TaskKind,
    pub ctx: Arc<TaskContext>,
}

impl WorkerTask {
    pub fn broadcast(script: impl Into<String>, ctx: Arc<TaskContext>) -> Self {
        Self {
            kind: TaskKind::Broadcast(script.into()),
            ctx,
        }
    }

    pub fn execute(function: impl Into<String>, arguments: Vec<String>, ctx: Arc<TaskContext>) -> Self {
        Self {
            kind: TaskKind::Execute {
                function: function.into(),
                arguments,
            },
            ctx,
        }
    }
}

enum WorkerMessage {
    Run(WorkerTask),
    Shutdown,
}

/// Cross-thread handle used by timeout supervisors and zone teardown to
/// forcibly reclaim a worker.
#[derive(Clone)]
pub struct InterruptHandle {
    index: usize,
    state: Arc<AtomicU8>,
    terminator: Arc<dyn Terminator>,
}

impl InterruptHandle {
    /// Mark the worker Interrupting and request engine termination. The
    /// worker confirms by walking Resetting back to Idle.
    pub fn interrupt(&self) {
        elog_debug!("Worker {} interrupting", self.index);
        self.state
            .store(WorkerState::Interrupting as u8, Ordering::SeqCst);
        self.terminator.terminate();
    }
}

/// Handle to one worker thread.
pub struct Worker {
    index: usize,
    state: Arc<AtomicU8>,
    stopping: Arc<AtomicBool>,
    terminator: Arc<dyn Terminator>,
    queue: Mutex<Option<Sender<WorkerMessage>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Build the engine, replay bootstrap and history in order, then start
    /// the worker thread. Any replay failure aborts the spawn: a worker is
    /// never exposed in a state diverging from its siblings.
    pub fn spawn(
        index: usize,
        factory: EngineFactory,
        bootstrap: Option<&str>,
        history: &[String],
    ) -> Result<Self> {
        let mut engine = factory();

        if let Some(script) = bootstrap {
            engine.compile(script).map_err(|e| Error::WorkerInit {
                index,
                message: format!("bootstrap replay failed: {}", e),
            })?;
        }
        for (seq, script) in history.iter().enumerate() {
            engine.compile(script).map_err(|e| Error::WorkerInit {
                index,
                message: format!("history replay failed at entry {}: {}", seq, e),
            })?;
        }

        let terminator = engine.terminator();
        let state = Arc::new(AtomicU8::new(WorkerState::Idle as u8));
        let stopping = Arc::new(AtomicBool::new(false));
        let (queue, rx) = unbounded();

        let thread_state = state.clone();
        let thread_stopping = stopping.clone();
        let thread = std::thread::Builder::new()
            .name(format!("enclave-worker-{}", index))
            .spawn(move || run_loop(index, engine, rx, thread_state, thread_stopping))?;

        elog_debug!("Worker {} ready ({} history entries replayed)", index, history.len());

        Ok(Self {
            index,
            state,
            stopping,
            terminator,
            queue: Mutex::new(Some(queue)),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Selection only considers Idle and Running workers; interrupted,
    /// resetting, and failed ones are passed over.
    pub fn is_selectable(&self) -> bool {
        matches!(self.state(), WorkerState::Idle | WorkerState::Running)
    }

    /// Append a task to this worker's queue. On failure the task is handed
    /// back so the caller can complete its sink.
    pub fn enqueue(&self, task: WorkerTask) -> std::result::Result<(), WorkerTask> {
        elog_trace!("Worker {} enqueue task {}", self.index, task.ctx.id());
        let queue = self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match queue.as_ref() {
            None => Err(task),
            Some(sender) => sender
                .send(WorkerMessage::Run(task))
                .map_err(|err| match err.0 {
                    WorkerMessage::Run(task) => task,
                    WorkerMessage::Shutdown => unreachable!("sent a Run message"),
                }),
        }
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            index: self.index,
            state: self.state.clone(),
            terminator: self.terminator.clone(),
        }
    }

    /// Mark the worker as tearing down: tasks dequeued from here on are
    /// failed with an internal error instead of executed. Without this, a
    /// queued non-terminating task would outlive the interrupt of the
    /// in-flight call and block the join forever.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Close the queue and request the thread to exit. Tasks already queued
    /// still get a response; new enqueues are handed back to the caller.
    pub fn shutdown(&self) {
        let sender = self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(WorkerMessage::Shutdown);
        }
        // The sender drops here; once the thread's final drain sees the
        // channel disconnected, nothing can be in flight anymore.
    }

    pub fn join(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("index", &self.index)
            .field("state", &self.state())
            .finish()
    }
}

fn run_loop(
    index: usize,
    mut engine: Box<dyn ExecutionEngine>,
    rx: Receiver<WorkerMessage>,
    state: Arc<AtomicU8>,
    stopping: Arc<AtomicBool>,
) {
    while let Ok(message) = rx.recv() {
        let task = match message {
            WorkerMessage::Shutdown => break,
            WorkerMessage::Run(task) => task,
        };

        if state.load(Ordering::SeqCst) == WorkerState::Failed as u8 {
            task.ctx.fulfill(TaskOutcome::Internal(format!(
                "worker {} is unrecoverable",
                index
            )));
            continue;
        }

        // Running is stored before claiming, so a supervisor that marks us
        // Interrupting right after the claim cannot be overwritten.
        state.store(WorkerState::Running as u8, Ordering::SeqCst);
        if !task.ctx.claim() {
            elog_trace!("Worker {} skipping expired task {}", index, task.ctx.id());
            state.store(WorkerState::Idle as u8, Ordering::SeqCst);
            continue;
        }

        // Checked after the Running store: teardown either observes Running
        // and interrupts the call, or this load observes the stop and the
        // task is failed without running. Either way a non-terminating task
        // cannot strand the thread.
        if stopping.load(Ordering::SeqCst) {
            task.ctx.fulfill(TaskOutcome::Internal(format!(
                "worker {} shutting down",
                index
            )));
            state.store(WorkerState::Idle as u8, Ordering::SeqCst);
            continue;
        }

        let outcome = match &task.kind {
            TaskKind::Broadcast(script) => match engine.compile(script) {
                Ok(()) => TaskOutcome::Success(String::new()),
                Err(e) => TaskOutcome::ScriptError(e.to_string()),
            },
            TaskKind::Execute {
                function,
                arguments,
            } => match engine.call(function, arguments) {
                Ok(value) => TaskOutcome::Success(value),
                Err(EngineError::Terminated) => TaskOutcome::Terminated,
                Err(e) => TaskOutcome::ExecutionError(e.to_string()),
            },
        };

        let was_terminated = matches!(outcome, TaskOutcome::Terminated);
        let delivered = task.ctx.fulfill(outcome);
        elog_trace!(
            "Worker {} task {} finished (delivered={})",
            index,
            task.ctx.id(),
            delivered
        );

        // Fulfill above acquired the task lock, so an interrupt marked by a
        // supervisor that took the sink is visible here.
        let interrupted =
            was_terminated || state.load(Ordering::SeqCst) == WorkerState::Interrupting as u8;
        if interrupted {
            state.store(WorkerState::Resetting as u8, Ordering::SeqCst);
            match engine.reset() {
                Ok(()) => {
                    elog_debug!("Worker {} reset complete", index);
                    state.store(WorkerState::Idle as u8, Ordering::SeqCst);
                }
                Err(e) => {
                    elog_error!("Worker {} reset failed, marking unrecoverable: {}", index, e);
                    state.store(WorkerState::Failed as u8, Ordering::SeqCst);
                }
            }
        } else {
            state.store(WorkerState::Idle as u8, Ordering::SeqCst);
        }
    }

    // Anything that made it into the channel gets a response; no request is
    // ever silently dropped. The sender was dropped when the queue closed,
    // so this loop ends at disconnect with nothing left in flight.
    while let Ok(message) = rx.recv() {
        if let WorkerMessage::Run(task) = message {
            task.ctx.fulfill(TaskOutcome::Internal(format!(
                "worker {} shut down",
                index
            )));
        }
    }

    elog_debug!("Worker {} thread exiting", index);
}
