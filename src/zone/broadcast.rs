//! Broadcast coordination: fan a script out to every worker, aggregate one
//! result, and keep the replay history for future workers.
//!
//! The history lock is held from before fan-out until after the aggregated
//! result is known. Concurrent broadcasts therefore serialize, which keeps a
//! single total order of successful scripts: every worker context applies
//! the same scripts in the same sequence.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;

use crate::api::ResponseCode;
use crate::{elog, elog_warn};

use super::pool::WorkerPool;
use super::worker::TaskOutcome;

pub struct BroadcastCoordinator {
    pool: Arc<WorkerPool>,
    history: Mutex<Vec<String>>,
}

impl BroadcastCoordinator {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Apply `script` to every worker and aggregate a single response code.
    ///
    /// Success requires every worker to succeed; the first failure in
    /// worker-index order decides the aggregated code. The script joins the
    /// replay history only when all workers succeeded, so the history never
    /// records a script that some context rejected.
    pub async fn broadcast(&self, script: String) -> ResponseCode {
        let mut history = self.history.lock().await;

        let receivers = self.pool.broadcast(&script);
        let outcomes = join_all(receivers).await;

        let mut failure: Option<(usize, ResponseCode, String)> = None;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let failed = match outcome {
                Ok(TaskOutcome::Success(_)) => None,
                Ok(TaskOutcome::ScriptError(msg)) | Ok(TaskOutcome::ExecutionError(msg)) => {
                    Some((ResponseCode::BroadcastScriptError, msg))
                }
                Ok(TaskOutcome::TimedOut) | Ok(TaskOutcome::Terminated) => Some((
                    ResponseCode::InternalError,
                    "broadcast terminated".to_string(),
                )),
                Ok(TaskOutcome::Internal(msg)) => Some((ResponseCode::InternalError, msg)),
                Err(_) => Some((
                    ResponseCode::InternalError,
                    "worker dropped broadcast response".to_string(),
                )),
            };
            if let Some((code, msg)) = failed {
                if failure.is_none() {
                    failure = Some((index, code, msg));
                }
            }
        }

        match failure {
            None => {
                history.push(script);
                elog!("Broadcast succeeded on {} worker(s)", self.pool.len());
                ResponseCode::Success
            }
            Some((index, code, msg)) => {
                elog_warn!("Broadcast failed on worker {}: {}", index, msg);
                code
            }
        }
    }

    /// Snapshot of every successfully broadcast script, in order.
    pub async fn history(&self) -> Vec<String> {
        self.history.lock().await.clone()
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }
}
