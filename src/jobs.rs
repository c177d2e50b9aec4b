//! Ephemeral job queues over a worker pool.
//!
//! A thin producer/consumer adapter for fire-and-forget background work:
//! [`Jobs::queue`] pushes a [`JobRequest`] descriptor, [`JobsRunner::run`]
//! serializes each one and hands it to the pool, observing success only via
//! the log. [`Jobs::call`] is the synchronous variant for RPC-style uses and
//! does return the decoded reply payload.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{PoolError, Result};
use crate::pool::Pool;
use crate::wire::{JobRequest, JobResponse, Message};

/// Capacity of the pending-descriptor queue.
pub const QUEUE_CAPACITY: usize = 512;

/// Producer handle. Dropping every clone closes the queue and ends the
/// runner.
#[derive(Clone)]
pub struct Jobs {
    tx: mpsc::Sender<JobRequest>,
    pool: Arc<Pool>,
}

/// Consumer side; [`run`](JobsRunner::run) drives queued jobs to completion.
pub struct JobsRunner {
    rx: mpsc::Receiver<JobRequest>,
    pool: Arc<Pool>,
}

impl Jobs {
    /// Create the queue pair over a pool dedicated to background work.
    pub fn new(pool: Arc<Pool>) -> (Jobs, JobsRunner) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (
            Jobs {
                tx,
                pool: pool.clone(),
            },
            JobsRunner { rx, pool },
        )
    }

    /// Queue a job for background execution. Blocks while the queue is
    /// full; fails once the runner is gone.
    pub async fn queue(&self, req: JobRequest) -> Result<()> {
        self.tx.send(req).await.map_err(|_| PoolError::QueueClosed)
    }

    /// Run the job `name` in a free worker and return its reply payload.
    ///
    /// Unlike the queued path the worker is expected to answer with an
    /// encoded [`JobResponse`].
    pub async fn call(&self, name: &str, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        let req = JobRequest {
            name: name.to_string(),
            payload,
            timeout_ms: timeout.as_millis() as u64,
        };
        let res = self.pool.send(req.to_bytes(), timeout).await?;
        let resp = JobResponse::from_slice(&res)?;
        Ok(resp.payload)
    }
}

impl JobsRunner {
    /// Consume queued descriptors one at a time until the queue closes.
    ///
    /// Each job is serialized in the wire format and submitted with its own
    /// timeout. Errors and replies other than the literal `ok` are logged
    /// and dropped; nothing is reported back to the submitter.
    pub async fn run(mut self) {
        while let Some(req) = self.rx.recv().await {
            let name = req.name.clone();
            let timeout = Duration::from_millis(req.timeout_ms);
            match self.pool.send(req.to_bytes(), timeout).await {
                Err(err) => tracing::error!("job {}: request error: {}", name, err),
                Ok(res) if &res[..] != b"ok" => {
                    tracing::warn!("job {}: worker did not respond with \"ok\"", name);
                }
                Ok(_) => {}
            }
        }
    }
}
