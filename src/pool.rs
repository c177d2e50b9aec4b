//! Worker pool: a fixed fleet of workers behind one submission queue.
//!
//! Dispatch is whatever the queue's receive order gives: every worker
//! consumes from the same bounded channel, so a free worker picks up the
//! next job (first idle wins). There is no round-robin state and no
//! affinity; fairness is statistical.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::{PoolError, Result};
use crate::worker::{Job, Worker};

/// Submission-queue capacity per worker.
const QUEUE_SLOTS_PER_WORKER: usize = 512;

struct Member {
    pid: u32,
    task: JoinHandle<Worker>,
}

#[derive(Default)]
struct State {
    members: Vec<Member>,
    queue: Option<mpsc::Sender<Job>>,
}

/// Owner of a fixed set of workers and the bounded queue connecting callers
/// to them.
#[derive(Default)]
pub struct Pool {
    state: Mutex<State>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `n` workers concurrently with the given argv and environment
    /// and wait until all of them have completed the startup handshake.
    ///
    /// Fails if the pool is already running. If any worker fails to start,
    /// the first error is returned and the successfully started part of the
    /// fleet is kept; callers should [`stop`](Pool::stop) on failure.
    pub async fn start(
        &self,
        argv: Vec<String>,
        n: usize,
        env: Vec<(String, String)>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.queue.is_some() || !state.members.is_empty() {
            return Err(PoolError::AlreadyStarted);
        }
        // A zero-capacity channel is rejected by tokio; an empty pool still
        // gets a queue so its lifecycle stays uniform.
        let (tx, rx) = mpsc::channel((n * QUEUE_SLOTS_PER_WORKER).max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut set = JoinSet::new();
        for _ in 0..n {
            let argv = argv.clone();
            let env = env.clone();
            set.spawn(async move {
                let mut wrk = Worker::new();
                wrk.start(argv, env).await.map(|()| wrk)
            });
        }

        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(wrk)) => {
                    let pid = wrk.pid().unwrap_or_default();
                    let task = tokio::spawn(wrk.run(rx.clone()));
                    state.members.push(Member { pid, task });
                }
                Ok(Err(err)) => {
                    first_err.get_or_insert(err);
                }
                Err(err) => {
                    first_err.get_or_insert(PoolError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        err.to_string(),
                    )));
                }
            }
        }

        // The queue is installed even on a partial start so stop() can wind
        // the survivors down.
        state.queue = Some(tx);
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Enqueue a job and return the receiving end of its reply channel.
    ///
    /// Blocks only while the submission queue is full; that is the
    /// backpressure signal to front-ends. Fails when the pool is not running.
    pub async fn submit(
        &self,
        data: Bytes,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Result<Bytes>>> {
        let tx = {
            let state = self.state.lock().await;
            state.queue.clone().ok_or(PoolError::NotRunning)?
        };
        let (job, reply) = Job::new(data, timeout);
        tx.send(job).await.map_err(|_| PoolError::QueueClosed)?;
        Ok(reply)
    }

    /// Enqueue a job and wait for its result.
    pub async fn send(&self, data: Bytes, timeout: Duration) -> Result<Bytes> {
        let reply = self.submit(data, timeout).await?;
        reply.await.map_err(|_| PoolError::QueueClosed)?
    }

    /// Close the submission queue, let every worker drain and exit its loop,
    /// then stop the workers and reset the member list.
    ///
    /// Safe to call on a pool that never started or only partially started;
    /// worker stop failures are logged, not propagated.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.queue = None;
        for member in state.members.drain(..) {
            match member.task.await {
                Ok(mut wrk) => {
                    if let Err(err) = wrk.stop().await {
                        tracing::warn!("PID {}: worker stop error: {}", member.pid, err);
                    }
                }
                Err(err) => {
                    tracing::warn!("PID {}: worker task join error: {}", member.pid, err);
                }
            }
        }
    }

    /// PIDs recorded at worker startup. A restarted worker keeps its slot
    /// but gets a new PID, so entries can be stale; this is a diagnostic
    /// surface, not a liveness check.
    pub async fn pids(&self) -> Vec<u32> {
        self.state.lock().await.members.iter().map(|m| m.pid).collect()
    }

    /// Number of workers currently owned by the pool.
    pub async fn len(&self) -> usize {
        self.state.lock().await.members.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.members.is_empty()
    }
}

/// Counter of consecutive timeouts, for front-ends that treat a wedged child
/// runtime as fatal.
///
/// The pool itself never aborts the process; a front-end records every
/// outcome it gets back and terminates the supervisor when
/// [`record`](TimeoutFuse::record) reports the fuse as blown. Any
/// non-timeout outcome resets the count. The conventional threshold is
/// `2 × pool size`.
pub struct TimeoutFuse {
    threshold: u32,
    count: AtomicU32,
}

impl TimeoutFuse {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            count: AtomicU32::new(0),
        }
    }

    /// Fuse sized for a pool of `n` workers.
    pub fn for_pool_size(n: usize) -> Self {
        Self::new((n as u32).saturating_mul(2))
    }

    /// Record one request outcome; returns `true` when the threshold of
    /// back-to-back timeouts has been reached.
    pub fn record<T>(&self, outcome: &Result<T>) -> bool {
        match outcome {
            Err(PoolError::TimedOut { .. }) => {
                self.count.fetch_add(1, Ordering::AcqRel) + 1 >= self.threshold
            }
            _ => {
                self.count.store(0, Ordering::Release);
                false
            }
        }
    }

    /// Number of consecutive timeouts seen so far.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed_out() -> Result<Bytes> {
        Err(PoolError::TimedOut {
            pid: 42,
            elapsed: Duration::from_millis(100),
        })
    }

    #[tokio::test]
    async fn test_submit_before_start_fails() {
        let pool = Pool::new();
        let err = pool
            .submit(Bytes::from_static(b"x"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::NotRunning));
    }

    #[tokio::test]
    async fn test_start_with_zero_workers_is_degenerate_but_ok() {
        let pool = Pool::new();
        pool.start(vec!["true".to_string()], 0, Vec::new())
            .await
            .unwrap();
        assert!(pool.is_empty().await);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_a_no_op() {
        let pool = Pool::new();
        pool.stop().await;
        assert!(pool.is_empty().await);
    }

    #[test]
    fn test_fuse_trips_after_consecutive_timeouts() {
        let fuse = TimeoutFuse::new(3);
        assert!(!fuse.record(&timed_out()));
        assert!(!fuse.record(&timed_out()));
        assert!(fuse.record(&timed_out()));
    }

    #[test]
    fn test_fuse_resets_on_success() {
        let fuse = TimeoutFuse::new(2);
        assert!(!fuse.record(&timed_out()));
        assert!(!fuse.record(&Ok(Bytes::from_static(b"ok"))));
        assert_eq!(fuse.count(), 0);
        assert!(!fuse.record(&timed_out()));
        assert!(fuse.record(&timed_out()));
    }

    #[test]
    fn test_fuse_ignores_other_errors() {
        let fuse = TimeoutFuse::new(1);
        let err: Result<Bytes> = Err(PoolError::QueueClosed);
        assert!(!fuse.record(&err));
        assert!(fuse.record(&timed_out()));
    }

    #[test]
    fn test_fuse_for_pool_size_doubles() {
        let fuse = TimeoutFuse::for_pool_size(4);
        for _ in 0..7 {
            assert!(!fuse.record(&timed_out()));
        }
        assert!(fuse.record(&timed_out()));
    }
}
