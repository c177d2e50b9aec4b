//! Worker processes and their request loop.
//!
//! A [`Worker`] owns one child process and its three standard streams. The
//! child speaks the framing of [`crate::frame`]: after its `ok` handshake it
//! reads one framed request at a time from stdin and answers each with
//! exactly one framed reply on stdout. Requests are strictly serialized per
//! worker; concurrency comes from running several workers over one shared
//! submission queue (see [`crate::pool`]).
//!
//! The consumer loop is the sole owner of the pipe ends, so there is no
//! per-request lock: a second frame cannot be written before the current
//! reply has been read or the worker has been torn down and respawned.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{PoolError, Result};
use crate::frame;

/// One unit of work: request bytes, a deadline, and a single-use reply
/// channel. Consumed exactly once by whichever worker pulls it off the
/// shared queue.
#[derive(Debug)]
pub struct Job {
    pub(crate) data: Bytes,
    pub(crate) timeout: Duration,
    pub(crate) reply: oneshot::Sender<Result<Bytes>>,
}

impl Job {
    /// Create a job and the receiving end of its reply channel.
    pub fn new(data: Bytes, timeout: Duration) -> (Self, oneshot::Receiver<Result<Bytes>>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                data,
                timeout,
                reply,
            },
            rx,
        )
    }
}

/// Receiving side of the shared submission queue. Every worker of a pool
/// consumes from the same receiver; the mutex is the rendezvous that hands
/// each job to exactly one idle worker.
pub(crate) type JobQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

struct Proc {
    child: Child,
    pid: u32,
    stdout: BufReader<ChildStdout>,
    stdin: BufWriter<ChildStdin>,
}

/// A supervised child process serving one request at a time.
///
/// Created unstarted; [`start`](Worker::start) saves the argv/env (restarts
/// reuse them), spawns the child and waits for its handshake.
#[derive(Default)]
pub struct Worker {
    argv: Vec<String>,
    env: Vec<(String, String)>,
    proc: Option<Proc>,
}

impl Worker {
    pub fn new() -> Self {
        Self::default()
    }

    /// PID of the live child, if any.
    pub fn pid(&self) -> Option<u32> {
        self.proc.as_ref().map(|p| p.pid)
    }

    /// Spawn the child process and wait for its `ok` handshake.
    ///
    /// The supervisor's environment is not inherited: `env` fully replaces
    /// it. Fails if the worker is already running, if the child cannot be
    /// spawned, or if the handshake does not arrive.
    pub async fn start(&mut self, argv: Vec<String>, env: Vec<(String, String)>) -> Result<()> {
        if self.proc.is_some() {
            return Err(PoolError::AlreadyStarted);
        }
        if argv.is_empty() {
            return Err(PoolError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty argv",
            )));
        }
        self.argv = argv;
        self.env = env;
        self.spawn().await
    }

    /// Ask the child to exit by writing the shutdown signal, then reap it.
    pub async fn stop(&mut self) -> Result<()> {
        let proc = self.proc.as_mut().ok_or(PoolError::NotRunning)?;
        frame::write_shutdown(&mut proc.stdin).await?;
        let status = proc.child.wait().await?;
        self.proc = None;
        if !status.success() {
            return Err(PoolError::Exited(status));
        }
        Ok(())
    }

    /// Terminate the child with an OS kill and reap it.
    pub async fn kill(&mut self) -> Result<()> {
        let proc = self.proc.as_mut().ok_or(PoolError::NotRunning)?;
        proc.child.kill().await?;
        self.proc = None;
        Ok(())
    }

    /// Block until the child exits on its own.
    pub async fn wait(&mut self) -> Result<()> {
        let proc = self.proc.as_mut().ok_or(PoolError::NotRunning)?;
        let status = proc.child.wait().await?;
        self.proc = None;
        if !status.success() {
            return Err(PoolError::Exited(status));
        }
        Ok(())
    }

    /// Tear down the current child (killing it when `force`, otherwise
    /// waiting for its natural exit) and spawn a fresh one with the argv and
    /// env saved at [`start`](Worker::start).
    pub async fn restart(&mut self, force: bool) -> Result<()> {
        if let Some(proc) = self.proc.as_mut() {
            if force {
                if let Err(err) = proc.child.start_kill() {
                    tracing::warn!("PID {}: restart kill error: {}", proc.pid, err);
                }
            }
            // Reap exactly once, whether the child died to the kill above or
            // exited on its own.
            if let Err(err) = proc.child.wait().await {
                tracing::warn!("PID {}: restart wait error: {}", proc.pid, err);
            }
            self.proc = None;
        }
        self.spawn().await
    }

    /// Send one request and wait for its reply, racing the deadline.
    ///
    /// Whichever finishes first decides the request's fate:
    ///
    /// - reply first: framing/write errors force-restart the worker before
    ///   the error is returned; clean replies are returned as-is;
    /// - deadline first: the worker is force-restarted and the caller gets
    ///   [`PoolError::TimedOut`] carrying the old PID and the elapsed time.
    ///
    /// The losing side's eventual outcome is discarded.
    ///
    /// A worker left without a process by an earlier failed restart is
    /// respawned here before it serves traffic again.
    pub async fn timed_send(&mut self, data: &[u8], timeout: Duration) -> Result<Bytes> {
        let pid = match self.pid() {
            Some(pid) => pid,
            None if !self.argv.is_empty() => {
                self.restart(true).await?;
                self.pid().ok_or(PoolError::NotRunning)?
            }
            None => return Err(PoolError::NotRunning),
        };
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.exchange(data)).await;
        match outcome {
            Ok(Ok(res)) => Ok(res),
            Ok(Err(err)) => {
                if let Err(rerr) = self.restart(true).await {
                    tracing::error!("PID {}: restart after I/O error failed: {}", pid, rerr);
                }
                Err(err)
            }
            Err(_) => {
                if let Err(rerr) = self.restart(true).await {
                    tracing::error!("PID {}: restart after timeout failed: {}", pid, rerr);
                }
                Err(PoolError::TimedOut {
                    pid,
                    elapsed: start.elapsed(),
                })
            }
        }
    }

    /// Consume jobs from the shared queue until it closes, then hand the
    /// worker back so the pool can stop it.
    pub(crate) async fn run(mut self, queue: JobQueue) -> Worker {
        loop {
            let job = queue.lock().await.recv().await;
            let Some(job) = job else {
                return self;
            };
            let result = self.timed_send(&job.data, job.timeout).await;
            // The submitter may have given up; nobody else reads the reply.
            let _ = job.reply.send(result);
        }
    }

    async fn exchange(&mut self, data: &[u8]) -> Result<Bytes> {
        let proc = self.proc.as_mut().ok_or(PoolError::NotRunning)?;
        if let Err(err) = frame::write_message(&mut proc.stdin, data).await {
            tracing::error!("PID {}: write error: {}", proc.pid, err);
            return Err(err);
        }
        match frame::read_message(&mut proc.stdout).await {
            Ok(res) => Ok(res.into()),
            Err(err) => {
                tracing::error!("PID {}: read error: {}", proc.pid, err);
                Err(err)
            }
        }
    }

    async fn spawn(&mut self) -> Result<()> {
        let start = Instant::now();
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..])
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;

        let pid = child.id().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "child exited before PID was read")
        })?;
        let stdin = take_pipe(child.stdin.take(), "stdin")?;
        let stdout = take_pipe(child.stdout.take(), "stdout")?;
        let stderr = take_pipe(child.stderr.take(), "stderr")?;

        tokio::spawn(drain_stderr(stderr, pid));

        let mut stdout = BufReader::new(stdout);
        frame::read_handshake(&mut stdout).await?;

        tracing::info!("PID {}: worker started in {:?}", pid, start.elapsed());
        self.proc = Some(Proc {
            child,
            pid,
            stdout,
            stdin: BufWriter::new(stdin),
        });
        Ok(())
    }
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> Result<T> {
    pipe.ok_or_else(|| {
        PoolError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("child {name} was not captured"),
        ))
    })
}

/// Copy the child's stderr to the supervisor's log, one line per record,
/// until EOF. A read error ends the drain but never the worker.
async fn drain_stderr(stderr: ChildStderr, pid: u32) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!("PID {}: {}", pid, line),
            Ok(None) => break,
            Err(err) => {
                tracing::warn!("PID {}: stderr drain error: {}", pid, err);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle_calls_on_unstarted_worker_fail() {
        let mut wrk = Worker::new();
        assert!(matches!(wrk.stop().await, Err(PoolError::NotRunning)));
        assert!(matches!(wrk.kill().await, Err(PoolError::NotRunning)));
        assert!(matches!(wrk.wait().await, Err(PoolError::NotRunning)));
        assert!(matches!(
            wrk.timed_send(b"x", Duration::from_millis(10)).await,
            Err(PoolError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_start_with_empty_argv_fails() {
        let mut wrk = Worker::new();
        assert!(wrk.start(Vec::new(), Vec::new()).await.is_err());
        assert!(wrk.pid().is_none());
    }

    #[tokio::test]
    async fn test_start_with_missing_binary_fails() {
        let mut wrk = Worker::new();
        let err = wrk
            .start(vec!["/nonexistent/procpool-worker".to_string()], Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Io(_)));
        // Stop stays a no-op error, not a panic.
        assert!(matches!(wrk.stop().await, Err(PoolError::NotRunning)));
    }

    #[test]
    fn test_job_reply_channel_is_single_use() {
        let (job, rx) = Job::new(Bytes::from_static(b"payload"), Duration::from_secs(1));
        assert_eq!(&job.data[..], b"payload");
        job.reply.send(Ok(Bytes::from_static(b"done"))).unwrap();
        assert_eq!(&rx.blocking_recv().unwrap().unwrap()[..], b"done");
    }
}
