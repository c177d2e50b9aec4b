//! # procpool
//!
//! Supervisor for a fixed fleet of long-lived child processes ("workers"),
//! typically interpreter runtimes serving one request at a time.
//!
//! ## Architecture
//!
//! ```text
//! caller ─► Pool::send ─► bounded queue ─┬─► Worker 1 ◄─ stdio frames ─► child
//!                                        ├─► Worker 2 ◄─ stdio frames ─► child
//!                                        └─► Worker n ◄─ stdio frames ─► child
//! ```
//!
//! Each worker owns one child process and exchanges one length-prefixed
//! frame per request over the child's private stdin/stdout ([`frame`]).
//! Payloads use a positional little-endian binary format ([`wire`]). A
//! per-request deadline races every exchange; expiry force-restarts the
//! worker and surfaces [`PoolError::TimedOut`] to the caller.
//!
//! ## Example
//!
//! ```ignore
//! use std::time::Duration;
//! use bytes::Bytes;
//! use procpool::Pool;
//!
//! #[tokio::main]
//! async fn main() -> procpool::Result<()> {
//!     let pool = Pool::new();
//!     pool.start(vec!["php".into(), "worker.php".into()], 4, Vec::new())
//!         .await?;
//!     let reply = pool
//!         .send(Bytes::from_static(b"payload"), Duration::from_secs(5))
//!         .await?;
//!     println!("worker replied with {} bytes", reply.len());
//!     pool.stop().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod frame;
pub mod jobs;
pub mod pool;
pub mod wire;
pub mod worker;

pub use error::{PoolError, Result};
pub use jobs::{Jobs, JobsRunner};
pub use pool::{Pool, TimeoutFuse};
pub use worker::{Job, Worker};
