// src/lib.rs

//! batchpool: multiplex batches of line-protocol tasks onto a pool of
//! reusable child processes.
//!
//! The cluster is for callers driving an external command-line tool whose
//! startup is too expensive to pay per call, but which has no daemon mode
//! and no RPC. Children speak a simple request/response protocol over
//! stdin/stdout: one command line in, zero or more content lines plus one
//! terminal marker (`PASS`/`FAIL` by default) out.
//!
//! A single [`BatchCluster::enqueue`] call hides the pool management:
//! children are reused across tasks, retired by age and task count, killed
//! on timeout, and per-task failures (timeouts, parse errors, stderr noise,
//! crashed children) come back as typed [`TaskError`]s without poisoning
//! the pool.

pub mod child;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod logging;
pub mod task;

pub use child::{command_factory, LineDelimiter};
pub use cluster::BatchCluster;
pub use config::{ClusterOptions, Newline};
pub use engine::{ChildId, Counters, Effect, KillSignal, PendingQueue, Scheduler};
pub use errors::{InvalidOptionsError, TaskError};
pub use events::{ClusterEvent, EventBus};
pub use task::{Task, TaskOutput};
