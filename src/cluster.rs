// src/cluster.rs

//! The public facade.
//!
//! [`BatchCluster`] validates its options, spawns the runtime loop and then
//! only ever talks to it over a channel. Handles are cheap to clone; the
//! runtime keeps going until `end()` drains it or the last handle is
//! dropped.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};

use crate::config::{validate, ClusterOptions};
use crate::engine::runtime::{Runtime, RuntimeEvent};
use crate::engine::{Counters, Scheduler};
use crate::errors::{InvalidOptionsError, TaskError};
use crate::events::{ClusterEvent, EventBus};
use crate::task::Task;

/// A pool of reusable child processes behind a single `enqueue` call.
///
/// ```no_run
/// use batchpool::{command_factory, BatchCluster, ClusterOptions};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let cluster = BatchCluster::new(
///     ClusterOptions { max_procs: 4, ..ClusterOptions::default() },
///     command_factory("exiftool", ["-stay_open", "True", "-@", "-"]),
/// )?;
///
/// let answer: String = cluster
///     .enqueue("upcase hello", |stdout, _stderr| Ok(stdout.to_string()))
///     .await?;
///
/// cluster.end(true).await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct BatchCluster {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
    counters: Arc<Counters>,
    bus: Arc<Mutex<EventBus>>,
    ended: Arc<AtomicBool>,
}

impl BatchCluster {
    /// Validate options, spawn the runtime and return a handle.
    ///
    /// Must be called within a tokio runtime. The factory is invoked on the
    /// runtime loop whenever the scheduler wants a fresh child; the child it
    /// returns must have all three stdio streams piped.
    pub fn new<F>(options: ClusterOptions, factory: F) -> Result<Self, InvalidOptionsError>
    where
        F: FnMut() -> io::Result<Child> + Send + 'static,
    {
        validate(&options)?;

        let counters = Arc::new(Counters::default());
        let bus = Arc::new(Mutex::new(EventBus::new()));
        let ended = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        let scheduler = Scheduler::new(options, Arc::clone(&counters));
        let runtime = Runtime::new(
            scheduler,
            Box::new(factory),
            tx.downgrade(),
            Arc::clone(&bus),
            Arc::clone(&counters),
            Arc::clone(&ended),
        );
        tokio::spawn(runtime.run(rx));

        Ok(Self {
            tx,
            counters,
            bus,
            ended,
        })
    }

    /// Queue a command and await its typed result.
    ///
    /// The parser runs once, on the accumulated stdout and stderr of the
    /// task, when the child reports the pass terminal. Every other outcome
    /// arrives as the matching [`TaskError`].
    pub async fn enqueue<T, P>(
        &self,
        command: impl Into<String>,
        parser: P,
    ) -> Result<T, TaskError>
    where
        T: Send + 'static,
        P: FnOnce(&str, &str) -> Result<T, String> + Send + 'static,
    {
        let (task, rx) = Task::new(command, parser);

        if self.tx.send(RuntimeEvent::Enqueue(task)).is_err() {
            return Err(TaskError::ClusterEnded);
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TaskError::ClusterEnded),
        }
    }

    /// Live child PIDs, after a cull pass.
    pub async fn pids(&self) -> Vec<u32> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RuntimeEvent::Pids(reply)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Tasks currently waiting for a child.
    pub async fn pending_task_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RuntimeEvent::PendingCount(reply)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Shut the cluster down and wait for the drain.
    ///
    /// `gracefully` sends the exit command first and escalates through
    /// SIGTERM to SIGKILL on the configured grace windows; `false` goes
    /// straight to SIGKILL. Pending tasks reject with
    /// [`TaskError::ClusterEnded`]. Idempotent: later calls await (or
    /// observe) the same drain.
    pub async fn end(&self, gracefully: bool) {
        if self.ended.load(Ordering::SeqCst) {
            return;
        }

        let (ack, rx) = oneshot::channel();
        if self.tx.send(RuntimeEvent::End { gracefully, ack }).is_err() {
            return;
        }
        let _ = rx.await;
    }

    /// Whether the cluster has fully drained.
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Children spawned over the cluster's lifetime (monotonic).
    pub fn spawned_procs(&self) -> u64 {
        self.counters.spawned_procs()
    }

    /// Average terminal responses per spawned child.
    pub fn mean_tasks_per_proc(&self) -> f64 {
        self.counters.mean_tasks_per_proc()
    }

    /// Internal-error emissions so far.
    pub fn internal_error_count(&self) -> u64 {
        self.counters.internal_errors()
    }

    /// Subscribe to every [`ClusterEvent`].
    ///
    /// Handlers run synchronously on the runtime loop, in registration
    /// order; a panicking handler is reported as an internal error and stays
    /// registered. Don't register from inside a handler.
    pub fn on_event(&self, handler: impl Fn(&ClusterEvent) + Send + 'static) {
        match self.bus.lock() {
            Ok(mut bus) => bus.on(handler),
            Err(poisoned) => poisoned.into_inner().on(handler),
        }
    }
}
