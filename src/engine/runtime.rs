// src/engine/runtime.rs

//! The event loop that owns the scheduler.
//!
//! One tokio task consumes a unified event stream (facade commands, child
//! stdout/stderr chunks, exit notifications) and wakes on the idle interval
//! and on the scheduler's next deadline. Every state mutation happens here;
//! the per-child reader tasks only forward bytes into the channel.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::child::send_signal;
use crate::engine::scheduler::{ChildId, Effect, Scheduler};
use crate::engine::Counters;
use crate::events::{ClusterEvent, EventBus};
use crate::task::Task;

/// Everything that can wake the runtime.
pub(crate) enum RuntimeEvent {
    Enqueue(Task),
    Pids(oneshot::Sender<Vec<u32>>),
    PendingCount(oneshot::Sender<usize>),
    End {
        gracefully: bool,
        ack: oneshot::Sender<()>,
    },
    Stdout { child: ChildId, chunk: String },
    Stderr { child: ChildId, chunk: String },
    Exited { child: ChildId, code: Option<i32> },
}

pub(crate) type ProcessFactory = Box<dyn FnMut() -> io::Result<Child> + Send>;

/// Runtime-side resources of one child: its stdin plus the detached pump
/// tasks. Dropping this closes stdin; the pumps end on pipe EOF.
struct ChildIo {
    pid: u32,
    stdin: ChildStdin,
    #[allow(dead_code)]
    pumps: Vec<JoinHandle<()>>,
}

pub(crate) struct Runtime {
    scheduler: Scheduler,
    factory: ProcessFactory,
    /// Weak so that the facade handles are the only strong senders: once
    /// the last one is dropped, `recv` yields `None` and the runtime stops.
    tx: mpsc::WeakUnboundedSender<RuntimeEvent>,
    io: HashMap<ChildId, ChildIo>,
    bus: Arc<Mutex<EventBus>>,
    counters: Arc<Counters>,
    ended: Arc<AtomicBool>,
    end_acks: Vec<oneshot::Sender<()>>,
}

impl Runtime {
    pub(crate) fn new(
        scheduler: Scheduler,
        factory: ProcessFactory,
        tx: mpsc::WeakUnboundedSender<RuntimeEvent>,
        bus: Arc<Mutex<EventBus>>,
        counters: Arc<Counters>,
        ended: Arc<AtomicBool>,
    ) -> Self {
        Self {
            scheduler,
            factory,
            tx,
            io: HashMap::new(),
            bus,
            counters,
            ended,
            end_acks: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RuntimeEvent>) {
        let interval_ms = self.scheduler.options().on_idle_interval_millis;
        let mut interval = if interval_ms > 0 {
            Some(tokio::time::interval(Duration::from_millis(interval_ms)))
        } else {
            None
        };

        info!("cluster runtime started");

        loop {
            let wake_at = self.scheduler.next_deadline();

            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => {
                        // Every facade handle is gone; nobody can observe
                        // results any more. Kill what's left and stop.
                        self.abandon();
                        break;
                    }
                },
                _ = idle_tick(&mut interval) => self.run_tick().await,
                _ = deadline_sleep(wake_at) => self.run_tick().await,
            }

            if self.scheduler.is_ended() && self.end_acks.is_empty() {
                break;
            }
        }

        // Answer anything that raced against shutdown so no caller hangs.
        rx.close();
        while let Ok(event) = rx.try_recv() {
            self.answer_late(event).await;
        }

        info!("cluster runtime exiting");
    }

    async fn handle(&mut self, event: RuntimeEvent) {
        let now = Instant::now();

        let mut effects = match event {
            RuntimeEvent::Enqueue(task) => self.scheduler.handle_enqueue(task, now),
            RuntimeEvent::Pids(reply) => {
                // Cull first so the answer reflects current liveness.
                let effects = self.scheduler.tick(now);
                self.apply(effects).await;
                let _ = reply.send(self.scheduler.pids());
                return;
            }
            RuntimeEvent::PendingCount(reply) => {
                let _ = reply.send(self.scheduler.pending_len());
                return;
            }
            RuntimeEvent::End { gracefully, ack } => {
                if self.scheduler.is_ended() {
                    let _ = ack.send(());
                    return;
                }
                self.end_acks.push(ack);
                self.scheduler.handle_end(gracefully, now)
            }
            RuntimeEvent::Stdout { child, chunk } => {
                self.scheduler.handle_stdout(child, &chunk, now)
            }
            RuntimeEvent::Stderr { child, chunk } => {
                self.scheduler.handle_stderr(child, &chunk, now)
            }
            RuntimeEvent::Exited { child, code } => self.scheduler.handle_exit(child, code, now),
        };

        effects.extend(self.scheduler.tick(now));
        self.apply(effects).await;
    }

    async fn run_tick(&mut self) {
        let effects = self.scheduler.tick(Instant::now());
        self.apply(effects).await;
    }

    /// Carry out a batch of scheduler effects. Spawning feeds results
    /// straight back into the scheduler, so the batch can grow while it is
    /// being worked off.
    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut work: VecDeque<Effect> = effects.into();

        while let Some(effect) = work.pop_front() {
            match effect {
                Effect::Spawn => {
                    let now = Instant::now();
                    match (self.factory)() {
                        Ok(child) => match self.register_child(child, now) {
                            Ok(more) => work.extend(more),
                            Err(message) => {
                                warn!(error = %message, "discarding unusable child");
                                work.extend(self.scheduler.handle_spawn_error(message, now));
                            }
                        },
                        Err(err) => {
                            work.extend(self.scheduler.handle_spawn_error(err.to_string(), now));
                        }
                    }
                }
                Effect::WriteStdin { child, data } => {
                    if let Some(io) = self.io.get_mut(&child) {
                        if let Err(err) = io.stdin.write_all(data.as_bytes()).await {
                            // Broken pipe; the exit notification follows.
                            debug!(child, error = %err, "stdin write failed");
                        }
                    }
                }
                Effect::Signal { child, pid, signal } => {
                    debug!(child, pid, ?signal, "signalling child");
                    send_signal(pid, signal);
                }
                Effect::Emit(event) => self.emit(&event),
                Effect::Drop { child } => {
                    // Closes stdin; pump tasks end on EOF by themselves.
                    self.io.remove(&child);
                }
                Effect::Ended => {
                    self.ended.store(true, Ordering::SeqCst);
                    for ack in self.end_acks.drain(..) {
                        let _ = ack.send(());
                    }
                }
            }
        }
    }

    /// Wire a freshly spawned child into the event stream.
    fn register_child(&mut self, mut child: Child, now: Instant) -> Result<Vec<Effect>, String> {
        let pid = child
            .id()
            .ok_or_else(|| "spawned child has no pid".to_string())?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| "child stdin is not piped".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "child stdout is not piped".to_string())?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| "child stderr is not piped".to_string())?;

        let (id, effects) = self.scheduler.handle_spawned(pid, now);

        let pumps = vec![
            pump_stream(stdout, id, self.tx.clone(), |child, chunk| {
                RuntimeEvent::Stdout { child, chunk }
            }),
            pump_stream(stderr, id, self.tx.clone(), |child, chunk| {
                RuntimeEvent::Stderr { child, chunk }
            }),
            watch_exit(child, id, self.tx.clone()),
        ];

        self.io.insert(id, ChildIo { pid, stdin, pumps });
        Ok(effects)
    }

    fn emit(&self, event: &ClusterEvent) {
        if matches!(event, ClusterEvent::InternalError { .. }) {
            self.counters.note_internal();
        }

        let bus = match self.bus.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for message in bus.emit(event) {
            self.counters.note_internal();
            // Forward the panic once; a handler that also panics on
            // InternalError is only counted.
            for _ in bus.emit(&ClusterEvent::InternalError { message }) {
                self.counters.note_internal();
            }
        }
    }

    /// The facade is gone: nothing can observe results, so don't linger.
    fn abandon(&mut self) {
        for io in self.io.values() {
            send_signal(io.pid, crate::engine::KillSignal::Kill);
        }
        self.io.clear();
    }

    /// Resolve events that arrived after the runtime decided to stop.
    async fn answer_late(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::Enqueue(task) => {
                let _ = task.resolve(Err(crate::errors::TaskError::ClusterEnded));
            }
            RuntimeEvent::Pids(reply) => {
                let _ = reply.send(Vec::new());
            }
            RuntimeEvent::PendingCount(reply) => {
                let _ = reply.send(0);
            }
            RuntimeEvent::End { ack, .. } => {
                let _ = ack.send(());
            }
            RuntimeEvent::Stdout { .. } | RuntimeEvent::Stderr { .. } | RuntimeEvent::Exited { .. } => {}
        }
    }
}

/// Forward raw pipe chunks into the runtime channel until EOF.
fn pump_stream<R>(
    mut stream: R,
    id: ChildId,
    tx: mpsc::WeakUnboundedSender<RuntimeEvent>,
    to_event: fn(ChildId, String) -> RuntimeEvent,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    let Some(tx) = tx.upgrade() else { break };
                    if tx.send(to_event(id, chunk)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Own the `Child` until its exit is observed, then report it.
fn watch_exit(
    mut child: Child,
    id: ChildId,
    tx: mpsc::WeakUnboundedSender<RuntimeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(err) => {
                debug!(child = id, error = %err, "wait failed");
                None
            }
        };
        if let Some(tx) = tx.upgrade() {
            let _ = tx.send(RuntimeEvent::Exited { child: id, code });
        }
    })
}

async fn idle_tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn deadline_sleep(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
