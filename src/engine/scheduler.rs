// src/engine/scheduler.rs

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::child::framing::LineDelimiter;
use crate::config::ClusterOptions;
use crate::engine::queue::PendingQueue;
use crate::engine::Counters;
use crate::errors::TaskError;
use crate::events::ClusterEvent;
use crate::task::{Task, TaskOutput};

/// Monotonic internal child identifier.
///
/// Map keys are ids, not PIDs: ids are never reused, and because they only
/// grow, `BTreeMap` iteration order is insertion order, which is what makes
/// idle-child selection stable.
pub type ChildId = u32;

/// Signal the runtime should deliver to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// SIGTERM, the polite escalation after the exit command was ignored.
    Term,
    /// SIGKILL.
    Kill,
}

/// I/O the scheduler wants performed.
///
/// The scheduler itself never touches a process; every transition returns a
/// batch of effects for the runtime (or a test) to carry out. State is
/// already updated by the time an effect is emitted.
#[derive(Debug)]
pub enum Effect {
    /// Invoke the process factory; report back via `handle_spawned` /
    /// `handle_spawn_error`.
    Spawn,
    /// Write raw bytes to a child's stdin.
    WriteStdin { child: ChildId, data: String },
    /// Deliver a signal to a child.
    Signal {
        child: ChildId,
        pid: u32,
        signal: KillSignal,
    },
    /// Publish an event on the cluster bus.
    Emit(ClusterEvent),
    /// Release the runtime-side resources of a removed child.
    Drop { child: ChildId },
    /// The cluster is fully drained; `end()` waiters can be released.
    Ended,
}

/// Where a child is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// Spawned, version probe in flight.
    Starting,
    /// Ready for a task.
    Idle,
    /// Task in flight (`current` is `Some` exactly in this state).
    Busy,
    /// Exit requested or signalled; waiting for the OS exit to be observed.
    /// The `dead` state has no representation: observing the exit removes
    /// the slot.
    Ending,
}

/// Terminal marker observed on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Pass,
    Fail,
}

struct ChildState {
    pid: u32,
    lifecycle: Lifecycle,
    started_at: Instant,
    task_count: u32,
    current: Option<Task>,
    stdout: LineDelimiter,
    /// Content lines of the current task (terminal line excluded).
    content: Vec<String>,
    /// Raw stderr accumulated since the current task was assigned.
    stderr: String,
    /// Version-probe deadline (`Starting` only).
    spawn_deadline: Option<Instant>,
    /// Terminal marker seen; resolution held back until this instant so
    /// in-flight stderr can drain.
    settle: Option<(Marker, Instant)>,
    /// Exit observed while the task had no terminal line yet; the child is
    /// kept around until this instant in case buffered stdout completes it.
    flush_deadline: Option<Instant>,
    exited: bool,
    /// After this instant an `Ending` (or end-phase busy) child gets SIGTERM.
    graceful_deadline: Option<Instant>,
    /// After this instant it gets SIGKILL.
    term_deadline: Option<Instant>,
}

impl ChildState {
    fn new(pid: u32, newline: crate::config::Newline, now: Instant, spawn_timeout: Duration) -> Self {
        Self {
            pid,
            lifecycle: Lifecycle::Starting,
            started_at: now,
            task_count: 0,
            current: None,
            stdout: LineDelimiter::new(newline),
            content: Vec::new(),
            stderr: String::new(),
            spawn_deadline: Some(now + spawn_timeout),
            settle: None,
            flush_deadline: None,
            exited: false,
            graceful_deadline: None,
            term_deadline: None,
        }
    }

    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Ending,
    Ended,
}

/// The pool state machine.
///
/// Owns the pending queue and every child slot. All methods are synchronous
/// and must be called from one logical runner; they return the effects the
/// caller has to apply. Timers are absolute deadlines inspected by
/// [`Scheduler::tick`], never callbacks.
pub struct Scheduler {
    opts: ClusterOptions,
    counters: Arc<Counters>,
    children: BTreeMap<ChildId, ChildState>,
    queue: PendingQueue,
    next_child_id: ChildId,
    phase: Phase,
    /// Spawn/startup failure timestamps inside the sliding breaker window.
    spawn_failures: VecDeque<Instant>,
}

impl Scheduler {
    pub fn new(opts: ClusterOptions, counters: Arc<Counters>) -> Self {
        Self {
            opts,
            counters,
            children: BTreeMap::new(),
            queue: PendingQueue::new(),
            next_child_id: 0,
            phase: Phase::Running,
            spawn_failures: VecDeque::new(),
        }
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.opts
    }

    /// Live child PIDs, in slot order.
    pub fn pids(&self) -> Vec<u32> {
        self.children.values().map(|c| c.pid).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_ended(&self) -> bool {
        self.phase == Phase::Ended
    }

    /// The earliest instant at which some deadline fires, for the runtime's
    /// wake-up sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut next: Option<Instant> = None;
        let mut consider = |d: Option<Instant>| {
            if let Some(d) = d {
                next = Some(match next {
                    Some(n) => n.min(d),
                    None => d,
                });
            }
        };

        for child in self.children.values() {
            consider(child.spawn_deadline);
            consider(child.settle.map(|(_, at)| at));
            consider(child.flush_deadline);
            consider(child.graceful_deadline);
            consider(child.term_deadline);
            if child.settle.is_none() && !child.exited {
                consider(child.current.as_ref().and_then(|t| t.deadline()));
            }
            if child.lifecycle == Lifecycle::Idle {
                consider(Some(child.started_at + self.opts.max_proc_age()));
            }
        }

        next
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    /// A task arrived from the facade.
    pub fn handle_enqueue(&mut self, task: Task, _now: Instant) -> Vec<Effect> {
        if self.phase != Phase::Running {
            return self.reject_task(task, TaskError::ClusterEnded);
        }
        self.queue.push_back(task);
        Vec::new()
    }

    /// The factory produced a child.
    pub fn handle_spawned(&mut self, pid: u32, now: Instant) -> (ChildId, Vec<Effect>) {
        let id = self.next_child_id;
        self.next_child_id += 1;

        let mut child = ChildState::new(pid, self.opts.newline, now, self.opts.spawn_timeout());
        self.counters.note_spawn();
        debug!(child = id, pid, "child spawned; sending version probe");

        let mut effects = Vec::new();
        if self.phase == Phase::Running {
            effects.push(Effect::WriteStdin {
                child: id,
                data: format!("{}{}", self.opts.version_command, self.opts.newline.as_str()),
            });
        } else {
            // The cluster started ending while this spawn was in flight.
            child.lifecycle = Lifecycle::Ending;
            child.spawn_deadline = None;
            effects.push(Effect::Signal {
                child: id,
                pid,
                signal: KillSignal::Kill,
            });
        }

        self.children.insert(id, child);
        (id, effects)
    }

    /// The factory failed outright.
    pub fn handle_spawn_error(&mut self, message: String, now: Instant) -> Vec<Effect> {
        let mut effects = vec![Effect::Emit(ClusterEvent::StartError {
            error: TaskError::SpawnFailed(message),
        })];
        effects.extend(self.note_start_failure(now));
        effects
    }

    /// A chunk of child stdout arrived.
    pub fn handle_stdout(&mut self, id: ChildId, chunk: &str, now: Instant) -> Vec<Effect> {
        let Some(child) = self.children.get_mut(&id) else {
            debug!(child = id, "stdout for removed child; ignoring");
            return Vec::new();
        };

        let lines = child.stdout.push(chunk);
        let mut effects = Vec::new();
        for line in lines {
            // A terminal line may have removed the slot mid-batch.
            if !self.children.contains_key(&id) {
                break;
            }
            effects.extend(self.stdout_line(id, &line, now));
        }
        effects
    }

    /// A chunk of child stderr arrived.
    pub fn handle_stderr(&mut self, id: ChildId, chunk: &str, _now: Instant) -> Vec<Effect> {
        if let Some(child) = self.children.get_mut(&id) {
            child.stderr.push_str(chunk);
        }
        Vec::new()
    }

    /// The child's OS exit was observed.
    pub fn handle_exit(&mut self, id: ChildId, code: Option<i32>, now: Instant) -> Vec<Effect> {
        let Some(child) = self.children.get_mut(&id) else {
            return Vec::new();
        };
        child.exited = true;

        let mut effects = Vec::new();
        match child.lifecycle {
            Lifecycle::Starting => {
                warn!(child = id, pid = child.pid, ?code, "child exited during start");
                effects.push(Effect::Emit(ClusterEvent::StartError {
                    error: TaskError::SpawnFailed("exited during start".to_string()),
                }));
                effects.extend(self.remove_child(id));
                effects.extend(self.note_start_failure(now));
            }
            Lifecycle::Busy => {
                if self.children[&id].settle.is_some() {
                    // Terminal already seen; settle with what we have.
                    effects.extend(self.finalize_settled(id, now));
                    effects.extend(self.remove_child(id));
                } else if self.phase == Phase::Running && self.opts.stream_flush_millis > 0 {
                    // Give already-written stdout a moment to drain before
                    // declaring the task dead.
                    let child = self.children.get_mut(&id).expect("checked above");
                    child.flush_deadline = Some(now + self.opts.stream_flush());
                    debug!(child = id, pid = child.pid, "exit during task; flushing streams");
                } else {
                    effects.extend(self.fail_current_child_died(id));
                    effects.extend(self.remove_child(id));
                }
            }
            Lifecycle::Idle => {
                debug!(child = id, pid = child.pid, ?code, "idle child exited");
                effects.extend(self.remove_child(id));
            }
            Lifecycle::Ending => {
                effects.extend(self.remove_child(id));
            }
        }

        effects.extend(self.maybe_finish_end());
        effects
    }

    /// Begin cluster shutdown. Idempotent at this level: a second call is a
    /// no-op (the runtime tracks the waiters).
    pub fn handle_end(&mut self, gracefully: bool, now: Instant) -> Vec<Effect> {
        if self.phase != Phase::Running {
            return Vec::new();
        }
        self.phase = Phase::Ending;

        let mut effects = vec![Effect::Emit(ClusterEvent::BeforeEnd)];

        for task in self.queue.drain() {
            effects.extend(self.reject_task(task, TaskError::ClusterEnded));
        }

        let ids: Vec<ChildId> = self.children.keys().copied().collect();
        for id in ids {
            let child = self.children.get_mut(&id).expect("id just listed");
            if !gracefully {
                if child.settle.is_some() {
                    effects.extend(self.finalize_settled(id, now));
                    let child = self.children.get_mut(&id).expect("still present");
                    child.lifecycle = Lifecycle::Ending;
                    child.graceful_deadline = None;
                    child.term_deadline = None;
                    effects.push(Effect::Signal {
                        child: id,
                        pid: child.pid,
                        signal: KillSignal::Kill,
                    });
                } else {
                    child.lifecycle = Lifecycle::Ending;
                    child.spawn_deadline = None;
                    child.graceful_deadline = None;
                    child.term_deadline = None;
                    let pid = child.pid;
                    if let Some(task) = child.current.take() {
                        effects.extend(self.reject_task(task, TaskError::ClusterEnded));
                    }
                    effects.push(Effect::Signal {
                        child: id,
                        pid,
                        signal: KillSignal::Kill,
                    });
                }
                continue;
            }

            match child.lifecycle {
                Lifecycle::Starting | Lifecycle::Idle => {
                    effects.extend(self.retire_child(id, now));
                }
                Lifecycle::Busy => {
                    // Let the in-flight task finish inside the grace window.
                    child.graceful_deadline = Some(now + self.opts.end_graceful_wait());
                }
                Lifecycle::Ending => {}
            }
        }

        effects.extend(self.maybe_finish_end());
        effects
    }

    // ------------------------------------------------------------------
    // The tick: reap is implicit (slots drop on observed exit), then
    // age out, time out, spawn, assign, in that order.
    // ------------------------------------------------------------------

    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        // Settle tasks whose terminal line arrived a stream-flush ago.
        let settled: Vec<ChildId> = self
            .children
            .iter()
            .filter(|(_, c)| matches!(c.settle, Some((_, at)) if now >= at))
            .map(|(id, _)| *id)
            .collect();
        for id in settled {
            effects.extend(self.finalize_settled(id, now));
        }

        // Flush-expired children died mid-task for good.
        let flushed: Vec<ChildId> = self
            .children
            .iter()
            .filter(|(_, c)| matches!(c.flush_deadline, Some(at) if now >= at))
            .map(|(id, _)| *id)
            .collect();
        for id in flushed {
            effects.extend(self.fail_current_child_died(id));
            effects.extend(self.remove_child(id));
        }

        // Age out idle children.
        if self.phase == Phase::Running {
            let aged: Vec<ChildId> = self
                .children
                .iter()
                .filter(|(_, c)| {
                    c.lifecycle == Lifecycle::Idle
                        && (c.task_count >= self.opts.max_tasks_per_process
                            || c.age(now) >= self.opts.max_proc_age())
                })
                .map(|(id, _)| *id)
                .collect();
            for id in aged {
                debug!(child = id, "retiring child (age or task count)");
                effects.extend(self.retire_child(id, now));
            }
        }

        // Time out overdue tasks.
        let overdue: Vec<ChildId> = self
            .children
            .iter()
            .filter(|(_, c)| {
                c.lifecycle == Lifecycle::Busy
                    && c.settle.is_none()
                    && !c.exited
                    && matches!(
                        c.current.as_ref().and_then(|t| t.deadline()),
                        Some(d) if now >= d
                    )
            })
            .map(|(id, _)| *id)
            .collect();
        for id in overdue {
            effects.extend(self.time_out_task(id));
        }

        // Spawn timeouts.
        let stalled: Vec<ChildId> = self
            .children
            .iter()
            .filter(|(_, c)| {
                c.lifecycle == Lifecycle::Starting
                    && matches!(c.spawn_deadline, Some(d) if now >= d)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in stalled {
            effects.extend(self.time_out_spawn(id, now));
        }

        // Escalate children that ignored the exit command (and, during
        // cluster shutdown, busy children that outstayed the grace window).
        let escalate: Vec<ChildId> = self
            .children
            .iter()
            .filter(|(_, c)| {
                matches!(c.graceful_deadline, Some(d) if now >= d)
                    || matches!(c.term_deadline, Some(d) if now >= d)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in escalate {
            let grace = self.opts.end_graceful_wait();
            let child = self.children.get_mut(&id).expect("id just listed");
            if matches!(child.graceful_deadline, Some(d) if now >= d) {
                child.graceful_deadline = None;
                child.term_deadline = Some(now + grace);
                warn!(child = id, pid = child.pid, "exit grace elapsed; sending SIGTERM");
                effects.push(Effect::Signal {
                    child: id,
                    pid: child.pid,
                    signal: KillSignal::Term,
                });
            } else if matches!(child.term_deadline, Some(d) if now >= d) {
                child.term_deadline = None;
                warn!(child = id, pid = child.pid, "SIGTERM ignored; sending SIGKILL");
                effects.push(Effect::Signal {
                    child: id,
                    pid: child.pid,
                    signal: KillSignal::Kill,
                });
            }
        }

        // Spawn for unmet demand.
        if self.phase == Phase::Running {
            let available = self
                .children
                .values()
                .filter(|c| matches!(c.lifecycle, Lifecycle::Idle | Lifecycle::Starting))
                .count();
            let need = self.queue.len().saturating_sub(available);
            let capacity = self.opts.max_procs.saturating_sub(self.children.len());
            for _ in 0..need.min(capacity) {
                effects.push(Effect::Spawn);
            }
        }

        // Assign head-of-queue tasks to idle children, in slot order.
        if self.phase == Phase::Running {
            let idle: Vec<ChildId> = self
                .children
                .iter()
                .filter(|(_, c)| c.lifecycle == Lifecycle::Idle)
                .map(|(id, _)| *id)
                .collect();
            for id in idle {
                if self.queue.is_empty() {
                    break;
                }
                let mut task = self.queue.pop_front().expect("non-empty");
                task.set_deadline(Some(now + self.opts.task_timeout()));
                let child = self.children.get_mut(&id).expect("id just listed");
                child.content.clear();
                child.stderr.clear();
                if !child.stdout.partial().is_empty() {
                    debug!(child = id, "discarding unterminated stdout from previous task");
                    child.stdout.clear();
                }
                debug!(child = id, pid = child.pid, command = %task.command(), "task assigned");
                effects.push(Effect::WriteStdin {
                    child: id,
                    data: format!("{}{}", task.command(), self.opts.newline.as_str()),
                });
                child.current = Some(task);
                child.lifecycle = Lifecycle::Busy;
            }
        }

        effects.extend(self.maybe_finish_end());
        effects
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn stdout_line(&mut self, id: ChildId, line: &str, now: Instant) -> Vec<Effect> {
        let trimmed = line.trim();
        let marker = if trimmed == self.opts.pass {
            Some(Marker::Pass)
        } else if trimmed == self.opts.fail {
            Some(Marker::Fail)
        } else {
            None
        };

        let child = self.children.get_mut(&id).expect("caller checked presence");
        match child.lifecycle {
            Lifecycle::Starting => match marker {
                Some(Marker::Pass) => {
                    child.lifecycle = Lifecycle::Idle;
                    child.spawn_deadline = None;
                    child.content.clear();
                    child.stderr.clear();
                    debug!(child = id, pid = child.pid, "child ready");
                    vec![Effect::Emit(ClusterEvent::ChildStart { pid: child.pid })]
                }
                _ => {
                    // Anything else during startup is probe chatter; the
                    // spawn deadline deals with children that never pass.
                    child.content.push(line.to_string());
                    Vec::new()
                }
            },
            Lifecycle::Busy => {
                if child.flush_deadline.is_some() {
                    // The process already exited; drain what it had written.
                    match marker {
                        Some(m) => {
                            // Late terminal from a dying child: the task
                            // still completes.
                            child.flush_deadline = None;
                            child.settle = Some((m, now));
                            let mut effects = self.finalize_settled(id, now);
                            effects.extend(self.remove_child(id));
                            effects
                        }
                        None => {
                            child.content.push(line.to_string());
                            Vec::new()
                        }
                    }
                } else if child.settle.is_some() {
                    debug!(child = id, "stdout after terminal line; ignoring");
                    Vec::new()
                } else {
                    match marker {
                        Some(m) => {
                            if self.opts.stream_flush_millis == 0 {
                                child.settle = Some((m, now));
                                self.finalize_settled(id, now)
                            } else {
                                child.settle = Some((m, now + self.opts.stream_flush()));
                                Vec::new()
                            }
                        }
                        None => {
                            child.content.push(line.to_string());
                            Vec::new()
                        }
                    }
                }
            }
            Lifecycle::Idle => {
                if trimmed.is_empty() {
                    Vec::new()
                } else {
                    warn!(child = id, pid = child.pid, line = %line, "unexpected output from idle child");
                    vec![Effect::Emit(ClusterEvent::InternalError {
                        message: format!("unexpected output from idle child {}: {line}", child.pid),
                    })]
                }
            }
            Lifecycle::Ending => {
                debug!(child = id, line = %line, "output from ending child; ignoring");
                Vec::new()
            }
        }
    }

    /// The terminal line has settled: run the task's completion and return
    /// the child to the pool (or retire it if the cluster is ending).
    fn finalize_settled(&mut self, id: ChildId, now: Instant) -> Vec<Effect> {
        let child = self.children.get_mut(&id).expect("caller checked presence");
        let Some((marker, _)) = child.settle.take() else {
            return Vec::new();
        };
        let Some(task) = child.current.take() else {
            warn!(child = id, "terminal line with no task in flight");
            return vec![Effect::Emit(ClusterEvent::InternalError {
                message: format!("terminal line with no task in flight on child {}", child.pid),
            })];
        };

        child.task_count += 1;
        self.counters.note_completed();

        let pid = child.pid;
        let stdout = child.content.join(self.opts.newline.as_str());
        let stderr = std::mem::take(&mut child.stderr);
        child.content.clear();
        if child.lifecycle == Lifecycle::Busy {
            child.lifecycle = Lifecycle::Idle;
        }

        let mut effects = Vec::new();
        if !stderr.trim().is_empty() {
            // Stderr poisons the task, not the child, whichever marker came.
            effects.extend(self.reject_task(task, TaskError::StderrOutput(stderr.trim().to_string())));
        } else {
            match marker {
                Marker::Pass => match task.resolve(Ok(TaskOutput {
                    stdout: stdout.clone(),
                    stderr,
                })) {
                    Ok(()) => effects.push(Effect::Emit(ClusterEvent::TaskData { pid, data: stdout })),
                    Err(error) => effects.push(Effect::Emit(ClusterEvent::TaskError { error })),
                },
                Marker::Fail => {
                    let tail = stdout
                        .lines()
                        .last()
                        .filter(|l| !l.trim().is_empty())
                        .unwrap_or(self.opts.fail.as_str())
                        .to_string();
                    effects.extend(self.reject_task(task, TaskError::FailMarker(tail)));
                }
            }
        }

        // During shutdown a freed child goes straight to its exit command.
        let child = self.children.get(&id).expect("still present");
        if self.phase != Phase::Running && child.lifecycle == Lifecycle::Idle {
            effects.extend(self.retire_child(id, now));
        }

        effects
    }

    fn time_out_task(&mut self, id: ChildId) -> Vec<Effect> {
        let child = self.children.get_mut(&id).expect("caller checked presence");
        let Some(task) = child.current.take() else {
            return Vec::new();
        };
        warn!(child = id, pid = child.pid, command = %task.command(), "task timed out; killing child");

        child.lifecycle = Lifecycle::Ending;
        child.graceful_deadline = None;
        child.term_deadline = None;
        let pid = child.pid;

        let mut effects = self.reject_task(task, TaskError::Timeout(self.opts.task_timeout_millis));
        effects.push(Effect::Signal {
            child: id,
            pid,
            signal: KillSignal::Kill,
        });
        effects
    }

    fn time_out_spawn(&mut self, id: ChildId, now: Instant) -> Vec<Effect> {
        let child = self.children.get_mut(&id).expect("caller checked presence");
        warn!(child = id, pid = child.pid, "version probe timed out; killing child");
        child.lifecycle = Lifecycle::Ending;
        child.spawn_deadline = None;
        let pid = child.pid;

        let mut effects = vec![
            Effect::Emit(ClusterEvent::StartError {
                error: TaskError::SpawnFailed(format!(
                    "no response to version probe within {}ms",
                    self.opts.spawn_timeout_millis
                )),
            }),
            Effect::Signal {
                child: id,
                pid,
                signal: KillSignal::Kill,
            },
        ];
        effects.extend(self.note_start_failure(now));
        effects
    }

    /// Ask an idle (or starting) child to exit, arming the grace escalation.
    fn retire_child(&mut self, id: ChildId, now: Instant) -> Vec<Effect> {
        let child = self.children.get_mut(&id).expect("caller checked presence");
        child.lifecycle = Lifecycle::Ending;
        child.spawn_deadline = None;
        child.graceful_deadline = Some(now + self.opts.end_graceful_wait());
        vec![Effect::WriteStdin {
            child: id,
            data: format!("{}{}", self.opts.exit_command, self.opts.newline.as_str()),
        }]
    }

    /// Resolve the current task for a child that died mid-flight: one retry
    /// at the queue head, then surface `ChildDied`.
    fn fail_current_child_died(&mut self, id: ChildId) -> Vec<Effect> {
        let child = self.children.get_mut(&id).expect("caller checked presence");
        child.flush_deadline = None;
        let Some(mut task) = child.current.take() else {
            return Vec::new();
        };
        child.lifecycle = Lifecycle::Ending;

        if self.phase == Phase::Running && task.retries() == 0 {
            debug!(command = %task.command(), "child died mid-task; retrying once");
            task.bump_retries();
            task.set_deadline(None);
            self.queue.push_front(task);
            Vec::new()
        } else {
            self.reject_task(task, TaskError::ChildDied)
        }
    }

    /// Drop a slot whose exit has been observed.
    fn remove_child(&mut self, id: ChildId) -> Vec<Effect> {
        let Some(child) = self.children.remove(&id) else {
            return Vec::new();
        };
        debug!(child = id, pid = child.pid, tasks = child.task_count, "child removed from pool");
        vec![
            Effect::Emit(ClusterEvent::ChildExit { pid: child.pid }),
            Effect::Drop { child: id },
        ]
    }

    fn reject_task(&mut self, task: Task, error: TaskError) -> Vec<Effect> {
        let _ = task.resolve(Err(error.clone()));
        vec![Effect::Emit(ClusterEvent::TaskError { error })]
    }

    /// Record a spawn/startup failure and trip the breaker when the window
    /// overflows.
    fn note_start_failure(&mut self, now: Instant) -> Vec<Effect> {
        self.spawn_failures.push_back(now);
        let window = Duration::from_secs(60);
        while let Some(&front) = self.spawn_failures.front() {
            if now.saturating_duration_since(front) >= window {
                self.spawn_failures.pop_front();
            } else {
                break;
            }
        }

        let failures = self.spawn_failures.len() as u32;
        if self.phase == Phase::Running
            && failures > self.opts.max_reasonable_process_failures_per_minute
        {
            warn!(failures, "too many process failures; ending cluster");
            let mut effects = vec![Effect::Emit(ClusterEvent::EndError {
                error: TaskError::SpawnFailed(format!(
                    "{failures} process failures in the last minute"
                )),
            })];
            effects.extend(self.handle_end(true, now));
            return effects;
        }
        Vec::new()
    }

    fn maybe_finish_end(&mut self) -> Vec<Effect> {
        if self.phase == Phase::Ending && self.children.is_empty() && self.queue.is_empty() {
            self.phase = Phase::Ended;
            debug!("cluster fully drained");
            return vec![Effect::Emit(ClusterEvent::End), Effect::Ended];
        }
        Vec::new()
    }
}
