use std::sync::Arc;
use std::time::{Duration, Instant};

use batchpool::{
    ClusterEvent, ClusterOptions, Counters, Effect, Scheduler, Task, TaskError,
};
use tokio::sync::oneshot;

type TaskRx = oneshot::Receiver<Result<String, TaskError>>;

fn opts() -> ClusterOptions {
    ClusterOptions {
        stream_flush_millis: 0,
        ..ClusterOptions::default()
    }
}

fn scheduler(opts: ClusterOptions) -> Scheduler {
    Scheduler::new(opts, Arc::new(Counters::default()))
}

fn echo_task(command: &str) -> (Task, TaskRx) {
    Task::new(command, |stdout: &str, _stderr: &str| {
        Ok::<_, String>(stdout.to_string())
    })
}

fn stdin_writes(effects: &[Effect]) -> Vec<(u32, String)> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::WriteStdin { child, data } => Some((*child, data.clone())),
            _ => None,
        })
        .collect()
}

fn spawn_count(effects: &[Effect]) -> usize {
    effects.iter().filter(|e| matches!(e, Effect::Spawn)).count()
}

/// Walk a fresh child through spawn + version probe until it is idle.
fn start_child(s: &mut Scheduler, pid: u32, now: Instant) -> u32 {
    let (id, fx) = s.handle_spawned(pid, now);
    assert_eq!(stdin_writes(&fx), vec![(id, "version\n".to_string())]);

    let fx = s.handle_stdout(id, "v1.2.3\nPASS\n", now);
    assert!(
        fx.iter()
            .any(|e| matches!(e, Effect::Emit(ClusterEvent::ChildStart { pid: p }) if *p == pid)),
        "expected childStart for pid {pid}"
    );
    id
}

#[test]
fn spawns_probes_and_completes_a_task() {
    let counters = Arc::new(Counters::default());
    let mut s = Scheduler::new(opts(), Arc::clone(&counters));
    let now = Instant::now();

    let (task, mut rx) = echo_task("upcase hello");
    assert!(s.handle_enqueue(task, now).is_empty());

    let fx = s.tick(now);
    assert_eq!(spawn_count(&fx), 1);

    let id = start_child(&mut s, 4242, now);
    assert_eq!(s.pids(), vec![4242]);

    let fx = s.tick(now);
    assert_eq!(stdin_writes(&fx), vec![(id, "upcase hello\n".to_string())]);

    let fx = s.handle_stdout(id, "HELLO\nPASS\n", now);
    assert!(fx
        .iter()
        .any(|e| matches!(e, Effect::Emit(ClusterEvent::TaskData { data, .. }) if data == "HELLO")));
    assert_eq!(rx.try_recv().unwrap(), Ok("HELLO".to_string()));

    assert_eq!(counters.spawned_procs(), 1);
    assert_eq!(counters.completed_tasks(), 1);
    assert_eq!(counters.mean_tasks_per_proc(), 1.0);
}

#[test]
fn tasks_are_fifo_and_children_are_picked_in_insertion_order() {
    let mut s = scheduler(ClusterOptions {
        max_procs: 2,
        ..opts()
    });
    let now = Instant::now();

    let (t1, mut rx1) = echo_task("upcase a");
    let (t2, mut rx2) = echo_task("upcase b");
    let (t3, mut rx3) = echo_task("upcase c");
    s.handle_enqueue(t1, now);
    s.handle_enqueue(t2, now);
    s.handle_enqueue(t3, now);

    let fx = s.tick(now);
    assert_eq!(spawn_count(&fx), 2, "demand capped by maxProcs");

    let first = start_child(&mut s, 100, now);
    let second = start_child(&mut s, 200, now);

    let fx = s.tick(now);
    assert_eq!(
        stdin_writes(&fx),
        vec![
            (first, "upcase a\n".to_string()),
            (second, "upcase b\n".to_string()),
        ],
        "head of queue goes to the earliest idle child"
    );

    // Whichever child frees up first takes the next task.
    s.handle_stdout(second, "B\nPASS\n", now);
    assert_eq!(rx2.try_recv().unwrap(), Ok("B".to_string()));

    let fx = s.tick(now);
    assert_eq!(stdin_writes(&fx), vec![(second, "upcase c\n".to_string())]);

    s.handle_stdout(first, "A\nPASS\n", now);
    s.handle_stdout(second, "C\nPASS\n", now);
    assert_eq!(rx1.try_recv().unwrap(), Ok("A".to_string()));
    assert_eq!(rx3.try_recv().unwrap(), Ok("C".to_string()));
}

#[test]
fn child_is_retired_after_max_tasks_per_process() {
    let mut s = scheduler(ClusterOptions {
        max_tasks_per_process: 1,
        ..opts()
    });
    let now = Instant::now();

    let (task, mut rx) = echo_task("upcase one");
    s.handle_enqueue(task, now);
    s.tick(now);
    let id = start_child(&mut s, 100, now);
    s.tick(now);
    s.handle_stdout(id, "ONE\nPASS\n", now);
    assert_eq!(rx.try_recv().unwrap(), Ok("ONE".to_string()));

    // Next tick retires the child instead of keeping it idle.
    let fx = s.tick(now);
    assert_eq!(stdin_writes(&fx), vec![(id, "exit\n".to_string())]);
    assert_eq!(s.pids(), vec![100], "still live until the exit is observed");

    let fx = s.handle_exit(id, Some(0), now);
    assert!(fx
        .iter()
        .any(|e| matches!(e, Effect::Emit(ClusterEvent::ChildExit { pid: 100 }))));
    assert!(s.pids().is_empty());

    // New demand spawns a replacement.
    let (task, _rx) = echo_task("upcase two");
    s.handle_enqueue(task, now);
    assert_eq!(spawn_count(&s.tick(now)), 1);
}

#[test]
fn idle_child_ages_out() {
    let mut s = scheduler(ClusterOptions {
        max_proc_age_millis: 15_000,
        ..opts()
    });
    let now = Instant::now();

    let (task, _rx) = echo_task("upcase x");
    s.handle_enqueue(task, now);
    s.tick(now);
    let id = start_child(&mut s, 100, now);
    s.tick(now);
    s.handle_stdout(id, "X\nPASS\n", now);

    // Young enough: nothing happens.
    assert!(stdin_writes(&s.tick(now + Duration::from_millis(14_999))).is_empty());

    let fx = s.tick(now + Duration::from_millis(15_000));
    assert_eq!(stdin_writes(&fx), vec![(id, "exit\n".to_string())]);
}

#[test]
fn fail_marker_rejects_the_task_but_keeps_the_child() {
    let mut s = scheduler(opts());
    let now = Instant::now();

    let (bad, mut bad_rx) = echo_task("invalid input");
    let (good, mut good_rx) = echo_task("upcase ok");
    s.handle_enqueue(bad, now);
    s.handle_enqueue(good, now);
    s.tick(now);
    let id = start_child(&mut s, 100, now);
    s.tick(now);

    let fx = s.handle_stdout(id, "FAIL\n", now);
    assert!(fx
        .iter()
        .any(|e| matches!(e, Effect::Emit(ClusterEvent::TaskError { error: TaskError::FailMarker(_) }))));
    assert!(matches!(
        bad_rx.try_recv().unwrap(),
        Err(TaskError::FailMarker(_))
    ));

    // Same child picks up the next task.
    let fx = s.tick(now);
    assert_eq!(stdin_writes(&fx), vec![(id, "upcase ok\n".to_string())]);
    s.handle_stdout(id, "OK\nPASS\n", now);
    assert_eq!(good_rx.try_recv().unwrap(), Ok("OK".to_string()));
}

#[test]
fn stderr_poisons_the_task_even_on_pass() {
    let mut s = scheduler(opts());
    let now = Instant::now();

    let (noisy, mut noisy_rx) = echo_task("stderr oops");
    let (clean, mut clean_rx) = echo_task("upcase ok");
    s.handle_enqueue(noisy, now);
    s.handle_enqueue(clean, now);
    s.tick(now);
    let id = start_child(&mut s, 100, now);
    s.tick(now);

    s.handle_stderr(id, "oops\n", now);
    s.handle_stdout(id, "PASS\n", now);
    assert_eq!(
        noisy_rx.try_recv().unwrap(),
        Err(TaskError::StderrOutput("oops".to_string()))
    );

    // The child itself is healthy and reused; the fresh task is unaffected
    // by the earlier stderr.
    let fx = s.tick(now);
    assert_eq!(stdin_writes(&fx), vec![(id, "upcase ok\n".to_string())]);
    s.handle_stdout(id, "OK\nPASS\n", now);
    assert_eq!(clean_rx.try_recv().unwrap(), Ok("OK".to_string()));
}

#[test]
fn parser_rejection_reaches_caller_and_bus() {
    let mut s = scheduler(opts());
    let now = Instant::now();

    let (task, mut rx) = Task::new("version", |_stdout: &str, _stderr: &str| {
        Err::<String, _>("unparseable".to_string())
    });
    s.handle_enqueue(task, now);
    s.tick(now);
    let id = start_child(&mut s, 100, now);
    s.tick(now);

    let fx = s.handle_stdout(id, "v9.9.9\nPASS\n", now);
    assert!(fx.iter().any(|e| matches!(
        e,
        Effect::Emit(ClusterEvent::TaskError { error: TaskError::ParserReject(msg) }) if msg == "unparseable"
    )));
    assert_eq!(
        rx.try_recv().unwrap(),
        Err(TaskError::ParserReject("unparseable".to_string()))
    );
}

#[test]
fn terminal_marker_requires_a_complete_line() {
    let mut s = scheduler(opts());
    let now = Instant::now();

    let (task, mut rx) = echo_task("upcase chunky");
    s.handle_enqueue(task, now);
    s.tick(now);
    let id = start_child(&mut s, 100, now);
    s.tick(now);

    // "PASS" without a newline is not terminal yet.
    s.handle_stdout(id, "CHUNKY\nPA", now);
    assert!(rx.try_recv().is_err(), "task must still be pending");

    s.handle_stdout(id, "SS\n", now);
    assert_eq!(rx.try_recv().unwrap(), Ok("CHUNKY".to_string()));
}
