// src/errors.rs

//! Error types surfaced by the cluster.
//!
//! [`TaskError`] is the per-task taxonomy: every task future resolves with
//! either the parser's value or exactly one of these variants.
//! [`InvalidOptionsError`] is construction-time only.

use thiserror::Error;

/// Why a task future was rejected.
///
/// Variants are cheap to clone so they can ride along on cluster events as
/// well as task futures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task was enqueued after `end()`, or the cluster ended while the
    /// task was still pending.
    #[error("cluster has ended")]
    ClusterEnded,

    /// The process factory failed, or a fresh child never answered the
    /// version probe.
    #[error("child process failed to start: {0}")]
    SpawnFailed(String),

    /// The task deadline elapsed before a terminal line arrived. The child
    /// is killed and never reused.
    #[error("task timed out after {0}ms")]
    Timeout(u64),

    /// The child answered with the configured fail marker. Carries the
    /// captured stderr, or the stdout tail when stderr is empty.
    #[error("child reported failure: {0}")]
    FailMarker(String),

    /// The user-supplied parser rejected the accumulated output.
    #[error("parser rejected output: {0}")]
    ParserReject(String),

    /// The child wrote to stderr before the terminal line. The child stays
    /// in the pool; only the task is poisoned.
    #[error("child wrote to stderr: {0}")]
    StderrOutput(String),

    /// The child exited while the task was in flight. Retried once at the
    /// head of the queue before being surfaced.
    #[error("child process died mid-task")]
    ChildDied,

    /// The scheduler hit a condition it could not attribute to the task.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Construction-time options error.
///
/// Collects every violated rule; the rendered message starts with a fixed
/// first line followed by one violation per line, in option declaration
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.render())]
pub struct InvalidOptionsError {
    violations: Vec<String>,
}

impl InvalidOptionsError {
    pub fn new(violations: Vec<String>) -> Self {
        Self { violations }
    }

    /// The individual violated rules, in declaration order.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    fn render(&self) -> String {
        let mut out = String::from("BatchCluster was given invalid options");
        for v in &self.violations {
            out.push('\n');
            out.push_str(v);
        }
        out
    }
}
