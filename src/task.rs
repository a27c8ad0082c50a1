// src/task.rs

//! One request/response unit: a command line plus a single-shot completion.
//!
//! The typed parser is erased behind a boxed `FnOnce` so the scheduler can
//! hold tasks of different result types in one queue. The completion runs at
//! most once; until then the task can be re-queued (the ChildDied retry
//! path) without consuming it.

use std::fmt;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::errors::TaskError;

/// Output accumulated for one task: content lines up to (excluding) the
/// terminal marker, plus everything the child wrote to stderr meanwhile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput {
    pub stdout: String,
    pub stderr: String,
}

type Completion = Box<dyn FnOnce(Result<TaskOutput, TaskError>) -> Result<(), TaskError> + Send>;

/// A queued or in-flight task.
pub struct Task {
    command: String,
    deadline: Option<Instant>,
    retries: u32,
    complete: Option<Completion>,
}

impl Task {
    /// Build a task around a typed parser.
    ///
    /// Returns the type-erased task plus the receiver its future side
    /// resolves through. On a pass terminal the parser decides between the
    /// value and [`TaskError::ParserReject`]; every other outcome passes the
    /// scheduler's error straight through.
    pub fn new<T, P>(
        command: impl Into<String>,
        parser: P,
    ) -> (Self, oneshot::Receiver<Result<T, TaskError>>)
    where
        T: Send + 'static,
        P: FnOnce(&str, &str) -> Result<T, String> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let complete: Completion = Box::new(move |res| {
            let outcome = match res {
                Ok(out) => parser(&out.stdout, &out.stderr).map_err(TaskError::ParserReject),
                Err(err) => Err(err),
            };
            let report = outcome.as_ref().err().cloned();
            // The caller may have dropped its receiver; that is not an error.
            let _ = tx.send(outcome);
            match report {
                Some(err) => Err(err),
                None => Ok(()),
            }
        });

        (
            Self {
                command: command.into(),
                deadline: None,
                retries: 0,
                complete: Some(complete),
            },
            rx,
        )
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Absolute timeout, set when the task is assigned to a child.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Number of prior attempts.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub(crate) fn bump_retries(&mut self) {
        self.retries += 1;
    }

    /// Resolve the task exactly once.
    ///
    /// Returns the error the caller was given, if any, so the scheduler can
    /// mirror it onto the event bus (this is how `ParserReject` becomes
    /// observable without the scheduler running the parser itself).
    pub(crate) fn resolve(mut self, res: Result<TaskOutput, TaskError>) -> Result<(), TaskError> {
        match self.complete.take() {
            Some(complete) => complete(res),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("command", &self.command)
            .field("deadline", &self.deadline)
            .field("retries", &self.retries)
            .field("resolved", &self.complete.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pass_output_runs_the_parser() {
        let (task, rx) = Task::new("upcase hello", |stdout, _stderr| {
            Ok::<_, String>(stdout.to_uppercase())
        });

        let reported = task.resolve(Ok(TaskOutput {
            stdout: "hello".to_string(),
            stderr: String::new(),
        }));

        assert!(reported.is_ok());
        assert_eq!(rx.await.unwrap(), Ok("HELLO".to_string()));
    }

    #[tokio::test]
    async fn parser_rejection_is_reported_back() {
        let (task, rx) = Task::new("version", |_stdout, _stderr| {
            Err::<(), _>("not a version".to_string())
        });

        let reported = task.resolve(Ok(TaskOutput::default()));

        assert_eq!(
            reported,
            Err(TaskError::ParserReject("not a version".to_string()))
        );
        assert_eq!(
            rx.await.unwrap(),
            Err(TaskError::ParserReject("not a version".to_string()))
        );
    }

    #[tokio::test]
    async fn scheduler_errors_pass_straight_through() {
        let (task, rx) = Task::new("sleep 50", |_, _| Ok::<_, String>(()));

        let reported = task.resolve(Err(TaskError::Timeout(50)));

        assert_eq!(reported, Err(TaskError::Timeout(50)));
        assert_eq!(rx.await.unwrap(), Err(TaskError::Timeout(50)));
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (task, rx) = Task::new("version", |_, _| Ok::<_, String>(()));
        drop(rx);
        assert!(task.resolve(Ok(TaskOutput::default())).is_ok());
    }
}
