// src/engine/queue.rs

use std::collections::VecDeque;

use tracing::debug;

use crate::task::Task;

/// FIFO of tasks waiting for a child.
///
/// A task leaves the queue only when assigned to an idle child, or when the
/// cluster is ending and the whole queue is drained for rejection. The head
/// slot is also where a ChildDied retry goes back in, ahead of everything
/// that arrived later.
#[derive(Debug, Default)]
pub struct PendingQueue {
    tasks: VecDeque<Task>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Append a freshly enqueued task.
    pub fn push_back(&mut self, task: Task) {
        debug!(command = %task.command(), depth = self.tasks.len() + 1, "task queued");
        self.tasks.push_back(task);
    }

    /// Re-queue a task at the head (retry after its child died).
    pub fn push_front(&mut self, task: Task) {
        debug!(
            command = %task.command(),
            retries = task.retries(),
            "task re-queued at head"
        );
        self.tasks.push_front(task);
    }

    pub fn pop_front(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    /// Take every pending task, e.g. to reject them when the cluster ends.
    pub fn drain(&mut self) -> Vec<Task> {
        self.tasks.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(command: &str) -> Task {
        let (task, _rx) = Task::new(command, |_, _| Ok::<_, String>(()));
        task
    }

    #[test]
    fn fifo_order() {
        let mut q = PendingQueue::new();
        q.push_back(task("a"));
        q.push_back(task("b"));

        assert_eq!(q.pop_front().unwrap().command(), "a");
        assert_eq!(q.pop_front().unwrap().command(), "b");
        assert!(q.pop_front().is_none());
    }

    #[test]
    fn retry_goes_to_the_head() {
        let mut q = PendingQueue::new();
        q.push_back(task("a"));
        q.push_back(task("b"));

        let mut retry = task("dead-child-task");
        retry.bump_retries();
        q.push_front(retry);

        assert_eq!(q.pop_front().unwrap().command(), "dead-child-task");
        assert_eq!(q.pop_front().unwrap().command(), "a");
    }

    #[test]
    fn drain_empties_the_queue() {
        let mut q = PendingQueue::new();
        q.push_back(task("a"));
        q.push_back(task("b"));

        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert!(q.is_empty());
    }
}
