// src/events.rs

//! Observer channel for cluster lifecycle events.
//!
//! Handlers run synchronously, in registration order, on the scheduler's
//! runner. A panicking handler is caught and reported as one
//! `InternalError` emission; it stays registered.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::errors::TaskError;

/// Everything observable about the cluster, in transition order.
///
/// Per child the order is strict: `ChildStart` < any `TaskData` < `ChildExit`.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    /// A child answered the version probe and joined the idle pool.
    ChildStart { pid: u32 },
    /// A child's exit was observed and its slot removed.
    ChildExit { pid: u32 },
    /// The process factory failed or a child never finished starting.
    StartError { error: TaskError },
    /// The cluster is ending itself (failure-rate breaker).
    EndError { error: TaskError },
    /// The scheduler caught a condition it cannot attribute to a task.
    InternalError { message: String },
    /// A task reached its pass terminal; `data` is the accumulated stdout.
    TaskData { pid: u32, data: String },
    /// A task future was rejected.
    TaskError { error: TaskError },
    /// `end()` has begun; the queue is about to drain.
    BeforeEnd,
    /// All children exited and every pending task was resolved.
    End,
}

type Handler = Box<dyn Fn(&ClusterEvent) + Send>;

/// Synchronous observer registry.
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<Handler>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every event.
    pub fn on(&mut self, handler: impl Fn(&ClusterEvent) + Send + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Deliver an event to every handler.
    ///
    /// Returns the panic payloads of handlers that blew up, for the runtime
    /// to forward to `InternalError`.
    pub fn emit(&self, event: &ClusterEvent) -> Vec<String> {
        let mut panics = Vec::new();

        for handler in &self.handlers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                panics.push(panic_message(payload));
            }
        }

        panics
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("event handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("event handler panicked: {s}")
    } else {
        "event handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn handlers_run_in_registration_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut bus = EventBus::new();

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            bus.on(move |_| seen.lock().unwrap().push(tag));
        }

        assert!(bus.emit(&ClusterEvent::BeforeEnd).is_empty());
        assert_eq!(*seen.lock().unwrap(), ["first", "second"]);
    }

    #[test]
    fn panicking_handler_is_reported_and_stays_registered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut bus = EventBus::new();

        bus.on(|event| {
            if matches!(event, ClusterEvent::End) {
                panic!("boom");
            }
        });
        {
            let calls = Arc::clone(&calls);
            bus.on(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        let panics = bus.emit(&ClusterEvent::End);
        assert_eq!(panics.len(), 1);
        assert!(panics[0].contains("boom"));
        // The healthy handler still ran, and both run again next time.
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(bus.emit(&ClusterEvent::BeforeEnd).is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
