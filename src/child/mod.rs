// src/child/mod.rs

//! Child-process plumbing.
//!
//! - [`framing`] turns raw pipe chunks into complete protocol lines.
//! - [`spawn`] provides the default process factory.
//!
//! The per-child lifecycle state itself lives in the scheduler; this module
//! only knows about bytes, pipes and signals.

pub mod framing;
pub mod spawn;

pub use framing::LineDelimiter;
pub use spawn::command_factory;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::debug;

use crate::engine::KillSignal;

/// Deliver a signal to a child by PID.
///
/// Failure usually means the process is already gone (ESRCH); the scheduler
/// never trusts a signal anyway and waits for the observed exit.
pub(crate) fn send_signal(pid: u32, kind: KillSignal) {
    let sig = match kind {
        KillSignal::Term => Signal::SIGTERM,
        KillSignal::Kill => Signal::SIGKILL,
    };

    if let Err(err) = signal::kill(Pid::from_raw(pid as i32), sig) {
        debug!(pid, signal = ?sig, error = %err, "signal delivery failed");
    }
}
