// src/config/model.rs

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Newline convention used on the child's wire protocol.
///
/// This must match what the child actually emits; the framing layer splits
/// on exactly this sequence and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Newline {
    Lf,
    Crlf,
}

impl Newline {
    /// The byte sequence appended to outgoing commands and expected between
    /// incoming lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Newline::Lf => "\n",
            Newline::Crlf => "\r\n",
        }
    }
}

impl Default for Newline {
    fn default() -> Self {
        Newline::Lf
    }
}

impl FromStr for Newline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lf" => Ok(Newline::Lf),
            "crlf" => Ok(Newline::Crlf),
            other => Err(format!(
                "invalid newline: {other} (expected \"lf\" or \"crlf\")"
            )),
        }
    }
}

/// Cluster configuration.
///
/// Field names follow the camelCase spelling used in validation messages, so
/// a TOML file reads the same as the errors it can produce:
///
/// ```toml
/// maxProcs = 4
/// maxTasksPerProcess = 100
/// taskTimeoutMillis = 5000
/// versionCommand = "version"
/// pass = "PASS"
/// fail = "FAIL"
/// ```
///
/// All fields are optional in TOML and default to production values.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterOptions {
    /// Upper bound on live children.
    pub max_procs: usize,

    /// Retire a child after this many terminal responses.
    pub max_tasks_per_process: u32,

    /// Retire an idle child once it is older than this.
    pub max_proc_age_millis: u64,

    /// How long a fresh child may take to answer the version probe.
    pub spawn_timeout_millis: u64,

    /// Per-task budget from assignment to terminal line.
    pub task_timeout_millis: u64,

    /// Scheduler tick cadence. `0` disables the interval; deadline wake-ups
    /// still fire.
    pub on_idle_interval_millis: u64,

    /// How long `end()` waits after the exit command before escalating to
    /// signals, and again between SIGTERM and SIGKILL.
    pub end_graceful_wait_time_millis: u64,

    /// Sliding-window cap on spawn/startup failures; exceeding it ends the
    /// cluster.
    pub max_reasonable_process_failures_per_minute: u32,

    /// Post-exit grace during which a dying child's buffered stdout may
    /// still complete its task.
    pub stream_flush_millis: u64,

    /// Command sent to a fresh child to confirm it is ready.
    pub version_command: String,

    /// Command asking a child to exit on its own.
    pub exit_command: String,

    /// Terminal line marking task success.
    pub pass: String,

    /// Terminal line marking task failure.
    pub fail: String,

    /// Wire newline convention.
    pub newline: Newline,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            max_procs: 1,
            max_tasks_per_process: 500,
            max_proc_age_millis: 300_000,
            spawn_timeout_millis: 15_000,
            task_timeout_millis: 10_000,
            on_idle_interval_millis: 2_000,
            end_graceful_wait_time_millis: 500,
            max_reasonable_process_failures_per_minute: 10,
            stream_flush_millis: 10,
            version_command: "version".to_string(),
            exit_command: "exit".to_string(),
            pass: "PASS".to_string(),
            fail: "FAIL".to_string(),
            newline: Newline::Lf,
        }
    }
}

impl ClusterOptions {
    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_millis)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_millis)
    }

    pub fn max_proc_age(&self) -> Duration {
        Duration::from_millis(self.max_proc_age_millis)
    }

    pub fn end_graceful_wait(&self) -> Duration {
        Duration::from_millis(self.end_graceful_wait_time_millis)
    }

    pub fn stream_flush(&self) -> Duration {
        Duration::from_millis(self.stream_flush_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let opts = ClusterOptions::default();
        assert!(crate::config::validate(&opts).is_ok());
    }

    #[test]
    fn newline_round_trip() {
        assert_eq!("lf".parse::<Newline>().unwrap(), Newline::Lf);
        assert_eq!("CRLF".parse::<Newline>().unwrap(), Newline::Crlf);
        assert!("cr".parse::<Newline>().is_err());
        assert_eq!(Newline::Crlf.as_str(), "\r\n");
    }

    #[test]
    fn camel_case_keys_deserialize() {
        let opts: ClusterOptions =
            toml::from_str("maxProcs = 3\ntaskTimeoutMillis = 50\nnewline = \"crlf\"").unwrap();
        assert_eq!(opts.max_procs, 3);
        assert_eq!(opts.task_timeout_millis, 50);
        assert_eq!(opts.newline, Newline::Crlf);
        // Untouched fields keep their defaults.
        assert_eq!(opts.pass, "PASS");
    }
}
