// src/config/validate.rs

use crate::config::model::ClusterOptions;
use crate::errors::InvalidOptionsError;

/// Run cross-field validation against a set of options.
///
/// Every broken rule is collected; the returned error lists each violation
/// on its own line, in the order the options are declared. Rules:
///
/// - `maxProcs >= 1`
/// - `maxTasksPerProcess >= 1`
/// - `maxProcAgeMillis >= max(spawnTimeoutMillis, taskTimeoutMillis)`
/// - `spawnTimeoutMillis >= 100`
/// - `taskTimeoutMillis >= 10`
/// - `versionCommand`, `exitCommand`, `pass`, `fail` must not be blank
pub fn validate(opts: &ClusterOptions) -> Result<(), InvalidOptionsError> {
    let mut violations = Vec::new();

    if opts.max_procs < 1 {
        violations.push("maxProcs must be greater than or equal to 1".to_string());
    }

    if opts.max_tasks_per_process < 1 {
        violations.push("maxTasksPerProcess must be greater than or equal to 1".to_string());
    }

    let min_age = opts.spawn_timeout_millis.max(opts.task_timeout_millis);
    if opts.max_proc_age_millis < min_age {
        violations.push(format!(
            "maxProcAgeMillis must be greater than or equal to {min_age}"
        ));
    }

    if opts.spawn_timeout_millis < 100 {
        violations.push("spawnTimeoutMillis must be greater than or equal to 100".to_string());
    }

    if opts.task_timeout_millis < 10 {
        violations.push("taskTimeoutMillis must be greater than or equal to 10".to_string());
    }

    for (name, value) in [
        ("versionCommand", &opts.version_command),
        ("exitCommand", &opts.exit_command),
        ("pass", &opts.pass),
        ("fail", &opts.fail),
    ] {
        if value.trim().is_empty() {
            violations.push(format!("{name} must not be blank"));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(InvalidOptionsError::new(violations))
    }
}
