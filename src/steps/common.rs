//! Shared machinery behind every grading step: run one command and collect
//! its stats, or run a sequence and stop at the first non-`OK` exit.

use crate::sandbox::{Execution, Sandbox};
use crate::stats::{execution_stats, ExitStatus, Stats};

/// Result of running a whole command sequence through [`generic_step`].
pub struct GenericStepOutcome {
    /// Whether the helper itself ran without a protocol failure. `false`
    /// means the step could not even be interpreted (no `exit_status`/
    /// `stats` are available).
    pub box_success: bool,
    pub exit_status: Option<ExitStatus>,
    pub stats: Option<Stats>,
}

/// Run one command to completion, redirecting its stdout/stderr to the
/// given (sandbox-relative) filenames, and collect its stats.
pub fn generic_execution(
    sandbox: &mut Sandbox,
    command: &[String],
    stdout_name: &str,
    stderr_name: &str,
    collect_output: bool,
) -> anyhow::Result<(bool, Option<Stats>)> {
    sandbox.stdout_file = Some(stdout_name.to_string());
    sandbox.stderr_file = Some(stderr_name.to_string());
    match sandbox.execute_without_std(command, true)? {
        Execution::Done(true) => Ok((true, Some(execution_stats(sandbox, collect_output)?))),
        Execution::Done(false) => Ok((false, None)),
        Execution::Handle(_) => unreachable!("execute_without_std(.., wait=true) never returns a handle"),
    }
}

/// Run `commands` in sequence under a shared resource profile (already set
/// on `sandbox` by the caller), stopping at the first command whose exit
/// status isn't `OK`. Each command's stdout/stderr are captured to
/// `<step_name>_std{out,err}_<n>.txt`, `n` starting at 1.
pub fn generic_step(
    sandbox: &mut Sandbox,
    step_name: &str,
    commands: &[Vec<String>],
    collect_output: bool,
) -> anyhow::Result<GenericStepOutcome> {
    let mut last_stats = None;
    for (i, command) in commands.iter().enumerate() {
        let stdout_name = format!("{step_name}_stdout_{}.txt", i + 1);
        let stderr_name = format!("{step_name}_stderr_{}.txt", i + 1);
        let (box_success, stats) = generic_execution(sandbox, command, &stdout_name, &stderr_name, collect_output)?;
        if !box_success {
            return Ok(GenericStepOutcome { box_success: false, exit_status: None, stats: None });
        }
        let stats = stats.expect("box_success implies stats were collected");
        let exit_status = stats.exit_status;
        last_stats = Some(stats);
        if exit_status != ExitStatus::Ok {
            return Ok(GenericStepOutcome { box_success: true, exit_status: Some(exit_status), stats: last_stats });
        }
    }
    Ok(GenericStepOutcome {
        box_success: true,
        exit_status: last_stats.as_ref().map(|s| s.exit_status),
        stats: last_stats,
    })
}
