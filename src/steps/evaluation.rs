//! `evaluation_step` and its split before/after-run halves, used when
//! several sandboxes must run concurrently (Communication).

use anyhow::bail;

use crate::config::Config;
use crate::sandbox::{Execution, Sandbox};
use crate::stats::{execution_stats, Stats};
use crate::steps::common::generic_step;

/// Process cap for a `multiprocess` evaluation sandbox: generous, since the
/// time/memory limits are what actually bound a submission's resource use.
const MULTIPROCESS_LIMIT: u32 = 1000;

fn apply_evaluation_profile(
    sandbox: &mut Sandbox,
    config: &Config,
    time_limit: f64,
    memory_limit_bytes: u64,
    writable_files: &[String],
    stdin_redirect: Option<&str>,
    stdout_redirect: Option<&str>,
    multiprocess: bool,
) -> anyhow::Result<String> {
    if time_limit <= 0.0 {
        bail!("time_limit must be positive");
    }
    if memory_limit_bytes == 0 {
        bail!("memory_limit must be positive");
    }

    sandbox.timeout = Some(time_limit);
    sandbox.wallclock_timeout = Some(2.0 * time_limit + 1.0);
    sandbox.address_space_kib = Some(memory_limit_bytes / 1024);
    sandbox.fsize_kib = Some(config.max_file_size_bytes / 1024);
    sandbox.max_processes = if multiprocess { MULTIPROCESS_LIMIT } else { 1 };

    let stdout_name = stdout_redirect.unwrap_or("stdout.txt").to_string();
    sandbox.stdout_file = Some(stdout_name.clone());
    sandbox.stderr_file = Some("stderr.txt".to_string());
    sandbox.stdin_file = stdin_redirect.map(str::to_string);

    let mut writable: Vec<String> = writable_files.to_vec();
    writable.push(stdout_name.clone());
    writable.push("stderr.txt".to_string());
    let refs: Vec<&str> = writable.iter().map(String::as_str).collect();
    sandbox.allow_writing_only(&refs);

    Ok(stdout_name)
}

/// Run `command_sequence` to completion under the evaluation resource
/// profile. Returns `(box_success, user_success?, stats?)`; `user_success`
/// is true iff the inner process exited `OK`.
#[allow(clippy::too_many_arguments)]
pub fn evaluation_step(
    sandbox: &mut Sandbox,
    config: &Config,
    command_sequence: &[Vec<String>],
    time_limit: f64,
    memory_limit_bytes: u64,
    writable_files: &[String],
    stdin_redirect: Option<&str>,
    stdout_redirect: Option<&str>,
    multiprocess: bool,
) -> anyhow::Result<(bool, Option<bool>, Option<Stats>)> {
    apply_evaluation_profile(
        sandbox,
        config,
        time_limit,
        memory_limit_bytes,
        writable_files,
        stdin_redirect,
        stdout_redirect,
        multiprocess,
    )?;

    let outcome = generic_step(sandbox, "evaluation", command_sequence, true)?;
    if !outcome.box_success {
        return Ok((false, None, None));
    }
    let stats = outcome.stats;
    let user_success = stats.as_ref().map(Stats::is_ok);
    Ok((true, user_success, stats))
}

/// Apply the evaluation profile and spawn `command` without waiting. The
/// caller owns the returned handle and must eventually pass it (alongside
/// any other concurrently-running sandboxes' children) through
/// `Sandbox::wait_and_drain`, then call [`evaluation_step_after_run`] with
/// the resulting status.
#[allow(clippy::too_many_arguments)]
pub fn evaluation_step_before_run(
    sandbox: &mut Sandbox,
    config: &Config,
    command: &[String],
    time_limit: f64,
    memory_limit_bytes: u64,
    writable_files: &[String],
    stdin_redirect: Option<&str>,
    stdout_redirect: Option<&str>,
    multiprocess: bool,
) -> anyhow::Result<std::process::Child> {
    apply_evaluation_profile(
        sandbox,
        config,
        time_limit,
        memory_limit_bytes,
        writable_files,
        stdin_redirect,
        stdout_redirect,
        multiprocess,
    )?;

    match sandbox.execute_without_std(command, false)? {
        Execution::Handle(child) => Ok(child),
        Execution::Done(_) => unreachable!("execute_without_std(.., wait=false) always returns a handle"),
    }
}

/// Finish an asynchronous evaluation whose child has already been waited
/// on (the caller passes the `ExitStatus` it got back from
/// `Sandbox::wait_and_drain`). Returns `(box_success, user_success?, stats?)`.
pub fn evaluation_step_after_run(
    sandbox: &mut Sandbox,
    status: std::process::ExitStatus,
) -> anyhow::Result<(bool, Option<bool>, Option<Stats>)> {
    let box_success = sandbox.finish_async_execution(status)?;
    if !box_success {
        return Ok((false, None, None));
    }
    let stats = execution_stats(sandbox, true)?;
    let user_success = stats.is_ok();
    Ok((true, Some(user_success), Some(stats)))
}
