//! Helpers shared by every task type: parameter/file-count sanity checks,
//! configuration-error shortcuts, and the comparator dispatch used by both
//! Batch and OutputOnly.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;

use crate::cacher::FileCacher;
use crate::config::Config;
use crate::job::{CompilationJob, Digest, EvaluationJob, FileInfo, Manager};
use crate::language::Language;
use crate::sandbox::{Sandbox, SandboxRunner};
use crate::stats::{ExitStatus, Stats};
use crate::steps::{checker_step, default_messages, white_diff_step};

pub fn check_files_number(files: &HashMap<String, FileInfo>, expected: usize) -> anyhow::Result<()> {
    if files.len() != expected {
        anyhow::bail!("expected exactly {expected} file(s), got {}", files.len());
    }
    Ok(())
}

pub fn check_executables_number(executables: &HashMap<String, FileInfo>, expected: usize) -> anyhow::Result<()> {
    if executables.len() != expected {
        anyhow::bail!("expected exactly {expected} executable(s), got {}", executables.len());
    }
    Ok(())
}

pub fn check_manager_present<'a>(managers: &'a HashMap<String, Manager>, name: &str) -> anyhow::Result<&'a Manager> {
    managers.get(name).ok_or_else(|| anyhow!("required manager {name:?} is missing"))
}

/// A filename a language's compiler would want alongside the submission
/// (headers, extra translation units carried in as managers).
pub fn is_manager_for_compilation(filename: &str, language: &Language) -> bool {
    language.has_source_header_or_object_extension(filename)
}

/// Fail a compilation job with an admin-visible configuration error: logged,
/// but recovered as a regular (unsuccessful) result rather than a box
/// failure.
pub fn set_compilation_configuration_error(job: &mut CompilationJob, text: Vec<String>) {
    log::error!("configuration error compiling job {:?}: {text:?}", job.meta.info);
    job.meta.success = Some(true);
    job.compilation_success = Some(false);
    job.meta.text = text;
}

/// Fail an evaluation job with an admin-visible configuration error,
/// surfaced as outcome `0.0` rather than a box failure.
pub fn set_evaluation_configuration_error(job: &mut EvaluationJob, text: Vec<String>) {
    log::error!("configuration error evaluating job {:?}: {text:?}", job.meta.info);
    job.meta.success = Some(true);
    job.outcome = Some("0.0".to_string());
    job.meta.text = text;
}

/// Run whitediff or a checker manager against `sandbox`'s staged user
/// output, depending on the task type's `output_eval` parameter. For
/// `"diff"`, `correct_output.txt` must already be staged in `sandbox` by
/// the caller. Returns `(success, outcome?, text?)`.
pub fn eval_output(
    sandbox: &mut Sandbox,
    config: &Config,
    output_eval: &str,
    checker_manager: Option<&Manager>,
    input_digest: &Digest,
    correct_output_digest: &Digest,
    user_output_name: &str,
) -> anyhow::Result<(bool, Option<f64>, Option<Vec<String>>)> {
    match output_eval {
        "diff" => {
            let (outcome, text) = white_diff_step(sandbox, user_output_name, "correct_output.txt")?;
            Ok((true, Some(outcome), Some(text)))
        }
        "comparator" => {
            let manager = checker_manager.ok_or_else(|| anyhow!("comparator output_eval requires a checker manager"))?;
            let (success, outcome, text) =
                checker_step(sandbox, config, &manager.digest, input_digest, correct_output_digest, user_output_name, &[])?;
            Ok((success, outcome, text.map(|t| vec![t])))
        }
        other => anyhow::bail!("unknown output_eval {other:?}"),
    }
}

/// The `output_eval` parameter shared by Batch and OutputOnly: whitediff, or
/// a checker manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEval {
    Diff,
    Comparator,
}

impl OutputEval {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "diff" => Ok(OutputEval::Diff),
            "comparator" => Ok(OutputEval::Comparator),
            other => anyhow::bail!("unknown output_eval {other:?}"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputEval::Diff => "diff",
            OutputEval::Comparator => "comparator",
        }
    }
}

/// Translate a non-`OK` evaluation outcome into the user-visible `text`
/// list-of-strings every task type reports for a failed user run.
pub fn human_evaluation_message(stats: &Stats) -> anyhow::Result<Vec<String>> {
    let messages = default_messages();
    let signal = || stats.signal.unwrap_or(-1).to_string();
    Ok(match stats.exit_status {
        ExitStatus::Ok => vec![messages.get("execution_completed")?.message.to_string()],
        ExitStatus::NonzeroReturn => vec![messages.get("evaluation_nonzero_return")?.message.to_string()],
        ExitStatus::Timeout => vec![messages.get("evaluation_timeout")?.message.to_string()],
        ExitStatus::TimeoutWall => vec![messages.get("evaluation_timeout_wall")?.message.to_string()],
        ExitStatus::Signal => vec![messages.get("evaluation_signal")?.message.to_string(), signal()],
        ExitStatus::MemoryLimit => vec![messages.get("evaluation_memory_limit")?.message.to_string(), signal()],
        ExitStatus::SandboxError => vec![messages.get("evaluation_sandbox_error")?.message.to_string()],
    })
}

/// Allocate a fresh sandbox for a grading step.
pub fn create_sandbox(
    runner: Arc<dyn SandboxRunner>,
    cacher: Arc<dyn FileCacher>,
    config: &Config,
    tag: &str,
) -> anyhow::Result<Sandbox> {
    Sandbox::new(runner, cacher, config, Some(tag))
}

/// Tear down a sandbox per the retention policy: kept if the global
/// `keep_sandbox` flag is set, the job asked for retention, or the job
/// didn't succeed (so an admin can inspect what went wrong).
pub fn delete_sandbox(sandbox: &mut Sandbox, config: &Config, job_succeeded: bool, job_wants_retention: bool) -> anyhow::Result<()> {
    let keep = config.keep_sandbox || job_wants_retention || !job_succeeded;
    sandbox.cleanup(!keep)
}
