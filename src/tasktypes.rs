//! Task types: the three shapes a task's grading can take, and the
//! dispatcher that picks one by name.
//!
//! Each task type exposes a `compile` and an `evaluate` function with the
//! same shape; [`compile_job`] and [`evaluate_job`] route a job to its
//! task type by `job.meta.task_type`. Discovering a task's task type from
//! persisted configuration is out of scope — callers already know which
//! job variant they're holding and read `task_type` off it directly.

pub mod batch;
pub mod communication;
pub mod output_only;
pub mod util;

use std::sync::Arc;

use crate::cacher::FileCacher;
use crate::config::Config;
use crate::job::{CompilationJob, EvaluationJob};
use crate::sandbox::SandboxRunner;

pub fn compile_job(job: &mut CompilationJob, runner: Arc<dyn SandboxRunner>, cacher: Arc<dyn FileCacher>, config: &Config) -> anyhow::Result<()> {
    match job.meta.task_type.as_str() {
        "Batch" => batch::compile(job, runner, cacher, config),
        "Communication" => communication::compile(job, runner, cacher, config),
        "OutputOnly" => output_only::compile(job, runner, cacher, config),
        other => anyhow::bail!("unknown task type {other:?}"),
    }
}

pub fn evaluate_job(job: &mut EvaluationJob, runner: Arc<dyn SandboxRunner>, cacher: Arc<dyn FileCacher>, config: &Config) -> anyhow::Result<()> {
    match job.meta.task_type.as_str() {
        "Batch" => batch::evaluate(job, runner, cacher, config),
        "Communication" => communication::evaluate(job, runner, cacher, config),
        "OutputOnly" => output_only::evaluate(job, runner, cacher, config),
        other => anyhow::bail!("unknown task type {other:?}"),
    }
}
