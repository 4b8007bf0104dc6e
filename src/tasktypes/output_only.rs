//! OutputOnly: no submitted source, just a file the contestant uploads
//! directly. Compilation is a no-op; evaluation compares the uploaded file
//! against the expected output the same way Batch does.

use std::sync::Arc;

use crate::cacher::FileCacher;
use crate::config::Config;
use crate::job::{CompilationJob, EvaluationJob};
use crate::sandbox::SandboxRunner;
use crate::steps::default_messages;
use crate::tasktypes::util::{create_sandbox, delete_sandbox, eval_output, set_evaluation_configuration_error, OutputEval};

pub fn compile(job: &mut CompilationJob, _runner: Arc<dyn SandboxRunner>, _cacher: Arc<dyn FileCacher>, _config: &Config) -> anyhow::Result<()> {
    job.meta.success = Some(true);
    job.compilation_success = Some(true);
    job.meta.text = vec![default_messages().get("no_compilation_needed")?.message.to_string()];
    Ok(())
}

pub fn evaluate(job: &mut EvaluationJob, runner: Arc<dyn SandboxRunner>, cacher: Arc<dyn FileCacher>, config: &Config) -> anyhow::Result<()> {
    let params = job.meta.task_type_parameters.as_array().ok_or_else(|| anyhow::anyhow!("output_only parameters must be a 1-element array"))?;
    if params.len() != 1 {
        anyhow::bail!("output_only parameters must have exactly 1 element, got {}", params.len());
    }
    let output_eval =
        OutputEval::parse(params[0].as_str().ok_or_else(|| anyhow::anyhow!("output_only output_eval must be a string"))?)?;

    let output_filename = format!("{}.out", job.operation);
    let Some(file) = job.files.get(&output_filename) else {
        job.meta.success = Some(true);
        job.outcome = Some("0.0".to_string());
        job.meta.text = vec![default_messages().get("file_not_submitted")?.message.to_string()];
        return Ok(());
    };
    let user_output_digest = file.digest.clone();

    if output_eval == OutputEval::Comparator && job.managers.get("checker").is_none() {
        set_evaluation_configuration_error(job, vec!["the dataset is missing a checker".to_string()]);
        return Ok(());
    }
    let Some(correct_output_digest) = job.correct_output_digest.clone() else {
        set_evaluation_configuration_error(job, vec!["the dataset is missing a correct output".to_string()]);
        return Ok(());
    };

    let mut sandbox = create_sandbox(runner, cacher.clone(), config, "output_only_evaluate")?;
    sandbox.create_file_from_digest("output.txt", &user_output_digest, false)?;
    if output_eval == OutputEval::Diff {
        sandbox.create_file_from_digest("correct_output.txt", &correct_output_digest, false)?;
    }
    let checker_manager = job.managers.get("checker");

    if job.get_output {
        job.user_output = Some(cacher.put_file(&sandbox.get_file_to_bytes("output.txt", Some(config.max_file_size_bytes))?, "output-only submission")?);
    }

    let (success, outcome, text) = eval_output(
        &mut sandbox,
        config,
        output_eval.as_str(),
        checker_manager,
        &job.input_digest,
        &correct_output_digest,
        "output.txt",
    )?;

    job.meta.sandboxes.push(sandbox.outer_dir().display().to_string());

    if !success {
        job.meta.success = Some(false);
        delete_sandbox(&mut sandbox, config, false, false)?;
        return Ok(());
    }

    job.meta.success = Some(true);
    job.outcome = outcome.map(|o| format!("{o:?}"));
    job.meta.text = text.unwrap_or_default();
    delete_sandbox(&mut sandbox, config, true, false)?;
    Ok(())
}
