//! Batch: a single user process, reading from stdin or a named file and
//! writing to stdout or a named file, checked by whitediff or a checker.

use std::sync::Arc;

use anyhow::anyhow;

use crate::cacher::FileCacher;
use crate::config::Config;
use crate::job::{CompilationJob, EvaluationJob, FileInfo};
use crate::language::{self, Language};
use crate::sandbox::SandboxRunner;
use crate::steps::{compilation_step, evaluation_step};
use crate::tasktypes::util::{
    check_executables_number, check_files_number, check_manager_present, create_sandbox, delete_sandbox, eval_output,
    human_evaluation_message, is_manager_for_compilation, set_compilation_configuration_error,
    set_evaluation_configuration_error, OutputEval,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compilation {
    Alone,
    Grader,
}

struct BatchParameters {
    compilation: Compilation,
    input_filename: String,
    output_filename: String,
    output_eval: OutputEval,
}

impl BatchParameters {
    fn parse(value: &serde_json::Value) -> anyhow::Result<Self> {
        let params = value.as_array().ok_or_else(|| anyhow!("batch parameters must be a 3-element array"))?;
        if params.len() != 3 {
            anyhow::bail!("batch parameters must have exactly 3 elements, got {}", params.len());
        }
        let compilation = match params[0].as_str() {
            Some("alone") => Compilation::Alone,
            Some("grader") => Compilation::Grader,
            other => anyhow::bail!("unknown batch compilation parameter {other:?}"),
        };
        let io = params[1].as_array().ok_or_else(|| anyhow!("batch io parameter must be a 2-element array"))?;
        if io.len() != 2 {
            anyhow::bail!("batch io parameter must have exactly 2 elements, got {}", io.len());
        }
        let input_filename = io[0].as_str().ok_or_else(|| anyhow!("batch input filename must be a string"))?.to_string();
        let output_filename = io[1].as_str().ok_or_else(|| anyhow!("batch output filename must be a string"))?.to_string();
        let output_eval = OutputEval::parse(params[2].as_str().ok_or_else(|| anyhow!("batch output_eval must be a string"))?)?;
        Ok(BatchParameters { compilation, input_filename, output_filename, output_eval })
    }
}

/// Executable name after compiling a single source: the source's codename
/// with its extension stripped, plus the language's executable extension.
fn executable_name_for(source_name: &str, language: &Language) -> String {
    let stem = source_name.trim_end_matches(language.canonical_source_extension());
    format!("{stem}{}", language.executable_extension)
}

pub fn compile(
    job: &mut CompilationJob,
    runner: Arc<dyn SandboxRunner>,
    cacher: Arc<dyn FileCacher>,
    config: &Config,
) -> anyhow::Result<()> {
    let params = BatchParameters::parse(&job.meta.task_type_parameters)?;

    if let Err(e) = check_files_number(&job.files, 1) {
        set_compilation_configuration_error(job, vec![e.to_string()]);
        return Ok(());
    }

    let language_name = job.language.clone().ok_or_else(|| anyhow!("compilation job is missing a language"))?;
    let language = language::lookup(&language_name).ok_or_else(|| anyhow!("unknown language {language_name:?}"))?;

    let (codename, file) = job.files.iter().next().expect("checked above to have exactly one entry");
    let staged_name = language::expand_placeholder(codename, language);
    let executable_name = executable_name_for(&staged_name, language);

    let mut sandbox = create_sandbox(runner, cacher, config, "batch_compile")?;
    sandbox.create_file_from_digest(&staged_name, &file.digest, false)?;

    let mut sources = vec![staged_name];
    if params.compilation == Compilation::Grader {
        let grader_name = format!("grader{}", language.canonical_source_extension());
        match check_manager_present(&job.managers, &grader_name) {
            Ok(manager) => {
                sandbox.create_file_from_digest(&grader_name, &manager.digest, false)?;
                sources.push(grader_name);
            }
            Err(e) => {
                set_compilation_configuration_error(job, vec![e.to_string()]);
                delete_sandbox(&mut sandbox, config, true, false)?;
                return Ok(());
            }
        }
    }

    for (name, manager) in &job.managers {
        if is_manager_for_compilation(name, language) {
            sandbox.create_file_from_digest(name, &manager.digest, false)?;
        }
    }

    let commands = language::compilation_commands(language, &sources, &executable_name);
    let (box_success, compile_success, text, _stats) = compilation_step(&mut sandbox, config, &commands)?;

    job.meta.sandboxes.push(sandbox.outer_dir().display().to_string());

    if !box_success {
        job.meta.success = Some(false);
        delete_sandbox(&mut sandbox, config, false, false)?;
        return Ok(());
    }

    job.meta.success = Some(true);
    job.compilation_success = compile_success;
    job.meta.text = text.unwrap_or_default();

    if compile_success == Some(true) {
        let digest = sandbox.get_file_to_digest(&executable_name, "compiled batch executable", None)?;
        job.executables.insert(executable_name.clone(), FileInfo { filename: executable_name, digest });
    }

    delete_sandbox(&mut sandbox, config, true, false)?;
    Ok(())
}

pub fn evaluate(
    job: &mut EvaluationJob,
    runner: Arc<dyn SandboxRunner>,
    cacher: Arc<dyn FileCacher>,
    config: &Config,
) -> anyhow::Result<()> {
    let params = BatchParameters::parse(&job.meta.task_type_parameters)?;

    if let Err(e) = check_executables_number(&job.executables, 1) {
        set_evaluation_configuration_error(job, vec![e.to_string()]);
        return Ok(());
    }

    let language_name = job.language.clone().ok_or_else(|| anyhow!("evaluation job is missing a language"))?;
    let language = language::lookup(&language_name).ok_or_else(|| anyhow!("unknown language {language_name:?}"))?;

    let (executable_name, executable) = job.executables.iter().next().expect("checked above to have exactly one entry");
    let executable_name = executable_name.clone();

    let mut sandbox = create_sandbox(runner, cacher.clone(), config, "batch_evaluate")?;
    sandbox.create_file_from_digest(&executable_name, &executable.digest, true)?;

    let stdin_redirect = if params.input_filename.is_empty() {
        sandbox.create_file_from_digest("input.txt", &job.input_digest, false)?;
        Some("input.txt".to_string())
    } else {
        sandbox.create_file_from_digest(&params.input_filename, &job.input_digest, false)?;
        None
    };

    let (writable_files, stdout_redirect): (Vec<String>, Option<&str>) = if params.output_filename.is_empty() {
        (Vec::new(), Some("output.txt"))
    } else {
        (vec![params.output_filename.clone()], None)
    };
    let output_name = if params.output_filename.is_empty() { "output.txt".to_string() } else { params.output_filename.clone() };

    let commands = language::evaluation_commands(language, &executable_name, None, &[]);
    let (box_success, user_success, stats) = evaluation_step(
        &mut sandbox,
        config,
        &commands,
        job.time_limit_s,
        job.memory_limit_bytes,
        &writable_files,
        stdin_redirect.as_deref(),
        stdout_redirect,
        job.multithreaded_sandbox,
    )?;

    job.meta.sandboxes.push(sandbox.outer_dir().display().to_string());

    if !box_success {
        job.meta.success = Some(false);
        delete_sandbox(&mut sandbox, config, false, false)?;
        return Ok(());
    }
    job.meta.success = Some(true);

    if user_success != Some(true) {
        let stats = stats.expect("box_success implies stats were collected");
        job.outcome = Some("0.0".to_string());
        job.meta.text = human_evaluation_message(&stats)?;
        delete_sandbox(&mut sandbox, config, true, false)?;
        return Ok(());
    }

    if job.only_execution {
        job.outcome = Some("0.0".to_string());
        job.meta.text = vec![crate::steps::default_messages().get("execution_completed")?.message.to_string()];
        delete_sandbox(&mut sandbox, config, true, false)?;
        return Ok(());
    }

    if job.get_output {
        let bytes = sandbox.get_file_to_bytes(&output_name, Some(config.max_file_size_bytes))?;
        job.user_output = Some(cacher.put_file(&bytes, "batch evaluation output")?);
    }

    if params.output_eval == OutputEval::Comparator && job.managers.get("checker").is_none() {
        set_evaluation_configuration_error(job, vec!["the dataset is missing a checker".to_string()]);
        delete_sandbox(&mut sandbox, config, true, false)?;
        return Ok(());
    }
    let Some(correct_output_digest) = job.correct_output_digest.clone() else {
        set_evaluation_configuration_error(job, vec!["the dataset is missing a correct output".to_string()]);
        delete_sandbox(&mut sandbox, config, true, false)?;
        return Ok(());
    };

    if params.output_eval == OutputEval::Diff {
        sandbox.create_file_from_digest("correct_output.txt", &correct_output_digest, false)?;
    }
    let checker_manager = job.managers.get("checker");

    let (success, outcome, text) = eval_output(
        &mut sandbox,
        config,
        params.output_eval.as_str(),
        checker_manager,
        &job.input_digest,
        &correct_output_digest,
        &output_name,
    )?;

    if !success {
        job.meta.success = Some(false);
        delete_sandbox(&mut sandbox, config, false, false)?;
        return Ok(());
    }

    job.outcome = outcome.map(|o| format!("{o:?}"));
    job.meta.text = text.unwrap_or_default();
    delete_sandbox(&mut sandbox, config, true, false)?;
    Ok(())
}
