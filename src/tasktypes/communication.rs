//! Communication: one or more user processes talking to an admin-authored
//! manager over named pipes (or, for a single process, stdin/stdout).

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;

use crate::cacher::FileCacher;
use crate::comparators::checker_output::parse_checker_output;
use crate::config::Config;
use crate::job::{CompilationJob, EvaluationJob, FileInfo};
use crate::language::{self, Language};
use crate::sandbox::{Sandbox, SandboxRunner};
use crate::stats::{merge_execution_stats, ExitStatus, Stats};
use crate::steps::{compilation_step, default_messages, evaluation_step_after_run, evaluation_step_before_run, trusted_step};
use crate::tasktypes::util::{
    check_executables_number, check_manager_present, create_sandbox, delete_sandbox, human_evaluation_message,
    is_manager_for_compilation, set_compilation_configuration_error, set_evaluation_configuration_error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compilation {
    Alone,
    Stub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserIo {
    StdIo,
    FifoIo,
}

struct CommunicationParameters {
    num_processes: usize,
    compilation: Compilation,
    user_io: UserIo,
}

impl CommunicationParameters {
    fn parse(value: &serde_json::Value) -> anyhow::Result<Self> {
        let params = value.as_array().ok_or_else(|| anyhow!("communication parameters must be a 3-element array"))?;
        if params.len() != 3 {
            anyhow::bail!("communication parameters must have exactly 3 elements, got {}", params.len());
        }
        let num_processes = params[0].as_i64().ok_or_else(|| anyhow!("num_processes must be an integer"))?;
        if num_processes < 1 {
            anyhow::bail!("num_processes must be at least 1, got {num_processes}");
        }
        let compilation = match params[1].as_str() {
            Some("alone") => Compilation::Alone,
            Some("stub") => Compilation::Stub,
            other => anyhow::bail!("unknown communication compilation parameter {other:?}"),
        };
        let user_io = match params[2].as_str() {
            Some("std_io") => UserIo::StdIo,
            Some("fifo_io") => UserIo::FifoIo,
            other => anyhow::bail!("unknown communication user_io parameter {other:?}"),
        };
        Ok(CommunicationParameters { num_processes: num_processes as usize, compilation, user_io })
    }
}

/// Executable name for a communication submission: the sorted, underscore
/// joined stems of the user source codenames (after expanding `%l` and
/// stripping the canonical source extension), plus the language's
/// executable extension.
fn communication_executable_name(codenames: &[String], language: &Language) -> String {
    let mut stems: Vec<String> = codenames
        .iter()
        .map(|name| {
            let expanded = language::expand_placeholder(name, language);
            expanded.trim_end_matches(language.canonical_source_extension()).to_string()
        })
        .collect();
    stems.sort();
    format!("{}{}", stems.join("_"), language.executable_extension)
}

pub fn compile(
    job: &mut CompilationJob,
    runner: Arc<dyn SandboxRunner>,
    cacher: Arc<dyn FileCacher>,
    config: &Config,
) -> anyhow::Result<()> {
    let params = CommunicationParameters::parse(&job.meta.task_type_parameters)?;

    if job.files.is_empty() {
        set_compilation_configuration_error(job, vec!["no user files were submitted".to_string()]);
        return Ok(());
    }

    let language_name = job.language.clone().ok_or_else(|| anyhow!("compilation job is missing a language"))?;
    let language = language::lookup(&language_name).ok_or_else(|| anyhow!("unknown language {language_name:?}"))?;

    let mut codenames: Vec<String> = job.files.keys().cloned().collect();
    codenames.sort();

    let mut sandbox = create_sandbox(runner, cacher, config, "communication_compile")?;
    let mut sources = Vec::new();
    for codename in &codenames {
        let file = &job.files[codename];
        let staged_name = language::expand_placeholder(codename, language);
        sandbox.create_file_from_digest(&staged_name, &file.digest, false)?;
        sources.push(staged_name);
    }

    if params.compilation == Compilation::Stub {
        let stub_name = format!("stub{}", language.canonical_source_extension());
        match check_manager_present(&job.managers, &stub_name) {
            Ok(manager) => {
                sandbox.create_file_from_digest(&stub_name, &manager.digest, false)?;
                sources.push(stub_name);
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

    let executable_name = communication_executable_name(&codenames, language);
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
        let digest = sandbox.get_file_to_digest(&executable_name, "compiled communication executable", None)?;
        job.executables.insert(executable_name.clone(), FileInfo { filename: executable_name, digest });
    }

    delete_sandbox(&mut sandbox, config, true, false)?;
    Ok(())
}

fn make_fifo(path: &Path) -> anyhow::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())?;
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) };
    if rc != 0 {
        return Err(anyhow!("mkfifo({}) failed: {}", path.display(), std::io::Error::last_os_error()));
    }
    Ok(())
}

enum UserOutcome {
    Pending(std::process::Child),
    SetupFailed,
}

struct UserProcess {
    sandbox: Sandbox,
    outcome: UserOutcome,
}

fn cleanup_all(
    sandbox_mgr: &mut Sandbox,
    user_processes: &mut [UserProcess],
    fifo_dirs: &[PathBuf],
    config: &Config,
    job_succeeded: bool,
) -> anyhow::Result<()> {
    delete_sandbox(sandbox_mgr, config, job_succeeded, false)?;
    for proc in user_processes.iter_mut() {
        delete_sandbox(&mut proc.sandbox, config, job_succeeded, false)?;
    }
    if !config.keep_sandbox && job_succeeded {
        for dir in fifo_dirs {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
    Ok(())
}

pub fn evaluate(
    job: &mut EvaluationJob,
    runner: Arc<dyn SandboxRunner>,
    cacher: Arc<dyn FileCacher>,
    config: &Config,
) -> anyhow::Result<()> {
    let params = CommunicationParameters::parse(&job.meta.task_type_parameters)?;

    if let Err(e) = check_executables_number(&job.executables, 1) {
        set_evaluation_configuration_error(job, vec![e.to_string()]);
        return Ok(());
    }
    let manager_manager = match check_manager_present(&job.managers, "manager") {
        Ok(m) => m.clone(),
        Err(e) => {
            set_evaluation_configuration_error(job, vec![e.to_string()]);
            return Ok(());
        }
    };

    let language_name = job.language.clone().ok_or_else(|| anyhow!("evaluation job is missing a language"))?;
    let language = language::lookup(&language_name).ok_or_else(|| anyhow!("unknown language {language_name:?}"))?;

    let (executable_name, executable) = job.executables.iter().next().expect("checked above to have exactly one entry");
    let executable_name = executable_name.clone();
    let executable_digest = executable.digest.clone();

    let num_processes = params.num_processes;

    let mut fifo_dirs = Vec::with_capacity(num_processes);
    for i in 0..num_processes {
        let dir = config.sandbox_root.join("fifo").join(&job.operation).join(i.to_string());
        std::fs::create_dir_all(&dir)?;
        make_fifo(&dir.join(format!("u{i}_to_m")))?;
        make_fifo(&dir.join(format!("m_to_u{i}")))?;
        fifo_dirs.push(dir);
    }

    let mut sandbox_mgr = create_sandbox(runner.clone(), cacher.clone(), config, "manager_evaluate")?;
    sandbox_mgr.create_file_from_digest("manager", &manager_manager.digest, true)?;
    sandbox_mgr.create_file_from_digest("input.txt", &job.input_digest, false)?;
    for (i, dir) in fifo_dirs.iter().enumerate() {
        sandbox_mgr.add_mapped_directory(&format!("/fifo{i}"), Some(dir.clone()), "rw", false);
    }

    let mut manager_argv = vec!["./manager".to_string()];
    for i in 0..num_processes {
        manager_argv.push(format!("/fifo{i}/u{i}_to_m"));
        manager_argv.push(format!("/fifo{i}/m_to_u{i}"));
    }
    let manager_cpu_limit = (num_processes as f64 * (job.time_limit_s + 1.0)).max(config.trusted_sandbox_max_time_s);
    let manager_memory_bytes = config.trusted_sandbox_max_memory_kib.as_bytes();

    let manager_child = evaluation_step_before_run(
        &mut sandbox_mgr,
        config,
        &manager_argv,
        manager_cpu_limit,
        manager_memory_bytes,
        &["output.txt".to_string()],
        Some("input.txt"),
        None,
        true,
    )?;

    let mut user_processes = Vec::with_capacity(num_processes);
    for i in 0..num_processes {
        let mut sandbox_usr = create_sandbox(runner.clone(), cacher.clone(), config, "user_evaluate")?;
        sandbox_usr.create_file_from_digest(&executable_name, &executable_digest, true)?;
        sandbox_usr.add_mapped_directory(&format!("/fifo{i}"), Some(fifo_dirs[i].clone()), "rw", false);

        let main_name = if params.compilation == Compilation::Stub {
            Some(format!("stub{}", language.executable_extension))
        } else {
            None
        };
        let commands = language::evaluation_commands(language, &executable_name, main_name.as_deref(), &[]);
        let (setup_commands, last_command) = commands.split_at(commands.len() - 1);
        let mut last_command = last_command[0].clone();

        if !setup_commands.is_empty() {
            let (setup_box_success, _success, _stats) = trusted_step(&mut sandbox_usr, config, setup_commands)?;
            if !setup_box_success {
                user_processes.push(UserProcess { sandbox: sandbox_usr, outcome: UserOutcome::SetupFailed });
                continue;
            }
        }

        let (stdin_redirect, stdout_redirect) = match params.user_io {
            UserIo::FifoIo => {
                last_command.push(format!("/fifo{i}/m_to_u{i}"));
                last_command.push(format!("/fifo{i}/u{i}_to_m"));
                if num_processes > 1 {
                    last_command.push(i.to_string());
                }
                (None, None)
            }
            UserIo::StdIo => {
                if num_processes > 1 {
                    last_command.push(i.to_string());
                }
                (Some(format!("/fifo{i}/m_to_u{i}")), Some(format!("/fifo{i}/u{i}_to_m")))
            }
        };

        let child = evaluation_step_before_run(
            &mut sandbox_usr,
            config,
            &last_command,
            job.time_limit_s,
            job.memory_limit_bytes,
            &[],
            stdin_redirect.as_deref(),
            stdout_redirect.as_deref(),
            job.multithreaded_sandbox,
        )?;
        user_processes.push(UserProcess { sandbox: sandbox_usr, outcome: UserOutcome::Pending(child) });
    }

    let mut pending_children = Vec::new();
    pending_children.push(manager_child);
    let mut pending_indices = Vec::new();
    for (i, proc) in user_processes.iter_mut().enumerate() {
        if let UserOutcome::Pending(_) = &proc.outcome {
            let UserOutcome::Pending(child) = std::mem::replace(&mut proc.outcome, UserOutcome::SetupFailed) else { unreachable!() };
            pending_children.push(child);
            pending_indices.push(i);
        }
    }

    let mut statuses = Sandbox::wait_and_drain(&mut pending_children)?;
    let manager_status = statuses.remove(0);
    let (manager_box_success, manager_user_success, manager_stats) = evaluation_step_after_run(&mut sandbox_mgr, manager_status)?;

    let mut user_results: Vec<(bool, Option<bool>, Option<Stats>)> = vec![(false, None, None); user_processes.len()];
    for (status, original_index) in statuses.into_iter().zip(pending_indices.into_iter()) {
        let result = evaluation_step_after_run(&mut user_processes[original_index].sandbox, status)?;
        user_results[original_index] = result;
    }

    job.meta.sandboxes.push(sandbox_mgr.outer_dir().display().to_string());
    for proc in &user_processes {
        job.meta.sandboxes.push(proc.sandbox.outer_dir().display().to_string());
    }

    let any_box_failure = !manager_box_success || user_results.iter().any(|(box_success, _, _)| !box_success);
    let manager_ran_ok = manager_user_success == Some(true);

    if any_box_failure || !manager_ran_ok {
        job.meta.success = Some(false);
        cleanup_all(&mut sandbox_mgr, &mut user_processes, &fifo_dirs, config, false)?;
        return Ok(());
    }

    let mut merged: Option<Stats> = None;
    for (_, _, stats) in &user_results {
        merged = Some(merge_execution_stats(merged, stats.clone(), true)?);
    }
    let mut merged = merged.expect("num_processes is at least 1");
    if merged.cpu_time.unwrap_or(0.0) > job.time_limit_s {
        merged.exit_status = ExitStatus::Timeout;
    }

    job.meta.success = Some(true);

    if merged.exit_status != ExitStatus::Ok {
        job.outcome = Some("0.0".to_string());
        job.meta.text = human_evaluation_message(&merged)?;
        cleanup_all(&mut sandbox_mgr, &mut user_processes, &fifo_dirs, config, true)?;
        return Ok(());
    }

    if job.only_execution {
        job.outcome = Some("0.0".to_string());
        job.meta.text = vec![default_messages().get("execution_completed")?.message.to_string()];
        cleanup_all(&mut sandbox_mgr, &mut user_processes, &fifo_dirs, config, true)?;
        return Ok(());
    }

    if job.get_output {
        if sandbox_mgr.file_exists("output.txt") {
            let bytes = sandbox_mgr.get_file_to_bytes("output.txt", Some(config.max_file_size_bytes))?;
            job.user_output = Some(cacher.put_file(&bytes, "communication manager output")?);
        } else {
            job.user_output = None;
        }
    }

    let manager_stats = manager_stats.expect("manager box success implies stats were collected");
    match parse_checker_output(manager_stats.stdout.as_deref().unwrap_or(""), manager_stats.stderr.as_deref().unwrap_or("")) {
        Ok((outcome, text)) => {
            job.outcome = Some(format!("{outcome:?}"));
            job.meta.text = vec![text];
        }
        Err(e) => {
            log::error!("communication evaluate {:?}: malformed manager output: {e}", job.meta.info);
            job.meta.success = Some(false);
        }
    }

    let succeeded = job.meta.success == Some(true);
    cleanup_all(&mut sandbox_mgr, &mut user_processes, &fifo_dirs, config, succeeded)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cacher::InMemoryFileCacher;
    use crate::job::JobMeta;
    use crate::sandbox::testing::FakeSandboxRunner;
    use std::collections::HashMap;

    fn tempdir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gradecore-communication-test-{}-{suffix}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    fn meta(params: serde_json::Value) -> JobMeta {
        JobMeta {
            task_type: "Communication".to_string(),
            task_type_parameters: params,
            info: "test".to_string(),
            sandboxes: vec![],
            success: None,
            text: vec![],
            plus: HashMap::new(),
        }
    }

    #[test]
    fn executable_name_is_sorted_and_joined() {
        let codenames = vec!["b.sh".to_string(), "a.sh".to_string()];
        let name = communication_executable_name(&codenames, &crate::language::TRIVIAL_SHELL);
        assert_eq!(name, "a_b");
    }

    #[test]
    fn rejects_zero_processes() {
        assert!(CommunicationParameters::parse(&serde_json::json!([0, "alone", "std_io"])).is_err());
    }

    #[test]
    fn rejects_unknown_compilation_mode() {
        assert!(CommunicationParameters::parse(&serde_json::json!([1, "bogus", "std_io"])).is_err());
    }

    #[test]
    fn make_fifo_creates_a_named_pipe() {
        let dir = tempdir("mkfifo");
        let path = dir.join("a_fifo");
        make_fifo(&path).unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        use std::os::unix::fs::FileTypeExt;
        assert!(metadata.file_type().is_fifo());
    }

    #[test]
    fn compile_alone_produces_joined_executable_name() {
        let dir = tempdir("compile-alone");
        let config = crate::config::test_config(dir.clone());
        let runner: Arc<dyn SandboxRunner> = Arc::new(FakeSandboxRunner::new(dir.clone()));
        let cacher: Arc<dyn FileCacher> = Arc::new(InMemoryFileCacher::new());

        let source_digest = cacher.put_file(b"#!/bin/sh\ntrue\n", "user source").unwrap();
        let mut files = HashMap::new();
        files.insert("user.sh".to_string(), FileInfo { filename: "user.sh".to_string(), digest: source_digest });

        let mut job = CompilationJob {
            meta: meta(serde_json::json!([1, "alone", "std_io"])),
            language: Some("TrivialShell".to_string()),
            files,
            managers: HashMap::new(),
            compilation_success: None,
            executables: HashMap::new(),
        };

        compile(&mut job, runner, cacher, &config).unwrap();

        assert_eq!(job.compilation_success, Some(true));
        assert!(job.executables.contains_key("user"));
    }

    #[test]
    fn compile_stub_without_manager_is_a_configuration_error() {
        let dir = tempdir("compile-stub-missing");
        let config = crate::config::test_config(dir.clone());
        let runner: Arc<dyn SandboxRunner> = Arc::new(FakeSandboxRunner::new(dir.clone()));
        let cacher: Arc<dyn FileCacher> = Arc::new(InMemoryFileCacher::new());

        let source_digest = cacher.put_file(b"#!/bin/sh\ntrue\n", "user source").unwrap();
        let mut files = HashMap::new();
        files.insert("user.sh".to_string(), FileInfo { filename: "user.sh".to_string(), digest: source_digest });

        let mut job = CompilationJob {
            meta: meta(serde_json::json!([1, "stub", "std_io"])),
            language: Some("TrivialShell".to_string()),
            files,
            managers: HashMap::new(),
            compilation_success: None,
            executables: HashMap::new(),
        };

        // compile()'s stub-missing branch returns before job.meta.sandboxes
        // is recorded, so the boxes directory itself is the only witness
        // that no sandbox was left behind under it.
        let boxes_before = std::fs::read_dir(&dir).map(|d| d.count()).unwrap_or(0);
        compile(&mut job, runner, cacher, &config).unwrap();
        let boxes_after = std::fs::read_dir(&dir).map(|d| d.count()).unwrap_or(0);

        assert_eq!(job.meta.success, Some(true));
        assert_eq!(job.compilation_success, Some(false));
        assert_eq!(boxes_after, boxes_before, "configuration error is an admin fault, not a grading failure: sandbox must not be retained");
    }
}
