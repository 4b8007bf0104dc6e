//! End-to-end coverage of the task-type dispatcher against the fake
//! sandbox backend: a compilation job followed by an evaluation job,
//! through the same `compile_job`/`evaluate_job` entry points a grading
//! worker would call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use gradecore::cacher::{FileCacher, InMemoryFileCacher};
use gradecore::config::{Config, KiloByte};
use gradecore::job::{CompilationJob, Digest, EvaluationJob, FileInfo, JobMeta};
use gradecore::sandbox::testing::FakeSandboxRunner;
use gradecore::sandbox::SandboxRunner;
use gradecore::tasktypes::{compile_job, evaluate_job};
use pretty_assertions::assert_eq;

fn tempdir(suffix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("gradecore-tasktypes-itest-{}-{suffix}", std::process::id()));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

fn test_config(sandbox_root: PathBuf) -> Config {
    Config {
        sandbox_root,
        isolate_path: PathBuf::from("/usr/bin/isolate"),
        keep_sandbox: false,
        shard: 0,
        trusted_sandbox_max_time_s: 5.0,
        trusted_sandbox_max_memory_kib: KiloByte(262144),
        trusted_sandbox_max_processes: 1000,
        compilation_sandbox_max_time_s: 30.0,
        compilation_sandbox_max_memory_kib: KiloByte(262144),
        compilation_sandbox_max_processes: 1000,
        max_file_size_bytes: 1024 * 1024,
    }
}

fn meta(task_type: &str, params: serde_json::Value) -> JobMeta {
    JobMeta {
        task_type: task_type.to_string(),
        task_type_parameters: params,
        info: "integration test".to_string(),
        sandboxes: vec![],
        success: None,
        text: vec![],
        plus: HashMap::new(),
    }
}

/// Scenario: Batch, alone compilation, diff comparison. A correct `sum.sh`
/// submission against input "2 3\n" and correct output "5\n" should score
/// full credit.
#[test]
fn batch_alone_diff_correct_submission_scores_full_credit() {
    let dir = tempdir("batch-alone-diff");
    let config = test_config(dir.clone());
    let runner: Arc<dyn SandboxRunner> = Arc::new(FakeSandboxRunner::new(dir));
    let cacher: Arc<dyn FileCacher> = Arc::new(InMemoryFileCacher::new());

    let source = cacher.put_file(b"#!/bin/sh\nread a b\necho $((a + b))\n", "sum.sh").unwrap();
    let mut files = HashMap::new();
    files.insert("sum.sh".to_string(), FileInfo { filename: "sum.sh".to_string(), digest: source });

    let mut compilation = CompilationJob {
        meta: meta("Batch", serde_json::json!(["alone", ["", ""], "diff"])),
        language: Some("TrivialShell".to_string()),
        files,
        managers: HashMap::new(),
        compilation_success: None,
        executables: HashMap::new(),
    };
    compile_job(&mut compilation, runner.clone(), cacher.clone(), &config).unwrap();
    assert_eq!(compilation.compilation_success, Some(true));
    assert_eq!(compilation.executables.len(), 1);
    assert!(compilation.executables.contains_key("sum"));

    let input = cacher.put_file(b"2 3\n", "input").unwrap();
    let correct = cacher.put_file(b"5\n", "correct").unwrap();

    let mut evaluation = EvaluationJob {
        meta: meta("Batch", serde_json::json!(["alone", ["", ""], "diff"])),
        language: Some("TrivialShell".to_string()),
        executables: compilation.executables.clone(),
        input_digest: input,
        correct_output_digest: Some(correct),
        files: HashMap::new(),
        managers: HashMap::new(),
        time_limit_s: 5.0,
        memory_limit_bytes: 64 * 1024 * 1024,
        multithreaded_sandbox: false,
        only_execution: false,
        get_output: false,
        operation: "testcase-1".to_string(),
        outcome: None,
        user_output: None,
    };
    evaluate_job(&mut evaluation, runner, cacher, &config).unwrap();

    assert_eq!(evaluation.meta.success, Some(true));
    assert_eq!(evaluation.outcome.as_deref(), Some("1.0"));
}

/// Scenario: Batch, grader compilation, explicit file I/O, a submission
/// whose process exits nonzero scores 0.0 with a nonzero-return message.
#[test]
fn batch_grader_file_io_nonzero_return_scores_zero() {
    let dir = tempdir("batch-grader-nonzero");
    let config = test_config(dir.clone());
    let runner: Arc<dyn SandboxRunner> = Arc::new(FakeSandboxRunner::new(dir));
    let cacher: Arc<dyn FileCacher> = Arc::new(InMemoryFileCacher::new());

    let source = cacher.put_file(b"#!/bin/sh\nexit 1\n", "broken.sh").unwrap();
    let mut files = HashMap::new();
    files.insert("broken.sh".to_string(), FileInfo { filename: "broken.sh".to_string(), digest: source });

    let mut compilation = CompilationJob {
        meta: meta("Batch", serde_json::json!(["alone", ["in.txt", "out.txt"], "diff"])),
        language: Some("TrivialShell".to_string()),
        files,
        managers: HashMap::new(),
        compilation_success: None,
        executables: HashMap::new(),
    };
    compile_job(&mut compilation, runner.clone(), cacher.clone(), &config).unwrap();
    assert_eq!(compilation.compilation_success, Some(true));

    let input = cacher.put_file(b"anything\n", "input").unwrap();
    let correct = cacher.put_file(b"anything\n", "correct").unwrap();

    let mut evaluation = EvaluationJob {
        meta: meta("Batch", serde_json::json!(["alone", ["in.txt", "out.txt"], "diff"])),
        language: Some("TrivialShell".to_string()),
        executables: compilation.executables.clone(),
        input_digest: input,
        correct_output_digest: Some(correct),
        files: HashMap::new(),
        managers: HashMap::new(),
        time_limit_s: 5.0,
        memory_limit_bytes: 64 * 1024 * 1024,
        multithreaded_sandbox: false,
        only_execution: false,
        get_output: false,
        operation: "testcase-2".to_string(),
        outcome: None,
        user_output: None,
    };
    evaluate_job(&mut evaluation, runner, cacher, &config).unwrap();

    assert_eq!(evaluation.meta.success, Some(true));
    assert_eq!(evaluation.outcome.as_deref(), Some("0.0"));
    assert!(evaluation.meta.text[0].to_lowercase().contains("nonzero"));
}

/// Scenario: Batch, comparator output_eval, a checker that awards partial
/// credit.
#[test]
fn batch_comparator_checker_partial_credit() {
    let dir = tempdir("batch-comparator");
    let config = test_config(dir.clone());
    let runner: Arc<dyn SandboxRunner> = Arc::new(FakeSandboxRunner::new(dir));
    let cacher: Arc<dyn FileCacher> = Arc::new(InMemoryFileCacher::new());

    let source = cacher.put_file(b"#!/bin/sh\necho partial\n", "guess.sh").unwrap();
    let mut files = HashMap::new();
    files.insert("guess.sh".to_string(), FileInfo { filename: "guess.sh".to_string(), digest: source });

    let mut compilation = CompilationJob {
        meta: meta("Batch", serde_json::json!(["alone", ["", ""], "comparator"])),
        language: Some("TrivialShell".to_string()),
        files,
        managers: HashMap::new(),
        compilation_success: None,
        executables: HashMap::new(),
    };
    compile_job(&mut compilation, runner.clone(), cacher.clone(), &config).unwrap();
    assert_eq!(compilation.compilation_success, Some(true));

    let checker = cacher.put_file(b"#!/bin/sh\necho 0.5\necho translate:partial 1>&2\n", "checker").unwrap();
    let mut managers = HashMap::new();
    managers.insert("checker".to_string(), FileInfo { filename: "checker".to_string(), digest: checker });

    let input = cacher.put_file(b"anything\n", "input").unwrap();
    let correct = cacher.put_file(b"exact\n", "correct").unwrap();

    let mut evaluation = EvaluationJob {
        meta: meta("Batch", serde_json::json!(["alone", ["", ""], "comparator"])),
        language: Some("TrivialShell".to_string()),
        executables: compilation.executables.clone(),
        input_digest: input,
        correct_output_digest: Some(correct),
        files: HashMap::new(),
        managers,
        time_limit_s: 5.0,
        memory_limit_bytes: 64 * 1024 * 1024,
        multithreaded_sandbox: false,
        only_execution: false,
        get_output: false,
        operation: "testcase-3".to_string(),
        outcome: None,
        user_output: None,
    };
    evaluate_job(&mut evaluation, runner, cacher, &config).unwrap();

    assert_eq!(evaluation.meta.success, Some(true));
    assert_eq!(evaluation.outcome.as_deref(), Some("0.5"));
    assert_eq!(evaluation.meta.text, vec!["Output is partially correct".to_string()]);
}

/// Scenario: OutputOnly, a submitted file missing for a testcase scores
/// 0.0 immediately, with no sandbox created.
#[test]
fn output_only_missing_submission_scores_zero_with_no_sandbox() {
    let dir = tempdir("output-only-missing");
    let config = test_config(dir.clone());
    let runner: Arc<dyn SandboxRunner> = Arc::new(FakeSandboxRunner::new(dir));
    let cacher: Arc<dyn FileCacher> = Arc::new(InMemoryFileCacher::new());

    let mut evaluation = EvaluationJob {
        meta: meta("OutputOnly", serde_json::json!(["diff"])),
        language: None,
        executables: HashMap::new(),
        input_digest: Digest("input".to_string()),
        correct_output_digest: None,
        files: HashMap::new(),
        managers: HashMap::new(),
        time_limit_s: 1.0,
        memory_limit_bytes: 1024 * 1024,
        multithreaded_sandbox: false,
        only_execution: false,
        get_output: false,
        operation: "7".to_string(),
        outcome: None,
        user_output: None,
    };
    evaluate_job(&mut evaluation, runner, cacher, &config).unwrap();

    assert_eq!(evaluation.outcome.as_deref(), Some("0.0"));
    assert_eq!(evaluation.meta.text, vec!["File not submitted".to_string()]);
    assert!(evaluation.meta.sandboxes.is_empty());
}

#[test]
fn unknown_task_type_is_rejected_by_the_dispatcher() {
    let dir = tempdir("unknown-task-type");
    let config = test_config(dir.clone());
    let runner: Arc<dyn SandboxRunner> = Arc::new(FakeSandboxRunner::new(dir));
    let cacher: Arc<dyn FileCacher> = Arc::new(InMemoryFileCacher::new());

    let mut evaluation = EvaluationJob {
        meta: meta("Nonexistent", serde_json::json!([])),
        language: None,
        executables: HashMap::new(),
        input_digest: Digest("input".to_string()),
        correct_output_digest: None,
        files: HashMap::new(),
        managers: HashMap::new(),
        time_limit_s: 1.0,
        memory_limit_bytes: 1024,
        multithreaded_sandbox: false,
        only_execution: false,
        get_output: false,
        operation: "1".to_string(),
        outcome: None,
        user_output: None,
    };
    assert!(evaluate_job(&mut evaluation, runner, cacher, &config).is_err());
}
