//! A single sandboxed environment, layered over the external isolation
//! helper through the [`SandboxRunner`] trait (see `sandbox::runner`).
//!
//! A `Sandbox` owns one box id for its whole lifetime; it stages files in,
//! runs one command at a time against a fresh set of limits, and can be
//! read back from afterwards. Grading steps (`steps::*`) drive a `Sandbox`;
//! this module knows nothing about compilation, evaluation or checkers.

mod alloc;
mod drain;
mod meta;
pub mod runner;
pub mod testing;
mod truncator;

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail};

use crate::cacher::FileCacher;
use crate::config::Config;
use crate::job::Digest;
use crate::stats::ExitStatus;

pub use runner::SandboxRunner;

/// Commands the sandbox is allowed to run directly on the host, bypassing
/// the helper entirely. Kept deliberately tiny: these are used only to
/// stage graders/managers/checkers into place, never to run submitted code.
const SECURE_COMMANDS: &[&str] = &["/bin/cp", "/bin/mv", "/usr/bin/zip", "/usr/bin/unzip"];

/// A directory the helper should bind-mount into the sandbox, mirroring
/// isolate's `--dir=inside[=outside][:options]` syntax.
#[derive(Debug, Clone)]
pub struct DirMapping {
    pub inside: String,
    pub outside: Option<PathBuf>,
    pub options: String,
}

/// The outcome of a non-blocking [`Sandbox::execute_without_std`] call: the
/// caller owns the child and must eventually drain/wait on it (directly, or
/// via [`Sandbox::wait_and_drain`]).
pub enum Execution {
    /// `wait = true` was requested: the sandbox already waited and drained
    /// for you. The bool means "the helper itself did not fail" — it says
    /// nothing about whether the inner process succeeded.
    Done(bool),
    /// `wait = false`: here is the live child.
    Handle(std::process::Child),
}

pub struct Sandbox {
    runner: Arc<dyn SandboxRunner>,
    cacher: Arc<dyn FileCacher>,
    tag: Option<String>,
    id: u32,
    outer_dir: PathBuf,
    home_dir: PathBuf,
    exec_num: u32,
    meta: HashMap<String, Vec<String>>,
    last_helper_exit_code: Option<i32>,
    /// Meta path and start time of an in-flight asynchronous execution,
    /// set by `execute_without_std(.., wait=false)` and consumed by
    /// `finish_async_execution` once the caller has waited on the child.
    pending: Option<(PathBuf, Instant)>,

    pub stdin_file: Option<String>,
    pub stdout_file: Option<String>,
    pub stderr_file: Option<String>,

    pub timeout: Option<f64>,
    pub wallclock_timeout: Option<f64>,
    pub extra_time: f64,
    pub address_space_kib: Option<u64>,
    pub stack_kib: Option<u64>,
    pub fsize_kib: Option<u64>,
    pub max_processes: u32,
    pub chdir: String,
    pub preserve_env: bool,
    pub set_env: Vec<(String, String)>,
    pub dirs: Vec<DirMapping>,

    consumed: bool,
}

impl Sandbox {
    /// Allocate a box id for this process/shard, create its `home`
    /// directory and issue the helper's `--init`.
    pub fn new(
        runner: Arc<dyn SandboxRunner>,
        cacher: Arc<dyn FileCacher>,
        config: &Config,
        tag: Option<&str>,
    ) -> anyhow::Result<Sandbox> {
        let id = alloc::next_box_id(config.shard);
        let outer_dir = runner.init(id).map_err(|e| anyhow!("sandbox creation failed: {e}"))?;
        let home_dir = outer_dir.join("box");
        fs::create_dir_all(&home_dir)?;

        log::debug!("sandbox {id} initialized (tag={tag:?})");

        Ok(Sandbox {
            runner,
            cacher,
            tag: tag.map(str::to_string),
            id,
            outer_dir,
            home_dir,
            exec_num: 0,
            meta: HashMap::new(),
            last_helper_exit_code: None,
            pending: None,
            stdin_file: None,
            stdout_file: None,
            stderr_file: None,
            timeout: None,
            wallclock_timeout: None,
            extra_time: 0.0,
            address_space_kib: None,
            stack_kib: None,
            fsize_kib: Some(config.trusted_sandbox_max_memory_kib.0 as u64),
            max_processes: 1,
            chdir: "/box".to_string(),
            preserve_env: false,
            set_env: Vec::new(),
            dirs: Vec::new(),
            consumed: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn outer_dir(&self) -> &Path {
        &self.outer_dir
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn resolve(&self, filename: &str) -> PathBuf {
        self.home_dir.join(filename)
    }

    pub fn file_exists(&self, filename: &str) -> bool {
        self.resolve(filename).exists()
    }

    pub fn create_file_from_bytes(&self, filename: &str, bytes: &[u8], executable: bool) -> anyhow::Result<()> {
        let path = self.resolve(filename);
        fs::write(&path, bytes).map_err(|e| anyhow!("failed to stage {filename} into sandbox: {e}"))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(if executable { 0o755 } else { 0o644 }))?;
        Ok(())
    }

    pub fn create_file_from_digest(&self, filename: &str, digest: &Digest, executable: bool) -> anyhow::Result<()> {
        let bytes = self.cacher.get_file(digest)?;
        self.create_file_from_bytes(filename, &bytes, executable)
    }

    /// Read a file back out of the sandbox, truncated to `max_bytes` (or a
    /// generous default when `None`).
    pub fn get_file_to_bytes(&self, filename: &str, max_bytes: Option<u64>) -> anyhow::Result<Vec<u8>> {
        let path = self.resolve(filename);
        let file = fs::File::open(&path).map_err(|e| anyhow!("cannot read {filename} from sandbox: {e}"))?;
        let max = max_bytes.unwrap_or(64 * 1024 * 1024);
        truncator::read_truncated(file, max).map_err(|e| anyhow!("truncated read of {filename} failed: {e}"))
    }

    pub fn get_file_text(&self, filename: &str, max_bytes: Option<u64>) -> anyhow::Result<String> {
        let bytes = self.get_file_to_bytes(filename, max_bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn get_file_to_digest(&self, filename: &str, description: &str, max_bytes: Option<u64>) -> anyhow::Result<Digest> {
        let bytes = self.get_file_to_bytes(filename, max_bytes)?;
        self.cacher.put_file(&bytes, description)
    }

    pub fn delete_file(&self, filename: &str) -> anyhow::Result<()> {
        fs::remove_file(self.resolve(filename)).map_err(Into::into)
    }

    /// Bind-mount an extra directory into the sandbox.
    pub fn add_mapped_directory(&mut self, inside: &str, outside: Option<PathBuf>, options: &str, ignore_missing: bool) {
        if ignore_missing {
            if let Some(outside) = &outside {
                if !outside.exists() {
                    return;
                }
            }
        }
        self.dirs.push(DirMapping { inside: inside.to_string(), outside, options: options.to_string() });
    }

    /// Restrict writes during the next run to the given inner paths.
    /// Paths that escape the home directory are silently ignored, matching
    /// the reference's defensive behavior around admin-authored configs.
    pub fn allow_writing_only(&mut self, inner_paths: &[&str]) {
        let safe: Vec<String> = inner_paths
            .iter()
            .filter(|p| !p.contains(".."))
            .map(|p| p.to_string())
            .collect();
        self.dirs.retain(|d| d.inside != "/box/rw-allowlist");
        self.dirs.push(DirMapping {
            inside: "/box/rw-allowlist".to_string(),
            outside: None,
            options: format!("writable={}", safe.join(",")),
        });
    }

    fn build_argv(&self, command: &[String], meta_path: &Path) -> Vec<String> {
        let mut argv = vec!["-b".to_string(), self.id.to_string(), "--cg".to_string(), "--run".to_string()];
        argv.push(format!("--meta={}", meta_path.display()));
        argv.push(format!("--chdir={}", self.chdir));
        argv.push(format!("--processes={}", self.max_processes));

        if let Some(t) = self.timeout {
            argv.push(format!("--time={t}"));
        }
        if let Some(t) = self.wallclock_timeout {
            argv.push(format!("--wall-time={t}"));
        }
        if self.extra_time > 0.0 {
            argv.push(format!("--extra-time={}", self.extra_time));
        }
        if let Some(kib) = self.address_space_kib {
            argv.push(format!("--cg-mem={kib}"));
        }
        if let Some(kib) = self.stack_kib {
            argv.push(format!("--stack={kib}"));
        }
        if let Some(kib) = self.fsize_kib {
            argv.push(format!("--fsize={kib}"));
        }
        if self.preserve_env {
            argv.push("--full-env".to_string());
        }
        for (k, v) in &self.set_env {
            argv.push(format!("--env={k}={v}"));
        }
        for dir in &self.dirs {
            let spec = match &dir.outside {
                Some(outside) => format!("{}={}:{}", dir.inside, outside.display(), dir.options),
                None => format!("{}:{}", dir.inside, dir.options),
            };
            argv.push(format!("--dir={spec}"));
        }
        if let Some(f) = &self.stdin_file {
            argv.push(format!("--stdin={f}"));
        }
        if let Some(f) = &self.stdout_file {
            argv.push(format!("--stdout={f}"));
        }
        if let Some(f) = &self.stderr_file {
            argv.push(format!("--stderr={f}"));
        }

        argv.push("--".to_string());
        argv.extend(command.iter().cloned());
        argv
    }

    fn append_commands_log(&self, argv: &[String]) -> anyhow::Result<()> {
        use std::io::Write;
        let mut log = fs::OpenOptions::new().create(true).append(true).open(self.outer_dir.join("commands.log"))?;
        writeln!(log, "{}", argv.join(" "))?;
        Ok(())
    }

    /// Run `command`, piping the helper's own stdio. When `wait` is true the
    /// sandbox drains and waits for you and returns whether the helper
    /// itself ran without a protocol failure; when false you get the live
    /// child back and must drain/wait on it yourself.
    pub fn execute_without_std(&mut self, command: &[String], wait: bool) -> anyhow::Result<Execution> {
        if let Some(direct) = self.try_run_secure_command(command)? {
            return Ok(Execution::Done(direct));
        }

        self.exec_num += 1;
        let meta_path = self.outer_dir.join(format!("run.log.{}", self.exec_num));
        let argv = self.build_argv(command, &meta_path);
        self.append_commands_log(&argv)?;

        let start = Instant::now();
        let mut child = self.runner.spawn(&argv)?;
        drop(child.stdin.take());

        if !wait {
            self.pending = Some((meta_path, start));
            return Ok(Execution::Handle(child));
        }

        let mut children = vec![child];
        let mut statuses = drain::wait_and_drain(&mut children)?;
        let helper_status = statuses.remove(0);
        self.runner.write_meta_after_run(self.id, &meta_path, helper_status, start.elapsed().as_secs_f64())?;
        self.meta = meta::parse_meta_file(&meta_path)?;

        let exit_code = helper_status.code().unwrap_or(-1);
        self.last_helper_exit_code = Some(exit_code);
        match exit_code {
            0 | 1 => Ok(Execution::Done(true)),
            2 => Ok(Execution::Done(false)),
            other => bail!("sandbox helper exited with unexpected status {other}"),
        }
    }

    /// Complete an asynchronous execution started with
    /// `execute_without_std(.., wait=false)`, once the caller has drained
    /// and waited on the child itself (typically alongside other sandboxes'
    /// children, via `Sandbox::wait_and_drain`). Returns whether the helper
    /// itself ran without a protocol failure, exactly like the synchronous
    /// path.
    pub fn finish_async_execution(&mut self, status: std::process::ExitStatus) -> anyhow::Result<bool> {
        let (meta_path, start) =
            self.pending.take().ok_or_else(|| anyhow!("no asynchronous execution is pending on this sandbox"))?;
        self.runner.write_meta_after_run(self.id, &meta_path, status, start.elapsed().as_secs_f64())?;
        self.meta = meta::parse_meta_file(&meta_path)?;

        let exit_code = status.code().unwrap_or(-1);
        self.last_helper_exit_code = Some(exit_code);
        match exit_code {
            0 | 1 => Ok(true),
            2 => Ok(false),
            other => bail!("sandbox helper exited with unexpected status {other}"),
        }
    }

    /// Whitelisted host commands (staging graders/managers/checkers) run
    /// directly, bypassing the helper. Returns `None` when `command` isn't
    /// one of those. The home directory is temporarily widened so the
    /// command can create files owned by the invoking uid, then restored,
    /// and a synthetic meta log is written so stats extraction stays
    /// uniform regardless of which path ran the command.
    fn try_run_secure_command(&mut self, command: &[String]) -> anyhow::Result<Option<bool>> {
        let Some(program) = command.first() else { return Ok(None) };
        if !SECURE_COMMANDS.contains(&program.as_str()) {
            return Ok(None);
        }

        fs::set_permissions(&self.home_dir, fs::Permissions::from_mode(0o700))?;
        let result = std::process::Command::new(program).args(&command[1..]).current_dir(&self.home_dir).status();
        fs::set_permissions(&self.home_dir, fs::Permissions::from_mode(0o750))?;
        let status = result.map_err(|e| anyhow!("failed to run secure command {program}: {e}"))?;

        self.exec_num += 1;
        let meta_path = self.outer_dir.join(format!("run.log.{}", self.exec_num));
        fs::write(&meta_path, "time:0.000\ntime-wall:0.000\n")?;
        self.meta = meta::parse_meta_file(&meta_path)?;

        Ok(Some(status.success()))
    }

    /// Wait on a set of children (possibly belonging to several sandboxes,
    /// as in Communication), draining their stdio first so a chatty child
    /// can't deadlock the others.
    pub fn wait_and_drain(children: &mut [std::process::Child]) -> anyhow::Result<Vec<std::process::ExitStatus>> {
        drain::wait_and_drain(children)
    }

    pub fn ensure_meta_loaded(&mut self) -> anyhow::Result<()> {
        if self.meta.is_empty() && self.exec_num > 0 {
            let path = self.outer_dir.join(format!("run.log.{}", self.exec_num));
            self.meta = meta::parse_meta_file(&path)?;
        }
        Ok(())
    }

    pub fn exit_status(&self) -> anyhow::Result<ExitStatus> {
        meta::exit_status(&self.meta)
    }

    pub fn killing_signal(&self) -> anyhow::Result<i32> {
        meta::killing_signal(&self.meta)
    }

    pub fn cpu_time(&self) -> anyhow::Result<Option<f64>> {
        meta::cpu_time(&self.meta)
    }

    pub fn wall_time(&self) -> anyhow::Result<Option<f64>> {
        meta::wall_time(&self.meta)
    }

    pub fn memory_used(&self) -> anyhow::Result<Option<u64>> {
        meta::memory_used_bytes(&self.meta)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.meta.get("exitcode").and_then(|v| v.first()).and_then(|v| v.parse().ok())
    }

    pub fn status_list(&self) -> Vec<String> {
        self.meta.get("status").cloned().unwrap_or_default()
    }

    pub fn last_helper_exit_code(&self) -> Option<i32> {
        self.last_helper_exit_code
    }

    pub fn human_exit_description(&self) -> String {
        match self.exit_status() {
            Ok(ExitStatus::Ok) => "completed normally".to_string(),
            Ok(ExitStatus::NonzeroReturn) => format!("exited with code {}", self.exit_code().unwrap_or(-1)),
            Ok(ExitStatus::Timeout) => "exceeded the CPU time limit".to_string(),
            Ok(ExitStatus::TimeoutWall) => "exceeded the wall clock time limit".to_string(),
            Ok(ExitStatus::Signal) => format!("killed by signal {}", self.killing_signal().unwrap_or(-1)),
            Ok(ExitStatus::MemoryLimit) => "exceeded the memory limit".to_string(),
            Ok(ExitStatus::SandboxError) => "sandbox reported an internal error".to_string(),
            Err(e) => format!("unknown sandbox outcome: {e}"),
        }
    }

    /// Mark the sandbox as already cleaned up, so `Drop` doesn't try again.
    pub fn mark_consumed(&mut self) {
        self.consumed = true;
    }

    /// Tear down the sandbox. With `delete = true`, widen permissions on
    /// the home directory first (so files the contestant uid created don't
    /// block removal), issue the helper's `--cleanup`, then remove the
    /// outer directory. With `delete = false`, only issue `--cleanup`: the
    /// directory tree is left on disk for inspection.
    pub fn cleanup(&mut self, delete: bool) -> anyhow::Result<()> {
        if self.consumed {
            return Ok(());
        }
        if delete {
            let _ = fs::set_permissions(&self.home_dir, fs::Permissions::from_mode(0o777));
        }
        self.runner.cleanup(self.id)?;
        if delete {
            let _ = fs::remove_dir_all(&self.outer_dir);
        }
        self.consumed = true;
        Ok(())
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if !self.consumed {
            if let Err(e) = self.runner.cleanup(self.id) {
                log::error!("sandbox {} failed to clean up: {e}", self.id);
            }
        }
    }
}
