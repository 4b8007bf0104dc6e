//! Ambient configuration for the grading core: sandbox scratch space,
//! retention policy, and the resource caps applied to trusted/compilation
//! commands that aren't dictated by a task's own parameters.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct MicroSecond(pub u32);

#[derive(Deserialize, Debug, PartialEq, PartialOrd, Clone, Copy)]
pub struct Second(pub f64);

impl From<MicroSecond> for Second {
    fn from(value: MicroSecond) -> Self {
        Second(value.0 as f64 / 1_000_000.0)
    }
}

impl From<Second> for MicroSecond {
    fn from(value: Second) -> Self {
        MicroSecond((value.0 * 1_000_000.0) as u32)
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct KiloByte(pub u32);

impl KiloByte {
    pub fn as_bytes(self) -> u64 {
        self.0 as u64 * 1024
    }
}

/// Process-wide configuration for everything the grading core itself
/// controls (sandboxing, retention, default resource caps). Task- and
/// testcase-specific limits (time/memory limits for the submission under
/// test) come from the job, not from here.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Root directory under which per-sandbox scratch directories are
    /// created. Each sandbox gets its own subdirectory named after its box
    /// id.
    pub sandbox_root: PathBuf,

    /// Path to the external sandbox helper binary (`isolate`).
    #[serde(default = "default_isolate_path")]
    pub isolate_path: PathBuf,

    /// Never delete sandbox directories after use, regardless of outcome.
    /// Intended for debugging a failing grading run.
    #[serde(default)]
    pub keep_sandbox: bool,

    /// This worker's shard index, used by the box id allocator so that
    /// concurrent workers on the same machine never collide on a box id.
    #[serde(default)]
    pub shard: u32,

    /// Default wall-clock cap, in seconds, applied to a trusted step when
    /// the caller doesn't specify one explicitly (used as the floor for
    /// Communication's manager CPU limit, see `tasktypes::communication`).
    pub trusted_sandbox_max_time_s: f64,

    /// Default memory cap, in kilobytes, applied to trusted steps (the
    /// Communication manager, post-run conversion helpers).
    pub trusted_sandbox_max_memory_kib: KiloByte,

    /// Max processes allowed inside a trusted step's sandbox.
    #[serde(default = "default_trusted_processes")]
    pub trusted_sandbox_max_processes: u32,

    /// CPU time cap, in seconds, applied to compilation commands.
    pub compilation_sandbox_max_time_s: f64,

    /// Memory cap, in kilobytes, applied to compilation commands.
    pub compilation_sandbox_max_memory_kib: KiloByte,

    /// Max processes allowed inside a compilation sandbox (toolchains like
    /// to fork helper processes).
    #[serde(default = "default_compilation_processes")]
    pub compilation_sandbox_max_processes: u32,

    /// Largest file the sandbox will hand back from `get_file_to_bytes`
    /// before truncating (see `sandbox::truncator`).
    pub max_file_size_bytes: u64,
}

fn default_trusted_processes() -> u32 {
    1000
}

fn default_compilation_processes() -> u32 {
    1000
}

fn default_isolate_path() -> PathBuf {
    PathBuf::from("/usr/bin/isolate")
}

impl Config {
    pub fn from_reader<R: std::io::Read>(reader: R) -> std::io::Result<Config> {
        serde_json::from_reader(reader).map_err(std::io::Error::from)
    }

    pub fn load(path: &std::path::Path) -> std::io::Result<Config> {
        let file = std::fs::File::open(path)?;
        Config::from_reader(std::io::BufReader::new(file))
    }
}

/// A fully-populated `Config` for tests elsewhere in the crate, so every
/// module's test doesn't have to restate every field.
#[cfg(test)]
pub(crate) fn test_config(sandbox_root: std::path::PathBuf) -> Config {
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
