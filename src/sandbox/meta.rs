//! Parsing of the helper's `--meta` log file into a flat multimap, and the
//! classification rules that turn it into a [`crate::stats::ExitStatus`].

use std::collections::HashMap;
use std::path::Path;

use crate::stats::ExitStatus;

/// The helper writes one `key:value` pair per line; a key may legitimately
/// repeat (e.g. multiple `message:` lines), so every key maps to a vector.
pub fn parse_meta_file(path: &Path) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for line in content.lines() {
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        map.entry(key.to_string()).or_default().push(value.to_string());
    }
    Ok(map)
}

fn first<'a>(meta: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    meta.get(key).and_then(|v| v.first()).map(String::as_str)
}

/// Classify a run from its meta log. Absence of a `status` key means the
/// sandboxed process ran to completion and exited zero.
pub fn exit_status(meta: &HashMap<String, Vec<String>>) -> anyhow::Result<ExitStatus> {
    match first(meta, "status") {
        None => Ok(ExitStatus::Ok),
        Some("RE") => Ok(ExitStatus::NonzeroReturn),
        Some("TO") => {
            let timed_out_wall = meta
                .get("message")
                .map(|lines| lines.iter().any(|m| m.contains("wall")))
                .unwrap_or(false);
            if timed_out_wall {
                Ok(ExitStatus::TimeoutWall)
            } else {
                Ok(ExitStatus::Timeout)
            }
        }
        Some("SG") => {
            if meta.contains_key("cg-oom-killed") {
                Ok(ExitStatus::MemoryLimit)
            } else {
                Ok(ExitStatus::Signal)
            }
        }
        Some("XX") => Ok(ExitStatus::SandboxError),
        Some(other) => Err(anyhow::anyhow!("unrecognized sandbox status {other:?}")),
    }
}

pub fn killing_signal(meta: &HashMap<String, Vec<String>>) -> anyhow::Result<i32> {
    first(meta, "exitsig")
        .ok_or_else(|| anyhow::anyhow!("no exitsig in meta log for a signaled run"))?
        .parse()
        .map_err(|e| anyhow::anyhow!("malformed exitsig in meta log: {e}"))
}

pub fn cpu_time(meta: &HashMap<String, Vec<String>>) -> anyhow::Result<Option<f64>> {
    first(meta, "time").map(|v| v.parse::<f64>().map_err(|e| anyhow::anyhow!("malformed time: {e}"))).transpose()
}

pub fn wall_time(meta: &HashMap<String, Vec<String>>) -> anyhow::Result<Option<f64>> {
    first(meta, "time-wall")
        .map(|v| v.parse::<f64>().map_err(|e| anyhow::anyhow!("malformed time-wall: {e}")))
        .transpose()
}

pub fn memory_used_bytes(meta: &HashMap<String, Vec<String>>) -> anyhow::Result<Option<u64>> {
    let kib = first(meta, "cg-mem").or_else(|| first(meta, "max-rss"));
    kib.map(|v| v.parse::<u64>().map(|kib| kib * 1024).map_err(|e| anyhow::anyhow!("malformed memory field: {e}")))
        .transpose()
}
