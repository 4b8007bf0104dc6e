//! `white_diff_step`: the no-checker-needed comparison shortcut.

use crate::comparators::whitediff::white_diff;
use crate::sandbox::Sandbox;
use crate::steps::messages::default_messages;

/// Compare `output_name` against `correct_output_name` inside `sandbox`
/// with whitediff. A missing user output short-circuits to `(0.0,
/// [no-output-message, filename])`; otherwise `(1.0 or 0.0, [message])`.
pub fn white_diff_step(sandbox: &Sandbox, output_name: &str, correct_output_name: &str) -> anyhow::Result<(f64, Vec<String>)> {
    let messages = default_messages();
    if !sandbox.file_exists(output_name) {
        return Ok((0.0, vec![messages.get("no_output")?.message.to_string(), output_name.to_string()]));
    }

    let output = sandbox.get_file_to_bytes(output_name, None)?;
    let correct = sandbox.get_file_to_bytes(correct_output_name, None)?;
    let equal = white_diff(&output, &correct);
    let key = if equal { "output_correct" } else { "output_wrong" };
    Ok((if equal { 1.0 } else { 0.0 }, vec![messages.get(key)?.message.to_string()]))
}
