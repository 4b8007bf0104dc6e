//! Parsing the conventional (stdout, stderr) pair produced by a checker or
//! a Communication manager into an (outcome, text) result.

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("").trim()
}

/// Mirrors the original's `[\x00-\x08\x0a-\x1f\x7f-\xbf]` rejection range:
/// wider than Unicode's `Cc` category (`char::is_control`), which stops at
/// U+009F and would silently accept Latin-1 supplement characters like `§`
/// (U+00A7) the original rejects.
fn has_control_characters(s: &str) -> bool {
    s.chars().any(|c| {
        let cp = c as u32;
        (0x00..=0x08).contains(&cp) || (0x0a..=0x1f).contains(&cp) || (0x7f..=0xbf).contains(&cp)
    })
}

fn translate(message: &str) -> Option<&'static str> {
    match message {
        "translate:success" => Some("Output is correct"),
        "translate:partial" => Some("Output is partially correct"),
        "translate:wrong" => Some("Output isn't correct"),
        _ => None,
    }
}

/// Parse a checker's (stdout, stderr) into `(outcome, text)`. Returns an
/// error for anything that isn't a well-formed float on stdout or contains
/// forbidden control characters on stderr — an admin-facing fault, not a
/// contestant one.
pub fn parse_checker_output(stdout: &str, stderr: &str) -> anyhow::Result<(f64, String)> {
    let outcome_line = first_line(stdout);
    let outcome: f64 = outcome_line
        .parse()
        .map_err(|e| anyhow::anyhow!("checker stdout {outcome_line:?} is not a valid outcome: {e}"))?;

    let message = first_line(stderr);
    if has_control_characters(message) {
        anyhow::bail!("checker stderr contains forbidden control characters");
    }
    let escaped = message.replace('%', "%%");
    let text = translate(&escaped).map(str::to_string).unwrap_or(escaped);

    Ok((outcome, text))
}
