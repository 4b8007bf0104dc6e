//! Token-normalized, trailing-blank-tolerant text comparison.

const WHITESPACE: &[u8] = b" \t\n\x0b\x0c\r";

/// Collapse every whitespace run to a single space, drop empty tokens,
/// rejoin with single spaces.
pub fn canonicalize_line(line: &[u8]) -> String {
    let replaced: Vec<u8> = line.iter().map(|&b| if WHITESPACE.contains(&b) { b' ' } else { b }).collect();
    let text = String::from_utf8_lossy(&replaced);
    text.split(' ').filter(|tok| !tok.is_empty()).collect::<Vec<_>>().join(" ")
}

fn lines_of(bytes: &[u8]) -> Vec<&[u8]> {
    bytes.split(|&b| b == b'\n').collect()
}

/// Two streams match iff, after stripping trailing all-whitespace lines,
/// the canonicalized line sequences are equal.
pub fn white_diff(output: &[u8], correct: &[u8]) -> bool {
    let mut output_lines = lines_of(output).into_iter();
    let mut correct_lines = lines_of(correct).into_iter();

    loop {
        let a = output_lines.next();
        let b = correct_lines.next();
        match (a, b) {
            (None, None) => return true,
            (Some(a), None) => {
                if !canonicalize_line(a).is_empty() {
                    return false;
                }
                if !output_lines.all(|l| canonicalize_line(l).is_empty()) {
                    return false;
                }
                return true;
            }
            (None, Some(b)) => {
                if !canonicalize_line(b).is_empty() {
                    return false;
                }
                if !correct_lines.all(|l| canonicalize_line(l).is_empty()) {
                    return false;
                }
                return true;
            }
            (Some(a), Some(b)) => {
                if canonicalize_line(a) != canonicalize_line(b) {
                    return false;
                }
            }
        }
    }
}
