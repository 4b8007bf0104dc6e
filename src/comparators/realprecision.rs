//! Fixed-point decimal comparison with a relative/absolute tolerance.
//!
//! Supplements whitediff for tasks whose correct answer is a sequence of
//! real numbers where exact textual equality is too strict. Not part of
//! the task-type parameter schema (that stays the two-valued
//! `{"diff", "comparator"}` choice) — a library-level comparator a
//! checker-less configuration path can use directly.

const EPS: f64 = 1e-6;

fn extract_fixed_decimals(bytes: &[u8]) -> Vec<f64> {
    let text = String::from_utf8_lossy(bytes);
    let mut out = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let start = i;
        let mut j = i;
        if chars[j] == '+' || chars[j] == '-' {
            j += 1;
        }
        let digits_start = j;
        while j < chars.len() && chars[j].is_ascii_digit() {
            j += 1;
        }
        let had_int_digits = j > digits_start;
        let mut had_frac_digits = false;
        if j < chars.len() && chars[j] == '.' {
            let dot = j;
            j += 1;
            let frac_start = j;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            had_frac_digits = j > frac_start;
            if !had_int_digits && !had_frac_digits {
                j = dot;
            }
        }
        if had_int_digits || had_frac_digits {
            let token: String = chars[start..j].iter().collect();
            if let Ok(value) = token.parse::<f64>() {
                out.push(value);
            }
            i = j.max(start + 1);
        } else {
            i = start + 1;
        }
    }
    out
}

fn compare_real_pair(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPS * 1.0_f64.max(a.abs()).max(b.abs())
}

/// Equal iff both sides produce the same number of fixed-point tokens and
/// every pair compares within tolerance.
pub fn real_precision_diff(output: &[u8], correct: &[u8]) -> bool {
    let a = extract_fixed_decimals(output);
    let b = extract_fixed_decimals(correct);
    a.len() == b.len() && a.iter().zip(&b).all(|(&x, &y)| compare_real_pair(x, y))
}
