use serde::{Deserialize, Serialize};

pub const DEFAULT_FLOAT_TOLERANCE: f64 = 1e-6;

/// How expected and actual output are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    /// Byte-for-byte equality
    Exact,
    /// Ignores trailing spaces and boundary blank lines, and compares
    /// numeric tokens within a tolerance
    #[default]
    Tolerant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub passed: bool,
    /// Location of the first mismatch, empty when passed
    pub hint: String,
}

impl Comparison {
    fn pass() -> Self {
        Self {
            passed: true,
            hint: String::new(),
        }
    }

    fn fail(hint: String) -> Self {
        Self {
            passed: false,
            hint,
        }
    }
}

pub fn compare(expected: &str, actual: &str, mode: CompareMode, tolerance: f64) -> Comparison {
    match mode {
        CompareMode::Exact if expected == actual => Comparison::pass(),
        CompareMode::Exact => Comparison::fail(String::new()),
        CompareMode::Tolerant => compare_tolerant(expected, actual, tolerance),
    }
}

fn compare_tolerant(expected: &str, actual: &str, tolerance: f64) -> Comparison {
    let expected_lines = normalize_lines(expected);
    let actual_lines = normalize_lines(actual);
    if expected_lines.len() != actual_lines.len() {
        return Comparison::fail(format!(
            "line_count expected={} actual={}",
            expected_lines.len(),
            actual_lines.len()
        ));
    }

    for (i, (e, a)) in expected_lines.iter().zip(&actual_lines).enumerate() {
        let line = i + 1;
        let e_tokens: Vec<&str> = e.split_whitespace().collect();
        let a_tokens: Vec<&str> = a.split_whitespace().collect();
        if e_tokens.len() != a_tokens.len() {
            return Comparison::fail(format!(
                "line {line}: token_count expected={} actual={}",
                e_tokens.len(),
                a_tokens.len()
            ));
        }

        for (j, (et, at)) in e_tokens.iter().zip(&a_tokens).enumerate() {
            let token = j + 1;
            match (et.parse::<f64>(), at.parse::<f64>()) {
                (Ok(e_num), Ok(a_num)) => {
                    // NaN never matches; equal infinities do
                    let within = e_num == a_num || (e_num - a_num).abs() <= tolerance;
                    if !within {
                        return Comparison::fail(format!(
                            "line {line} token {token}: |{e_num}-{a_num}|>{tolerance}"
                        ));
                    }
                }
                _ => {
                    if et != at {
                        return Comparison::fail(format!(
                            "line {line} token {token}: '{et}'!='{at}'"
                        ));
                    }
                }
            }
        }
    }

    Comparison::pass()
}

/// Right-trims every line and drops blank lines at both ends
fn normalize_lines(s: &str) -> Vec<&str> {
    let lines: Vec<&str> = s.lines().map(str::trim_end).collect();
    let start = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.is_empty()).map_or(start, |i| i + 1);
    lines[start..end].to_vec()
}
