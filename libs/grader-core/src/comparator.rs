/// Output Comparator - Pass/Fail Decision per Comparison Mode
///
/// **Modes:**
/// - `Exact`: CRLF → LF, trim, string equality
/// - `WhitespaceFlexible`: every whitespace run collapsed to one space
/// - `NumericTolerance`: both sides parse as f64, `|a - e| <= tolerance`
/// - `LineByLine`: line counts must match, trimmed lines compared pairwise
/// - `TokenBased`: token counts must match, tokens compared positionally
/// - `Array`: JSON arrays (or whitespace tokens) compared by deep equality
/// - `NumericLineByLine`: line counts must match, per-line numeric tolerance
///
/// **Properties:**
/// - Never panics, never returns an error: malformed output is a failed
///   `ComparisonResult` with its `error` field set
/// - Knows nothing about execution or persistence

use grader_common::types::{ComparisonKind, ComparisonResult, Mismatch};
use serde_json::Value;

/// A comparison mode with the parameters its case needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComparisonMode {
    Exact,
    WhitespaceFlexible,
    NumericTolerance { tolerance: f64 },
    LineByLine,
    TokenBased,
    Array,
    NumericLineByLine { tolerance: f64 },
}

impl ComparisonMode {
    /// Build a mode from a stored tag and the test case's tolerance.
    pub fn resolve(kind: ComparisonKind, tolerance: f64) -> Self {
        match kind {
            ComparisonKind::Exact => ComparisonMode::Exact,
            ComparisonKind::WhitespaceFlexible => ComparisonMode::WhitespaceFlexible,
            ComparisonKind::NumericTolerance => ComparisonMode::NumericTolerance { tolerance },
            ComparisonKind::LineByLine => ComparisonMode::LineByLine,
            ComparisonKind::TokenBased => ComparisonMode::TokenBased,
            ComparisonKind::Array => ComparisonMode::Array,
            ComparisonKind::NumericLineByLine => ComparisonMode::NumericLineByLine { tolerance },
        }
    }

    pub fn kind(&self) -> ComparisonKind {
        match self {
            ComparisonMode::Exact => ComparisonKind::Exact,
            ComparisonMode::WhitespaceFlexible => ComparisonKind::WhitespaceFlexible,
            ComparisonMode::NumericTolerance { .. } => ComparisonKind::NumericTolerance,
            ComparisonMode::LineByLine => ComparisonKind::LineByLine,
            ComparisonMode::TokenBased => ComparisonKind::TokenBased,
            ComparisonMode::Array => ComparisonKind::Array,
            ComparisonMode::NumericLineByLine { .. } => ComparisonKind::NumericLineByLine,
        }
    }
}

/// Compare program output against the expected output.
pub fn compare(actual: &str, expected: &str, mode: &ComparisonMode) -> ComparisonResult {
    match *mode {
        ComparisonMode::Exact => exact(actual, expected),
        ComparisonMode::WhitespaceFlexible => whitespace_flexible(actual, expected),
        ComparisonMode::NumericTolerance { tolerance } => {
            numeric_tolerance(actual, expected, tolerance)
        }
        ComparisonMode::LineByLine => line_by_line(actual, expected),
        ComparisonMode::TokenBased => token_based(actual, expected),
        ComparisonMode::Array => array(actual, expected),
        ComparisonMode::NumericLineByLine { tolerance } => {
            numeric_line_by_line(actual, expected, tolerance)
        }
    }
}

fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n").trim().to_string()
}

pub fn exact(actual: &str, expected: &str) -> ComparisonResult {
    let actual = normalize_line_endings(actual);
    let expected = normalize_line_endings(expected);
    ComparisonResult::new(ComparisonKind::Exact, actual == expected, actual, expected)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn whitespace_flexible(actual: &str, expected: &str) -> ComparisonResult {
    let actual = collapse_whitespace(actual);
    let expected = collapse_whitespace(expected);
    ComparisonResult::new(
        ComparisonKind::WhitespaceFlexible,
        actual == expected,
        actual,
        expected,
    )
}

/// Strict numeric parse of the whole trimmed text. NaN is rejected.
fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| !n.is_nan())
}

pub fn numeric_tolerance(actual: &str, expected: &str, tolerance: f64) -> ComparisonResult {
    let (actual_num, expected_num) = match (parse_number(actual), parse_number(expected)) {
        (Some(a), Some(e)) => (a, e),
        _ => {
            return ComparisonResult::failure(
                ComparisonKind::NumericTolerance,
                actual.trim(),
                expected.trim(),
                "Non-numeric output",
            )
        }
    };

    let difference = (actual_num - expected_num).abs();
    ComparisonResult {
        difference: Some(difference),
        tolerance: Some(tolerance),
        ..ComparisonResult::new(
            ComparisonKind::NumericTolerance,
            difference <= tolerance,
            actual_num.to_string(),
            expected_num.to_string(),
        )
    }
}

fn trimmed_lines(s: &str) -> Vec<&str> {
    s.trim().split('\n').map(str::trim).collect()
}

pub fn line_by_line(actual: &str, expected: &str) -> ComparisonResult {
    let actual_lines = trimmed_lines(actual);
    let expected_lines = trimmed_lines(expected);
    let actual_text = actual_lines.join("\n");
    let expected_text = expected_lines.join("\n");

    if actual_lines.len() != expected_lines.len() {
        return ComparisonResult::failure(
            ComparisonKind::LineByLine,
            actual_text,
            expected_text,
            format!(
                "Line count mismatch: {} vs {}",
                actual_lines.len(),
                expected_lines.len()
            ),
        );
    }

    let mismatches = positional_mismatches(&actual_lines, &expected_lines);
    settle(ComparisonResult {
        mismatches,
        ..ComparisonResult::new(ComparisonKind::LineByLine, true, actual_text, expected_text)
    })
}

pub fn token_based(actual: &str, expected: &str) -> ComparisonResult {
    let actual_tokens: Vec<&str> = actual.split_whitespace().collect();
    let expected_tokens: Vec<&str> = expected.split_whitespace().collect();
    let actual_text = actual_tokens.join(" ");
    let expected_text = expected_tokens.join(" ");

    if actual_tokens.len() != expected_tokens.len() {
        return ComparisonResult::failure(
            ComparisonKind::TokenBased,
            actual_text,
            expected_text,
            format!(
                "Token count mismatch: {} vs {}",
                actual_tokens.len(),
                expected_tokens.len()
            ),
        );
    }

    let mismatches = positional_mismatches(&actual_tokens, &expected_tokens);
    settle(ComparisonResult {
        mismatches,
        ..ComparisonResult::new(ComparisonKind::TokenBased, true, actual_text, expected_text)
    })
}

fn positional_mismatches(actual: &[&str], expected: &[&str]) -> Vec<Mismatch> {
    actual
        .iter()
        .zip(expected)
        .enumerate()
        .filter(|(_, (a, e))| a != e)
        .map(|(idx, (a, e))| Mismatch {
            position: idx + 1,
            actual: a.to_string(),
            expected: e.to_string(),
            difference: None,
            error: None,
        })
        .collect()
}

/// Pass iff no error and no mismatches were recorded.
fn settle(mut result: ComparisonResult) -> ComparisonResult {
    result.passed = result.error.is_none() && result.mismatches.is_empty();
    result
}

/// Whitespace tokens, each coerced to a number where it reads as one.
fn token_values(s: &str) -> Value {
    Value::Array(
        s.split_whitespace()
            .map(|token| {
                if let Ok(i) = token.parse::<i64>() {
                    Value::from(i)
                } else {
                    token
                        .parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                        .unwrap_or_else(|| Value::String(token.to_string()))
                }
            })
            .collect(),
    )
}

/// Parse both sides as JSON; if either fails, both fall back to whitespace tokens.
fn parse_array_pair(actual: &str, expected: &str) -> (Value, Value) {
    let parsed = (
        serde_json::from_str::<Value>(actual.trim()),
        serde_json::from_str::<Value>(expected.trim()),
    );
    match parsed {
        (Ok(a), Ok(e)) => (a, e),
        _ => (token_values(actual), token_values(expected)),
    }
}

/// Structural equality where numbers compare by value (1 == 1.0).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

pub fn array(actual: &str, expected: &str) -> ComparisonResult {
    let (actual_value, expected_value) = parse_array_pair(actual, expected);

    let (actual_items, expected_items) = match (&actual_value, &expected_value) {
        (Value::Array(a), Value::Array(e)) => (a, e),
        _ => {
            return ComparisonResult::failure(
                ComparisonKind::Array,
                actual.trim(),
                expected.trim(),
                "Not valid arrays",
            )
        }
    };

    let actual_text = actual_value.to_string();
    let expected_text = expected_value.to_string();

    if actual_items.len() != expected_items.len() {
        return ComparisonResult::failure(
            ComparisonKind::Array,
            actual_text,
            expected_text,
            format!(
                "Array length mismatch: {} vs {}",
                actual_items.len(),
                expected_items.len()
            ),
        );
    }

    let mismatches = actual_items
        .iter()
        .zip(expected_items)
        .enumerate()
        .filter(|(_, (a, e))| !values_equal(a, e))
        .map(|(idx, (a, e))| Mismatch {
            position: idx + 1,
            actual: a.to_string(),
            expected: e.to_string(),
            difference: None,
            error: None,
        })
        .collect();

    settle(ComparisonResult {
        mismatches,
        ..ComparisonResult::new(ComparisonKind::Array, true, actual_text, expected_text)
    })
}

pub fn numeric_line_by_line(actual: &str, expected: &str, tolerance: f64) -> ComparisonResult {
    let actual_lines: Vec<&str> = actual.trim().split('\n').collect();
    let expected_lines: Vec<&str> = expected.trim().split('\n').collect();
    let actual_text = actual_lines.join("\n");
    let expected_text = expected_lines.join("\n");

    if actual_lines.len() != expected_lines.len() {
        return ComparisonResult {
            tolerance: Some(tolerance),
            ..ComparisonResult::failure(
                ComparisonKind::NumericLineByLine,
                actual_text,
                expected_text,
                format!(
                    "Line count mismatch: {} vs {}",
                    actual_lines.len(),
                    expected_lines.len()
                ),
            )
        };
    }

    let mut mismatches = Vec::new();
    for (idx, (a, e)) in actual_lines.iter().zip(&expected_lines).enumerate() {
        match (parse_number(a), parse_number(e)) {
            (Some(a_num), Some(e_num)) => {
                let difference = (a_num - e_num).abs();
                if difference > tolerance {
                    mismatches.push(Mismatch {
                        position: idx + 1,
                        actual: a_num.to_string(),
                        expected: e_num.to_string(),
                        difference: Some(difference),
                        error: None,
                    });
                }
            }
            _ => mismatches.push(Mismatch {
                position: idx + 1,
                actual: a.trim().to_string(),
                expected: e.trim().to_string(),
                difference: None,
                error: Some("Non-numeric value".to_string()),
            }),
        }
    }

    settle(ComparisonResult {
        mismatches,
        tolerance: Some(tolerance),
        ..ComparisonResult::new(
            ComparisonKind::NumericLineByLine,
            true,
            actual_text,
            expected_text,
        )
    })
}
