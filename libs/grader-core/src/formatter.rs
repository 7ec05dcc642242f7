/// Input Formatter - Structured Test Input → stdin Text
///
/// **Layouts:**
/// - `single`: one scalar, trimmed
/// - `multiple`: sequence joined by single spaces
/// - `multiline`: sequence joined by newlines
/// - `array`: `"<len>\n<elements>"`, also from `{size, elements}`
/// - `matrix`: `"<rows> <cols>\n<row>\n<row>..."`, also from `{rows, cols, data}`
/// - `raw`: plain stringification
///
/// Empty input (null, false, empty string) formats to the empty string.
/// Numeric zero is a value, not empty input.

use grader_common::types::InputFormat;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatError {
    #[error("array input field `elements` must be a sequence")]
    ElementsNotSequence,
    #[error("matrix input field `data` must be a sequence of rows")]
    DataNotSequence,
    #[error("matrix row {0} is not a sequence")]
    RowNotSequence(usize),
}

/// Outcome of a dry-run format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Render a structured value the way a script would print it.
///
/// Strings are taken as-is, sequences are comma-joined, objects become compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_text(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => join(items, ","),
        Value::Object(_) => value.to_string(),
    }
}

fn number_text(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        // 2.0 prints as "2"
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

fn join(items: &[Value], separator: &str) -> String {
    items
        .iter()
        .map(stringify)
        .collect::<Vec<_>>()
        .join(separator)
}

fn is_empty_input(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Format `input` for stdin, failing on malformed structured shapes.
pub fn try_format(input: &Value, format: InputFormat) -> Result<String, FormatError> {
    if is_empty_input(input) {
        return Ok(String::new());
    }

    match format {
        InputFormat::Single => Ok(stringify(input).trim().to_string()),
        InputFormat::Multiple => Ok(match input {
            Value::Array(items) => join(items, " "),
            other => stringify(other).trim().to_string(),
        }),
        InputFormat::Multiline => Ok(match input {
            Value::Array(items) => join(items, "\n"),
            other => stringify(other).trim().to_string(),
        }),
        InputFormat::Array => format_array(input),
        InputFormat::Matrix => format_matrix(input),
        InputFormat::Raw => Ok(stringify(input)),
    }
}

/// Format `input` for stdin. Malformed shapes fall back to plain stringification.
pub fn format(input: &Value, format: InputFormat) -> String {
    try_format(input, format).unwrap_or_else(|_| stringify(input))
}

/// Attempt to format and report whether it worked.
pub fn validate(input: &Value, format: InputFormat) -> Validation {
    match try_format(input, format) {
        Ok(_) => Validation {
            valid: true,
            error: None,
        },
        Err(e) => Validation {
            valid: false,
            error: Some(e.to_string()),
        },
    }
}

fn format_array(input: &Value) -> Result<String, FormatError> {
    match input {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Array(items) => Ok(format!("{}\n{}", items.len(), join(items, " "))),
        Value::Object(fields) => match (fields.get("size"), fields.get("elements")) {
            (Some(size), Some(elements)) => {
                let elements = elements
                    .as_array()
                    .ok_or(FormatError::ElementsNotSequence)?;
                Ok(format!("{}\n{}", stringify(size), join(elements, " ")))
            }
            _ => Ok(stringify(input)),
        },
        other => Ok(stringify(other)),
    }
}

fn format_matrix(input: &Value) -> Result<String, FormatError> {
    match input {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Array(rows) if matches!(rows.first(), Some(Value::Array(_))) => {
            let cols = rows.first().and_then(Value::as_array).map_or(0, Vec::len);
            Ok(format!("{} {}\n{}", rows.len(), cols, matrix_rows(rows)?))
        }
        Value::Object(fields) => match matrix_fields(fields) {
            Some((rows, cols, data)) => {
                let data = data.as_array().ok_or(FormatError::DataNotSequence)?;
                Ok(format!(
                    "{} {}\n{}",
                    stringify(rows),
                    stringify(cols),
                    matrix_rows(data)?
                ))
            }
            None => Ok(stringify(input)),
        },
        other => Ok(stringify(other)),
    }
}

/// `{rows, cols, data}` with all three present and non-empty.
fn matrix_fields(fields: &Map<String, Value>) -> Option<(&Value, &Value, &Value)> {
    let present = |key: &str| {
        fields
            .get(key)
            .filter(|v| !is_empty_input(v) && v.as_f64() != Some(0.0))
    };
    Some((present("rows")?, present("cols")?, present("data")?))
}

fn matrix_rows(rows: &[Value]) -> Result<String, FormatError> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            row.as_array()
                .map(|cells| join(cells, " "))
                .ok_or(FormatError::RowNotSequence(idx))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|lines| lines.join("\n"))
}

/// Append a trailing newline to multi-line input that lacks one.
pub fn ensure_trailing_newline(input: &str) -> String {
    if input.contains('\n') && !input.ends_with('\n') {
        format!("{}\n", input)
    } else {
        input.to_string()
    }
}
