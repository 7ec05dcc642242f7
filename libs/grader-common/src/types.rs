use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Layout convention used to turn a structured test input into stdin text.
///
/// Unknown tags deserialize to `Raw`, which is plain stringification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    #[default]
    Single,
    Multiple,
    Multiline,
    Array,
    Matrix,
    #[serde(other)]
    Raw,
}

impl InputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::Single => "single",
            InputFormat::Multiple => "multiple",
            InputFormat::Multiline => "multiline",
            InputFormat::Array => "array",
            InputFormat::Matrix => "matrix",
            InputFormat::Raw => "raw",
        }
    }
}

impl FromStr for InputFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "single" => InputFormat::Single,
            "multiple" => InputFormat::Multiple,
            "multiline" => InputFormat::Multiline,
            "array" => InputFormat::Array,
            "matrix" => InputFormat::Matrix,
            _ => InputFormat::Raw,
        })
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison mode tag as stored on a test case.
///
/// Unrecognized tags fall back to `Exact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    WhitespaceFlexible,
    NumericTolerance,
    LineByLine,
    TokenBased,
    Array,
    NumericLineByLine,
    #[default]
    #[serde(other)]
    Exact,
}

impl ComparisonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonKind::Exact => "exact",
            ComparisonKind::WhitespaceFlexible => "whitespace_flexible",
            ComparisonKind::NumericTolerance => "numeric_tolerance",
            ComparisonKind::LineByLine => "line_by_line",
            ComparisonKind::TokenBased => "token_based",
            ComparisonKind::Array => "array",
            ComparisonKind::NumericLineByLine => "numeric_line_by_line",
        }
    }
}

impl FromStr for ComparisonKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "whitespace_flexible" => ComparisonKind::WhitespaceFlexible,
            "numeric_tolerance" => ComparisonKind::NumericTolerance,
            "line_by_line" => ComparisonKind::LineByLine,
            "token_based" => ComparisonKind::TokenBased,
            "array" => ComparisonKind::Array,
            "numeric_line_by_line" => ComparisonKind::NumericLineByLine,
            _ => ComparisonKind::Exact,
        })
    }
}

impl fmt::Display for ComparisonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub title: String,
    pub language: String,
    pub max_score: u32,
    pub due_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAssignment {
    pub title: String,
    pub language: String,
    #[serde(default = "default_max_score")]
    pub max_score: u32,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl NewAssignment {
    pub fn into_assignment(self) -> Assignment {
        Assignment {
            id: Uuid::new_v4(),
            title: self.title,
            language: self.language.to_lowercase(),
            max_score: self.max_score,
            due_at: self.due_at,
            active: self.active,
            created_at: Utc::now(),
        }
    }
}

impl Assignment {
    /// Whether new submissions are accepted at `now`.
    pub fn accepts_submissions(&self, now: DateTime<Utc>) -> Result<(), String> {
        if !self.active {
            return Err("Assignment is not active".to_string());
        }
        match self.due_at {
            Some(due) if now > due => Err(
                "Assignment deadline has passed. Resubmissions are no longer allowed.".to_string(),
            ),
            _ => Ok(()),
        }
    }
}

/// A single (input, expected output, scoring metadata) tuple tied to an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub input: Value,
    pub expected_output: String,
    pub points: u32,
    pub is_public: bool,
    pub time_limit_secs: f64,
    pub memory_limit_kb: u64,
    pub input_format: Option<InputFormat>,
    pub comparison_mode: Option<ComparisonKind>,
    pub tolerance: Option<f64>,
    pub created_at: DateTime<Utc>,
}

fn default_points() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_time_limit() -> f64 {
    2.0
}

fn default_memory_limit() -> u64 {
    128_000
}

fn default_max_score() -> u32 {
    100
}

/// Instructor payload for creating a test case. Omitted fields take the usual defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTestCase {
    pub assignment_id: Uuid,
    pub input: Value,
    pub expected_output: String,
    #[serde(default = "default_points")]
    pub points: u32,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default = "default_time_limit")]
    pub time_limit_secs: f64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_kb: u64,
    #[serde(default)]
    pub input_format: Option<InputFormat>,
    #[serde(default)]
    pub comparison_mode: Option<ComparisonKind>,
    #[serde(default)]
    pub tolerance: Option<f64>,
}

impl NewTestCase {
    pub fn into_test_case(self) -> TestCase {
        TestCase {
            id: Uuid::new_v4(),
            assignment_id: self.assignment_id,
            input: self.input,
            expected_output: self.expected_output,
            points: self.points,
            is_public: self.is_public,
            time_limit_secs: self.time_limit_secs,
            memory_limit_kb: self.memory_limit_kb,
            input_format: Some(self.input_format.unwrap_or_default()),
            comparison_mode: Some(self.comparison_mode.unwrap_or_default()),
            tolerance: Some(self.tolerance.unwrap_or(0.0)),
            created_at: Utc::now(),
        }
    }
}

/// Partial edit of a test case.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestCasePatch {
    pub input: Option<Value>,
    pub expected_output: Option<String>,
    pub points: Option<u32>,
    pub is_public: Option<bool>,
    pub time_limit_secs: Option<f64>,
    pub memory_limit_kb: Option<u64>,
    pub input_format: Option<InputFormat>,
    pub comparison_mode: Option<ComparisonKind>,
    pub tolerance: Option<f64>,
}

impl TestCasePatch {
    pub fn is_empty(&self) -> bool {
        self.input.is_none()
            && self.expected_output.is_none()
            && self.points.is_none()
            && self.is_public.is_none()
            && self.time_limit_secs.is_none()
            && self.memory_limit_kb.is_none()
            && self.input_format.is_none()
            && self.comparison_mode.is_none()
            && self.tolerance.is_none()
    }

    pub fn apply(self, test_case: &mut TestCase) {
        if let Some(input) = self.input {
            test_case.input = input;
        }
        if let Some(expected) = self.expected_output {
            test_case.expected_output = expected;
        }
        if let Some(points) = self.points {
            test_case.points = points;
        }
        if let Some(is_public) = self.is_public {
            test_case.is_public = is_public;
        }
        if let Some(limit) = self.time_limit_secs {
            test_case.time_limit_secs = limit;
        }
        if let Some(limit) = self.memory_limit_kb {
            test_case.memory_limit_kb = limit;
        }
        if self.input_format.is_some() {
            test_case.input_format = self.input_format;
        }
        if self.comparison_mode.is_some() {
            test_case.comparison_mode = self.comparison_mode;
        }
        if self.tolerance.is_some() {
            test_case.tolerance = self.tolerance;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Graded,
    Error,
}

/// One grading attempt. Resubmissions create new rows; nothing is updated across attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub student_id: String,
    #[serde(default)]
    pub student_name: Option<String>,
    pub code: String,
    pub language: String,
    pub status: SubmissionStatus,
    pub score: Option<f64>,
    pub max_score: u32,
    pub avg_runtime_ms: Option<f64>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub graded_at: Option<DateTime<Utc>>,
}

/// One mismatching line, token, or value reported by a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    /// 1-based line number or token position.
    pub position: usize,
    pub actual: String,
    pub expected: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difference: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Verdict of one output comparison plus the diagnostics of the mode that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub method: ComparisonKind,
    pub passed: bool,
    pub actual: String,
    pub expected: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mismatches: Vec<Mismatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difference: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComparisonResult {
    pub fn new(
        method: ComparisonKind,
        passed: bool,
        actual: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self {
            method,
            passed,
            actual: actual.into(),
            expected: expected.into(),
            mismatches: Vec::new(),
            difference: None,
            tolerance: None,
            error: None,
        }
    }

    /// A failed comparison carrying an explanatory error.
    pub fn failure(
        method: ComparisonKind,
        actual: impl Into<String>,
        expected: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(method, false, actual, expected)
        }
    }
}

/// Persisted outcome of one test case for one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub submission_id: Uuid,
    pub test_case_id: Uuid,
    pub passed: bool,
    pub actual_output: String,
    pub runtime_ms: u64,
    pub memory_mb: f64,
    pub error: Option<String>,
    pub comparison: Option<ComparisonResult>,
}

/// Queue message asking a worker to grade a stored submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeJob {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

impl GradeJob {
    pub fn for_submission(submission_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            submission_id,
            enqueued_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_tags_fall_back() {
        let mode: ComparisonKind = serde_json::from_value(json!("fuzzy")).unwrap();
        assert_eq!(mode, ComparisonKind::Exact);
        let format: InputFormat = serde_json::from_value(json!("csv")).unwrap();
        assert_eq!(format, InputFormat::Raw);
        assert_eq!("token_based".parse::<ComparisonKind>().unwrap(), ComparisonKind::TokenBased);
    }

    #[test]
    fn test_tags_serialize_snake_case() {
        assert_eq!(
            serde_json::to_value(ComparisonKind::NumericLineByLine).unwrap(),
            json!("numeric_line_by_line")
        );
        assert_eq!(serde_json::to_value(InputFormat::Matrix).unwrap(), json!("matrix"));
    }

    #[test]
    fn test_new_test_case_defaults() {
        let payload = json!({
            "assignment_id": Uuid::new_v4(),
            "input": [1, 2, 3],
            "expected_output": "6"
        });
        let test_case = serde_json::from_value::<NewTestCase>(payload)
            .unwrap()
            .into_test_case();

        assert_eq!(test_case.points, 10);
        assert!(test_case.is_public);
        assert_eq!(test_case.time_limit_secs, 2.0);
        assert_eq!(test_case.memory_limit_kb, 128_000);
        assert_eq!(test_case.input_format, Some(InputFormat::Single));
        assert_eq!(test_case.comparison_mode, Some(ComparisonKind::Exact));
        assert_eq!(test_case.tolerance, Some(0.0));
    }

    #[test]
    fn test_patch_applies_only_present_fields() {
        let mut test_case = NewTestCase {
            assignment_id: Uuid::new_v4(),
            input: json!(5),
            expected_output: "25".to_string(),
            points: 10,
            is_public: true,
            time_limit_secs: 2.0,
            memory_limit_kb: 128_000,
            input_format: None,
            comparison_mode: None,
            tolerance: None,
        }
        .into_test_case();

        let patch = TestCasePatch {
            expected_output: Some("26".to_string()),
            comparison_mode: Some(ComparisonKind::NumericTolerance),
            tolerance: Some(0.5),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        patch.apply(&mut test_case);

        assert_eq!(test_case.expected_output, "26");
        assert_eq!(test_case.input, json!(5));
        assert_eq!(test_case.comparison_mode, Some(ComparisonKind::NumericTolerance));
        assert_eq!(test_case.tolerance, Some(0.5));
        assert!(TestCasePatch::default().is_empty());
    }

    #[test]
    fn test_assignment_deadline() {
        let mut assignment = NewAssignment {
            title: "Sorting".to_string(),
            language: "Python".to_string(),
            max_score: 100,
            due_at: Some(Utc::now() - chrono::Duration::hours(1)),
            active: true,
        }
        .into_assignment();

        assert_eq!(assignment.language, "python");
        assert!(assignment.accepts_submissions(Utc::now()).is_err());

        assignment.due_at = None;
        assert!(assignment.accepts_submissions(Utc::now()).is_ok());

        assignment.active = false;
        assert_eq!(
            assignment.accepts_submissions(Utc::now()).unwrap_err(),
            "Assignment is not active"
        );
    }
}
