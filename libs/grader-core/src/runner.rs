/// Test Runner - Per-Submission Pipeline Orchestration
///
/// **Flow per test case (strictly sequential):**
/// 1. Resolve input format, comparison mode and tolerance (test case, else defaults)
/// 2. Format the structured input into stdin text
/// 3. Execute through the `CodeExecutor`
/// 4. Compare stdout against the expected output
/// 5. Record a `TestCaseReport`
///
/// A test passes only when the comparison passes AND the exit code is 0.
///
/// **Failure containment:**
/// - No test cases, unsupported language → the whole run fails (`GradingError`)
/// - Format errors, unreachable backend, timeouts → that test case fails with
///   runtime 0 and memory 0; remaining cases still run

use crate::comparator::{compare, ComparisonMode};
use crate::execution::{CodeExecutor, ExecutionFault, ExecutionRequest};
use crate::formatter::try_format;
use crate::round2;
use grader_common::config::PipelineDefaults;
use grader_common::store::{RecordStore, StoreError};
use grader_common::types::{ComparisonResult, TestCase, TestResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum GradingError {
    #[error("No test cases found for this assignment")]
    NoTestCases,
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Accepted,
    Failed,
}

/// Diagnostics for one test case within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseReport {
    pub test_case_id: Uuid,
    pub input: Value,
    pub formatted_input: Option<String>,
    pub expected_output: String,
    pub actual_output: String,
    pub error: Option<String>,
    pub passed: bool,
    pub runtime_ms: u64,
    pub memory_mb: f64,
    pub comparison: Option<ComparisonResult>,
}

impl TestCaseReport {
    fn failed(case: &TestCase, formatted_input: Option<String>, error: String) -> Self {
        Self {
            test_case_id: case.id,
            input: case.input.clone(),
            formatted_input,
            expected_output: case.expected_output.clone(),
            actual_output: String::new(),
            error: Some(error),
            passed: false,
            runtime_ms: 0,
            memory_mb: 0.0,
            comparison: None,
        }
    }

    pub fn to_test_result(&self, submission_id: Uuid) -> TestResult {
        TestResult {
            submission_id,
            test_case_id: self.test_case_id,
            passed: self.passed,
            actual_output: self.actual_output.clone(),
            runtime_ms: self.runtime_ms,
            memory_mb: self.memory_mb,
            error: self.error.clone(),
            comparison: self.comparison.clone(),
        }
    }
}

/// Aggregate result of one grading run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub passed_tests: usize,
    pub total_tests: usize,
    /// Rounded to 2 decimals.
    pub avg_runtime_ms: f64,
    /// Rounded to 2 decimals.
    pub avg_memory_mb: f64,
    pub test_results: Vec<TestCaseReport>,
}

impl RunReport {
    fn from_reports(test_results: Vec<TestCaseReport>) -> Self {
        let total_tests = test_results.len();
        let passed_tests = test_results.iter().filter(|r| r.passed).count();
        let total_runtime: u64 = test_results.iter().map(|r| r.runtime_ms).sum();
        let total_memory: f64 = test_results.iter().map(|r| r.memory_mb).sum();
        let count = total_tests.max(1) as f64;

        Self {
            status: if passed_tests == total_tests {
                RunStatus::Accepted
            } else {
                RunStatus::Failed
            },
            passed_tests,
            total_tests,
            avg_runtime_ms: round2(total_runtime as f64 / count),
            avg_memory_mb: round2(total_memory / count),
            test_results,
        }
    }

    pub fn to_test_results(&self, submission_id: Uuid) -> Vec<TestResult> {
        self.test_results
            .iter()
            .map(|report| report.to_test_result(submission_id))
            .collect()
    }
}

pub struct TestRunner {
    store: Arc<dyn RecordStore>,
    executor: Arc<dyn CodeExecutor>,
    defaults: PipelineDefaults,
}

impl TestRunner {
    pub fn new(
        store: Arc<dyn RecordStore>,
        executor: Arc<dyn CodeExecutor>,
        defaults: PipelineDefaults,
    ) -> Self {
        Self {
            store,
            executor,
            defaults,
        }
    }

    /// Run every test case of an assignment, in creation order.
    #[tracing::instrument(skip(self, code), fields(language = %language))]
    pub async fn run_test_cases(
        &self,
        code: &str,
        language: &str,
        assignment_id: Uuid,
    ) -> Result<RunReport, GradingError> {
        let cases = self.store.list_test_cases(assignment_id).await?;
        self.run_cases(code, language, &cases).await
    }

    /// Run an explicit list of test cases.
    pub async fn run_cases(
        &self,
        code: &str,
        language: &str,
        cases: &[TestCase],
    ) -> Result<RunReport, GradingError> {
        if cases.is_empty() {
            return Err(GradingError::NoTestCases);
        }

        let mut reports = Vec::with_capacity(cases.len());
        for case in cases {
            let report = self.run_one(code, language, case).await?;
            debug!(
                test_case_id = %case.id,
                passed = report.passed,
                runtime_ms = report.runtime_ms,
                "Test case evaluated"
            );
            reports.push(report);
        }

        let report = RunReport::from_reports(reports);
        info!(
            status = ?report.status,
            passed = report.passed_tests,
            total = report.total_tests,
            avg_runtime_ms = report.avg_runtime_ms,
            "Grading run complete"
        );
        Ok(report)
    }

    async fn run_one(
        &self,
        code: &str,
        language: &str,
        case: &TestCase,
    ) -> Result<TestCaseReport, GradingError> {
        let format = case.input_format.unwrap_or(self.defaults.input_format);
        let kind = case.comparison_mode.unwrap_or(self.defaults.comparison_mode);
        let tolerance = case.tolerance.unwrap_or(self.defaults.tolerance);

        let stdin = match try_format(&case.input, format) {
            Ok(stdin) => stdin,
            Err(e) => {
                return Ok(TestCaseReport::failed(
                    case,
                    None,
                    format!("Invalid {} input: {}", format, e),
                ))
            }
        };

        let request = ExecutionRequest::new(code, language, stdin.clone());
        let outcome = match self.executor.execute(&request).await {
            Ok(outcome) => outcome,
            Err(ExecutionFault::UnsupportedLanguage(language)) => {
                return Err(GradingError::UnsupportedLanguage(language))
            }
            Err(fault) => {
                if fault.is_infrastructure() {
                    warn!(test_case_id = %case.id, error = %fault, "Execution backend unavailable");
                } else {
                    debug!(test_case_id = %case.id, error = %fault, "Execution fault");
                }
                return Ok(TestCaseReport::failed(case, Some(stdin), fault.to_string()));
            }
        };

        let mode = ComparisonMode::resolve(kind, tolerance);
        let comparison = compare(&outcome.stdout, &case.expected_output, &mode);
        let passed = comparison.passed && outcome.exit_code == 0;

        Ok(TestCaseReport {
            test_case_id: case.id,
            input: case.input.clone(),
            formatted_input: Some(stdin),
            expected_output: case.expected_output.clone(),
            actual_output: outcome.stdout,
            error: Some(outcome.stderr).filter(|stderr| !stderr.is_empty()),
            passed,
            runtime_ms: outcome.runtime_ms,
            memory_mb: outcome.memory_mb,
            comparison: Some(comparison),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionOutcome, MockCodeExecutor};
    use grader_common::store::MemoryStore;
    use grader_common::types::{ComparisonKind, InputFormat, NewTestCase};
    use serde_json::json;

    fn make_test_case(assignment_id: Uuid, input: Value, expected: &str) -> TestCase {
        NewTestCase {
            assignment_id,
            input,
            expected_output: expected.to_string(),
            points: 10,
            is_public: true,
            time_limit_secs: 2.0,
            memory_limit_kb: 128_000,
            input_format: None,
            comparison_mode: None,
            tolerance: None,
        }
        .into_test_case()
    }

    fn echo_outcome(stdout: &str, exit_code: i64) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
            runtime_ms: 100,
            memory_mb: 5.0,
        }
    }

    /// Executor that echoes stdin, like `print(input())`.
    fn echo_executor() -> MockCodeExecutor {
        let mut executor = MockCodeExecutor::new();
        executor
            .expect_execute()
            .returning(|req| Ok(echo_outcome(&req.stdin, 0)));
        executor
    }

    fn make_runner(store: Arc<MemoryStore>, executor: MockCodeExecutor) -> TestRunner {
        TestRunner::new(store, Arc::new(executor), PipelineDefaults::default())
    }

    #[tokio::test]
    async fn test_partial_pass_is_failed_status() {
        let store = Arc::new(MemoryStore::new());
        let assignment_id = Uuid::new_v4();
        for (input, expected) in [(json!(1), "1"), (json!(2), "2"), (json!(3), "4")] {
            store
                .create_test_case(&make_test_case(assignment_id, input, expected))
                .await
                .unwrap();
        }

        let runner = make_runner(store, echo_executor());
        let report = runner
            .run_test_cases("print(input())", "python", assignment_id)
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.passed_tests, 2);
        assert_eq!(report.total_tests, 3);
        assert_eq!(report.avg_runtime_ms, 100.0);
        assert_eq!(report.avg_memory_mb, 5.0);
        assert!(!report.test_results[2].passed);
    }

    #[tokio::test]
    async fn test_all_pass_is_accepted() {
        let assignment_id = Uuid::new_v4();
        let mut case = make_test_case(assignment_id, json!([1, 2, 3]), "3\n1 2 3");
        case.input_format = Some(InputFormat::Array);

        let runner = make_runner(Arc::new(MemoryStore::new()), echo_executor());
        let report = runner.run_cases("code", "python", &[case]).await.unwrap();

        assert_eq!(report.status, RunStatus::Accepted);
        assert_eq!(
            report.test_results[0].formatted_input.as_deref(),
            Some("3\n1 2 3")
        );
    }

    #[tokio::test]
    async fn test_no_test_cases_fails_run() {
        let runner = make_runner(Arc::new(MemoryStore::new()), MockCodeExecutor::new());
        let err = runner
            .run_test_cases("code", "python", Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, GradingError::NoTestCases));
    }

    #[tokio::test]
    async fn test_unsupported_language_aborts_run() {
        let mut executor = MockCodeExecutor::new();
        executor
            .expect_execute()
            .times(1)
            .returning(|req| Err(ExecutionFault::UnsupportedLanguage(req.language.clone())));

        let assignment_id = Uuid::new_v4();
        let cases = vec![
            make_test_case(assignment_id, json!(1), "1"),
            make_test_case(assignment_id, json!(2), "2"),
        ];
        let runner = make_runner(Arc::new(MemoryStore::new()), executor);
        let err = runner.run_cases("code", "cobol", &cases).await.unwrap_err();
        assert!(matches!(err, GradingError::UnsupportedLanguage(lang) if lang == "cobol"));
    }

    #[tokio::test]
    async fn test_backend_unavailable_fails_every_case() {
        let mut executor = MockCodeExecutor::new();
        executor.expect_execute().times(3).returning(|_| {
            Err(ExecutionFault::ServiceUnavailable(
                "http://localhost:2000/api/v2/execute".to_string(),
            ))
        });

        let assignment_id = Uuid::new_v4();
        let cases: Vec<TestCase> = (1..=3)
            .map(|n| make_test_case(assignment_id, json!(n), &n.to_string()))
            .collect();
        let runner = make_runner(Arc::new(MemoryStore::new()), executor);
        let report = runner.run_cases("code", "python", &cases).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.passed_tests, 0);
        assert_eq!(report.avg_runtime_ms, 0.0);
        for result in &report.test_results {
            assert!(!result.passed);
            assert_eq!(result.runtime_ms, 0);
            assert_eq!(result.memory_mb, 0.0);
            assert!(result.error.as_deref().unwrap().contains("not available"));
        }
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_matching_output() {
        let mut executor = MockCodeExecutor::new();
        executor
            .expect_execute()
            .returning(|req| Ok(echo_outcome(&req.stdin, 1)));

        let case = make_test_case(Uuid::new_v4(), json!(5), "5");
        let runner = make_runner(Arc::new(MemoryStore::new()), executor);
        let report = runner.run_cases("code", "python", &[case]).await.unwrap();

        let result = &report.test_results[0];
        assert!(result.comparison.as_ref().unwrap().passed);
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn test_format_error_is_contained() {
        let mut executor = MockCodeExecutor::new();
        executor
            .expect_execute()
            .times(1)
            .returning(|req| Ok(echo_outcome(&req.stdin, 0)));

        let assignment_id = Uuid::new_v4();
        let mut broken = make_test_case(assignment_id, json!({"size": 2, "elements": 7}), "2\n7");
        broken.input_format = Some(InputFormat::Array);
        let fine = make_test_case(assignment_id, json!("ok"), "ok");

        let runner = make_runner(Arc::new(MemoryStore::new()), executor);
        let report = runner.run_cases("code", "python", &[broken, fine]).await.unwrap();

        assert_eq!(report.passed_tests, 1);
        assert!(report.test_results[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("Invalid array input"));
    }

    #[tokio::test]
    async fn test_unset_fields_use_defaults() {
        let mut executor = MockCodeExecutor::new();
        executor
            .expect_execute()
            .returning(|_| Ok(echo_outcome("3.1416", 0)));

        let mut case = make_test_case(Uuid::new_v4(), json!(1), "3.14159");
        case.comparison_mode = None;
        case.tolerance = None;

        let defaults = PipelineDefaults {
            input_format: InputFormat::Single,
            comparison_mode: ComparisonKind::NumericTolerance,
            tolerance: 0.001,
        };
        let runner = TestRunner::new(Arc::new(MemoryStore::new()), Arc::new(executor), defaults);
        let report = runner.run_cases("code", "python", &[case]).await.unwrap();

        let comparison = report.test_results[0].comparison.as_ref().unwrap();
        assert_eq!(comparison.method, ComparisonKind::NumericTolerance);
        assert!(report.test_results[0].passed);
    }

    #[tokio::test]
    async fn test_to_test_results_links_submission() {
        let case = make_test_case(Uuid::new_v4(), json!(1), "1");
        let case_id = case.id;
        let runner = make_runner(Arc::new(MemoryStore::new()), echo_executor());
        let report = runner.run_cases("code", "python", &[case]).await.unwrap();

        let submission_id = Uuid::new_v4();
        let results = report.to_test_results(submission_id);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].submission_id, submission_id);
        assert_eq!(results[0].test_case_id, case_id);
    }
}
