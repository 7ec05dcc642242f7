/// Job Executor - Grade One Queued Submission
///
/// **Responsibility:**
/// Load the submission, run its assignment's test cases, score the run and
/// persist submission + results in one atomic store call.
///
/// **Status rules:**
/// - Run completed (any pass count) → `graded`, integer score in `[0, max_score]`
/// - Run failed as a whole (no test cases, unsupported language, run timeout)
///   → `error`, no score, reason in `error`
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (execution client's job)
/// - How outputs are compared or scored (core's job)

use chrono::Utc;
use grader_common::store::{RecordStore, StoreError};
use grader_common::types::{GradeJob, Submission, SubmissionStatus, TestResult};
use grader_core::grading::GradingEngine;
use grader_core::runner::{GradingError, TestRunner};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct GradingContext {
    pub store: Arc<dyn RecordStore>,
    pub runner: TestRunner,
    pub grading: GradingEngine,
    /// Caller-level bound on one whole grading run.
    pub run_timeout: Duration,
}

/// Final persisted score: rounded to an integer, clamped to `[0, max_score]`.
fn final_score(score: f64, max_score: u32) -> f64 {
    score.round().clamp(0.0, max_score as f64)
}

fn mark_error(submission: &mut Submission, reason: String) {
    submission.status = SubmissionStatus::Error;
    submission.score = None;
    submission.avg_runtime_ms = None;
    submission.error = Some(reason);
}

/// Grade the submission referenced by `job` and persist the outcome.
#[tracing::instrument(skip(job, ctx), fields(job_id = %job.id, submission_id = %job.submission_id))]
pub async fn execute_job(job: &GradeJob, ctx: &GradingContext) -> Result<Submission, StoreError> {
    let mut submission = ctx
        .store
        .get_submission(job.submission_id)
        .await?
        .ok_or(StoreError::NotFound {
            kind: "Submission",
            id: job.submission_id,
        })?;

    let run = tokio::time::timeout(
        ctx.run_timeout,
        ctx.runner.run_test_cases(
            &submission.code,
            &submission.language,
            submission.assignment_id,
        ),
    )
    .await;

    let mut results: Vec<TestResult> = Vec::new();
    match run {
        Ok(Ok(report)) => {
            let score = ctx.grading.calculate_grade(
                report.avg_runtime_ms,
                report.avg_memory_mb,
                report.passed_tests,
                report.total_tests,
                submission.max_score as f64,
            );
            submission.status = SubmissionStatus::Graded;
            submission.score = Some(final_score(score, submission.max_score));
            submission.avg_runtime_ms = Some(report.avg_runtime_ms);
            submission.error = None;
            results = report.to_test_results(submission.id);

            info!(
                status = ?report.status,
                passed = report.passed_tests,
                total = report.total_tests,
                score = score,
                "Submission graded"
            );
        }
        Ok(Err(GradingError::Store(e))) => return Err(e),
        Ok(Err(e)) => {
            warn!(error = %e, "Grading run failed");
            mark_error(&mut submission, e.to_string());
        }
        Err(_) => {
            warn!(timeout_ms = ctx.run_timeout.as_millis() as u64, "Grading run timed out");
            mark_error(
                &mut submission,
                format!("Grading timed out after {}ms", ctx.run_timeout.as_millis()),
            );
        }
    }

    submission.graded_at = Some(Utc::now());
    ctx.store.record_grading(&submission, &results).await?;
    Ok(submission)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grader_common::config::{GradingThresholds, PipelineDefaults};
    use grader_common::store::MemoryStore;
    use grader_common::types::NewTestCase;
    use grader_core::execution::{ExecutionFault, ExecutionOutcome, MockCodeExecutor};
    use serde_json::json;
    use uuid::Uuid;

    fn make_submission(assignment_id: Uuid, language: &str) -> Submission {
        Submission {
            id: Uuid::new_v4(),
            assignment_id,
            student_id: "s1".to_string(),
            student_name: Some("Student One".to_string()),
            code: "print(input())".to_string(),
            language: language.to_string(),
            status: SubmissionStatus::Pending,
            score: None,
            max_score: 100,
            avg_runtime_ms: None,
            error: None,
            submitted_at: Utc::now(),
            graded_at: None,
        }
    }

    async fn add_case(store: &MemoryStore, assignment_id: Uuid, input: i64, expected: &str) {
        let case = NewTestCase {
            assignment_id,
            input: json!(input),
            expected_output: expected.to_string(),
            points: 10,
            is_public: true,
            time_limit_secs: 2.0,
            memory_limit_kb: 128_000,
            input_format: None,
            comparison_mode: None,
            tolerance: None,
        }
        .into_test_case();
        store.create_test_case(&case).await.unwrap();
    }

    fn make_context(store: Arc<MemoryStore>, executor: MockCodeExecutor) -> GradingContext {
        GradingContext {
            store: store.clone(),
            runner: TestRunner::new(store, Arc::new(executor), PipelineDefaults::default()),
            grading: GradingEngine::new(GradingThresholds::default()),
            run_timeout: Duration::from_secs(5),
        }
    }

    fn echo_executor(runtime_ms: u64) -> MockCodeExecutor {
        let mut executor = MockCodeExecutor::new();
        executor.expect_execute().returning(move |req| {
            Ok(ExecutionOutcome {
                stdout: req.stdin.clone(),
                stderr: String::new(),
                exit_code: 0,
                runtime_ms,
                memory_mb: 5.0,
            })
        });
        executor
    }

    #[tokio::test]
    async fn test_partial_pass_is_graded_with_rounded_score() {
        let store = Arc::new(MemoryStore::new());
        let assignment_id = Uuid::new_v4();
        add_case(&store, assignment_id, 1, "1").await;
        add_case(&store, assignment_id, 2, "2").await;
        add_case(&store, assignment_id, 3, "wrong").await;
        let submission = make_submission(assignment_id, "python");
        store.create_submission(&submission).await.unwrap();

        let ctx = make_context(store.clone(), echo_executor(40));
        let graded = execute_job(&GradeJob::for_submission(submission.id), &ctx)
            .await
            .unwrap();

        // 2/3 of 100 = 66.67 → 67
        assert_eq!(graded.status, SubmissionStatus::Graded);
        assert_eq!(graded.score, Some(67.0));
        assert_eq!(graded.avg_runtime_ms, Some(40.0));
        assert!(graded.graded_at.is_some());

        let results = store.list_results(submission.id).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.passed).count(), 2);
    }

    #[tokio::test]
    async fn test_full_pass_capped_at_max_score() {
        let store = Arc::new(MemoryStore::new());
        let assignment_id = Uuid::new_v4();
        add_case(&store, assignment_id, 7, "7").await;
        let submission = make_submission(assignment_id, "python");
        store.create_submission(&submission).await.unwrap();

        let ctx = make_context(store.clone(), echo_executor(40));
        let graded = execute_job(&GradeJob::for_submission(submission.id), &ctx)
            .await
            .unwrap();
        assert_eq!(graded.score, Some(100.0));
    }

    #[tokio::test]
    async fn test_no_test_cases_marks_error() {
        let store = Arc::new(MemoryStore::new());
        let submission = make_submission(Uuid::new_v4(), "python");
        store.create_submission(&submission).await.unwrap();

        let ctx = make_context(store.clone(), MockCodeExecutor::new());
        let graded = execute_job(&GradeJob::for_submission(submission.id), &ctx)
            .await
            .unwrap();

        assert_eq!(graded.status, SubmissionStatus::Error);
        assert_eq!(graded.score, None);
        assert_eq!(
            graded.error.as_deref(),
            Some("No test cases found for this assignment")
        );
        let stored = store.get_submission(submission.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Error);
    }

    #[tokio::test]
    async fn test_unsupported_language_marks_error() {
        let store = Arc::new(MemoryStore::new());
        let assignment_id = Uuid::new_v4();
        add_case(&store, assignment_id, 1, "1").await;
        let submission = make_submission(assignment_id, "cobol");
        store.create_submission(&submission).await.unwrap();

        let mut executor = MockCodeExecutor::new();
        executor
            .expect_execute()
            .returning(|req| Err(ExecutionFault::UnsupportedLanguage(req.language.clone())));

        let ctx = make_context(store.clone(), executor);
        let graded = execute_job(&GradeJob::for_submission(submission.id), &ctx)
            .await
            .unwrap();
        assert_eq!(graded.status, SubmissionStatus::Error);
        assert_eq!(graded.error.as_deref(), Some("Unsupported language: cobol"));
        assert!(store.list_results(submission.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_regrade_replaces_results() {
        let store = Arc::new(MemoryStore::new());
        let assignment_id = Uuid::new_v4();
        add_case(&store, assignment_id, 1, "1").await;
        add_case(&store, assignment_id, 2, "2").await;
        let submission = make_submission(assignment_id, "python");
        store.create_submission(&submission).await.unwrap();

        let ctx = make_context(store.clone(), echo_executor(10));
        let job = GradeJob::for_submission(submission.id);
        execute_job(&job, &ctx).await.unwrap();
        execute_job(&job, &ctx).await.unwrap();

        assert_eq!(store.list_results(submission.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_submission_is_not_found() {
        let ctx = make_context(Arc::new(MemoryStore::new()), MockCodeExecutor::new());
        let err = execute_job(&GradeJob::for_submission(Uuid::new_v4()), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "Submission", .. }));
    }

    #[test]
    fn test_final_score_rounding() {
        assert_eq!(final_score(66.67, 100), 67.0);
        assert_eq!(final_score(99.5, 100), 100.0);
        assert_eq!(final_score(-3.0, 100), 0.0);
        assert_eq!(final_score(12.0, 10), 10.0);
    }
}
