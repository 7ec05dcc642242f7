// HTTP route handlers for the Grader API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use grader_common::types::{
    Assignment, ComparisonKind, GradeJob, InputFormat, NewAssignment, NewTestCase, Submission,
    SubmissionStatus, TestCase, TestCasePatch, TestResult,
};
use grader_core::execution::ExecutionRequest;
use grader_core::grading::LetterGrade;
use grader_core::round2;
use grader_core::similarity::{PairMember, PlagiarismCheck, PlagiarismPair, SubmissionRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics;
use crate::AppState;

type ApiResult<T> = Result<T, ApiError>;

async fn require_assignment(state: &AppState, id: Uuid) -> ApiResult<Assignment> {
    state
        .store
        .get_assignment(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Assignment not found".into()))
}

async fn require_submission(state: &AppState, id: Uuid) -> ApiResult<Submission> {
    state
        .store
        .get_submission(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Submission {} not found", id)))
}

fn require_language(state: &AppState, language: &str) -> ApiResult<()> {
    match state.config.execution.languages.get(language) {
        Some(_) => Ok(()),
        None => Err(ApiError::Validation(format!(
            "Unsupported language: {}",
            language
        ))),
    }
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus exposition
pub async fn metrics_handler() -> ApiResult<String> {
    metrics::render().map_err(|e| ApiError::Internal(e.to_string()))
}

// ---------------------------------------------------------------------------
// Assignments
// ---------------------------------------------------------------------------

/// POST /assignments
pub async fn create_assignment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewAssignment>,
) -> ApiResult<(StatusCode, Json<Assignment>)> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::Validation("Title is required".into()));
    }
    require_language(&state, &payload.language)?;

    let assignment = payload.into_assignment();
    state.store.create_assignment(&assignment).await?;
    info!(assignment_id = %assignment.id, language = %assignment.language, "Assignment created");
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// GET /assignments/:id
pub async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Assignment>> {
    Ok(Json(require_assignment(&state, id).await?))
}

// ---------------------------------------------------------------------------
// Test cases
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct TestCaseListQuery {
    #[serde(default)]
    pub include_hidden: bool,
}

/// Test case as listed to callers. Hidden cases omit input and expected output
/// unless the caller asks for them.
#[derive(Debug, Serialize)]
pub struct TestCaseView {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub points: u32,
    pub is_public: bool,
    pub time_limit_secs: f64,
    pub memory_limit_kb: u64,
    pub input_format: Option<InputFormat>,
    pub comparison_mode: Option<ComparisonKind>,
    pub tolerance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
}

impl TestCaseView {
    fn from_case(case: TestCase, reveal: bool) -> Self {
        let reveal = reveal || case.is_public;
        Self {
            id: case.id,
            assignment_id: case.assignment_id,
            points: case.points,
            is_public: case.is_public,
            time_limit_secs: case.time_limit_secs,
            memory_limit_kb: case.memory_limit_kb,
            input_format: case.input_format,
            comparison_mode: case.comparison_mode,
            tolerance: case.tolerance,
            input: reveal.then_some(case.input),
            expected_output: reveal.then_some(case.expected_output),
        }
    }
}

/// GET /assignments/:id/test-cases?include_hidden=
pub async fn list_test_cases(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<Uuid>,
    Query(query): Query<TestCaseListQuery>,
) -> ApiResult<Json<Vec<TestCaseView>>> {
    require_assignment(&state, assignment_id).await?;
    let cases = state.store.list_test_cases(assignment_id).await?;
    Ok(Json(
        cases
            .into_iter()
            .map(|case| TestCaseView::from_case(case, query.include_hidden))
            .collect(),
    ))
}

/// POST /test-cases
pub async fn create_test_case(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewTestCase>,
) -> ApiResult<(StatusCode, Json<TestCase>)> {
    require_assignment(&state, payload.assignment_id).await?;

    let test_case = payload.into_test_case();
    state.store.create_test_case(&test_case).await?;
    info!(
        test_case_id = %test_case.id,
        assignment_id = %test_case.assignment_id,
        "Test case created"
    );
    Ok((StatusCode::CREATED, Json(test_case)))
}

/// GET /test-cases/:id
pub async fn get_test_case(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TestCase>> {
    state
        .store
        .get_test_case(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Test case not found".into()))
}

/// PUT /test-cases/:id
pub async fn update_test_case(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<TestCasePatch>,
) -> ApiResult<Json<TestCase>> {
    if patch.is_empty() {
        return Err(ApiError::Validation("No fields to update".into()));
    }

    let mut test_case = state
        .store
        .get_test_case(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Test case not found".into()))?;
    patch.apply(&mut test_case);
    state.store.update_test_case(&test_case).await?;
    Ok(Json(test_case))
}

/// DELETE /test-cases/:id
pub async fn delete_test_case(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    if !state.store.delete_test_case(id).await? {
        return Err(ApiError::NotFound("Test case not found".into()));
    }
    info!(test_case_id = %id, "Test case deleted");
    Ok(Json(serde_json::json!({ "message": "Test case deleted" })))
}

// ---------------------------------------------------------------------------
// Submissions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub assignment_id: Uuid,
    pub student_id: String,
    #[serde(default)]
    pub student_name: Option<String>,
    pub code: String,
    pub language: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
    pub attempt: usize,
    /// `None` when attempts are unlimited.
    pub attempts_remaining: Option<usize>,
}

/// POST /submissions - Create a pending submission and queue it for grading
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let result = accept_submission(&state, payload).await;
    let outcome = if result.is_ok() { "queued" } else { "rejected" };
    metrics::SUBMISSIONS.with_label_values(&[outcome]).inc();
    result
}

async fn accept_submission(
    state: &AppState,
    payload: SubmitRequest,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    if payload.student_id.trim().is_empty()
        || payload.code.trim().is_empty()
        || payload.language.trim().is_empty()
    {
        return Err(ApiError::Validation("Missing required fields".into()));
    }

    let assignment = require_assignment(state, payload.assignment_id).await?;
    assignment
        .accepts_submissions(Utc::now())
        .map_err(ApiError::Validation)?;
    require_language(state, &payload.language)?;

    let submission = Submission {
        id: Uuid::new_v4(),
        assignment_id: assignment.id,
        student_id: payload.student_id,
        student_name: payload.student_name,
        code: payload.code,
        language: payload.language.trim().to_lowercase(),
        status: SubmissionStatus::Pending,
        score: None,
        max_score: assignment.max_score,
        avg_runtime_ms: None,
        error: None,
        submitted_at: Utc::now(),
        graded_at: None,
    };
    let max_attempts = state.config.submissions.max_attempts as usize;
    let attempt = state.store.create_attempt(&submission, max_attempts).await?;

    let job = GradeJob::for_submission(submission.id);
    state.queue.push_job(&job).await?;

    info!(
        submission_id = %submission.id,
        job_id = %job.id,
        assignment_id = %assignment.id,
        attempt,
        "Submission queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            submission_id: submission.id,
            status: submission.status,
            attempt,
            attempts_remaining: (max_attempts > 0).then(|| max_attempts.saturating_sub(attempt)),
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct SubmissionReport {
    pub submission: Submission,
    pub results: Vec<TestResult>,
    pub passed_tests: usize,
    pub total_tests: usize,
    pub percentage: Option<f64>,
    pub letter_grade: Option<LetterGrade>,
    /// Mean score over the student's graded attempts on this assignment.
    pub student_average: Option<f64>,
}

/// GET /submissions/:id
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SubmissionReport>> {
    let submission = require_submission(&state, id).await?;
    let results = state.store.list_results(id).await?;

    let total_tests = results.len();
    let passed_tests = results.iter().filter(|r| r.passed).count();

    let percentage = submission
        .score
        .filter(|_| submission.max_score > 0)
        .map(|score| round2(score / submission.max_score as f64 * 100.0));

    let letter_grade = (submission.status == SubmissionStatus::Graded && total_tests > 0).then(|| {
        let avg_memory = results.iter().map(|r| r.memory_mb).sum::<f64>() / total_tests as f64;
        state.grading.letter_grade(
            submission.avg_runtime_ms.unwrap_or_default(),
            avg_memory,
            passed_tests,
            total_tests,
        )
    });

    let graded_scores: Vec<f64> = state
        .store
        .list_attempts(submission.assignment_id, &submission.student_id)
        .await?
        .iter()
        .filter(|attempt| attempt.status == SubmissionStatus::Graded)
        .filter_map(|attempt| attempt.score)
        .collect();
    let student_average = (!graded_scores.is_empty())
        .then(|| round2(graded_scores.iter().sum::<f64>() / graded_scores.len() as f64));

    Ok(Json(SubmissionReport {
        submission,
        results,
        passed_tests,
        total_tests,
        percentage,
        letter_grade,
        student_average,
    }))
}

/// GET /assignments/:id/submissions
pub async fn list_submissions(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Submission>>> {
    require_assignment(&state, assignment_id).await?;
    Ok(Json(state.store.list_submissions(assignment_id).await?))
}

#[derive(Debug, Serialize)]
pub struct AssignmentStats {
    pub assignment_id: Uuid,
    pub total_submissions: usize,
    pub graded_submissions: usize,
    pub pending_submissions: usize,
    pub error_submissions: usize,
    /// Mean score over graded submissions.
    pub average_score: Option<f64>,
}

/// GET /assignments/:id/stats
pub async fn assignment_stats(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<Uuid>,
) -> ApiResult<Json<AssignmentStats>> {
    require_assignment(&state, assignment_id).await?;
    let submissions = state.store.list_submissions(assignment_id).await?;

    let count = |status: SubmissionStatus| submissions.iter().filter(|s| s.status == status).count();
    let graded_scores: Vec<f64> = submissions
        .iter()
        .filter(|s| s.status == SubmissionStatus::Graded)
        .filter_map(|s| s.score)
        .collect();

    Ok(Json(AssignmentStats {
        assignment_id,
        total_submissions: submissions.len(),
        graded_submissions: count(SubmissionStatus::Graded),
        pending_submissions: count(SubmissionStatus::Pending),
        error_submissions: count(SubmissionStatus::Error),
        average_score: (!graded_scores.is_empty())
            .then(|| round2(graded_scores.iter().sum::<f64>() / graded_scores.len() as f64)),
    }))
}

// ---------------------------------------------------------------------------
// Run-only execution
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub stdin: String,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub output: String,
    pub error: String,
    pub exit_code: i64,
    pub runtime_ms: u64,
    pub memory_mb: f64,
}

/// POST /execute - Run code once without grading or persisting
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecuteRequest>,
) -> ApiResult<Json<ExecuteResponse>> {
    if payload.code.trim().is_empty() || payload.language.trim().is_empty() {
        return Err(ApiError::Validation("Missing required fields".into()));
    }

    let request = ExecutionRequest::new(payload.code, payload.language, payload.stdin);
    match state.executor.execute(&request).await {
        Ok(outcome) => {
            metrics::EXECUTIONS.with_label_values(&["ok"]).inc();
            Ok(Json(ExecuteResponse {
                output: outcome.stdout,
                error: outcome.stderr,
                exit_code: outcome.exit_code,
                runtime_ms: outcome.runtime_ms,
                memory_mb: outcome.memory_mb,
            }))
        }
        Err(fault) => {
            metrics::EXECUTIONS.with_label_values(&["fault"]).inc();
            warn!(language = %request.language, error = %fault, "Run-only execution failed");
            Err(fault.into())
        }
    }
}

// ---------------------------------------------------------------------------
// Plagiarism
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ComparisonReport {
    pub first: PairMember,
    pub second: PairMember,
    pub language: String,
    #[serde(flatten)]
    pub check: PlagiarismCheck,
}

/// GET /plagiarism/compare/:first/:second
pub async fn compare_submissions(
    State(state): State<Arc<AppState>>,
    Path((first_id, second_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<ComparisonReport>> {
    let first = require_submission(&state, first_id).await?;
    let second = require_submission(&state, second_id).await?;
    if first.assignment_id != second.assignment_id {
        return Err(ApiError::Validation(
            "Submissions must be from the same assignment".into(),
        ));
    }

    let language = match state.store.get_assignment(first.assignment_id).await? {
        Some(assignment) => assignment.language,
        None => first.language.clone(),
    };

    let started = Instant::now();
    let worker_state = state.clone();
    let (first_code, second_code, lang) = (first.code.clone(), second.code.clone(), language.clone());
    let check = tokio::task::spawn_blocking(move || {
        worker_state
            .similarity
            .check_plagiarism(&first_code, &second_code, &lang)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;
    metrics::PLAGIARISM_SECONDS
        .with_label_values(&["compare"])
        .observe(started.elapsed().as_secs_f64());

    Ok(Json(ComparisonReport {
        first: PairMember::from(&SubmissionRef::from(&first)),
        second: PairMember::from(&SubmissionRef::from(&second)),
        language,
        check,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanQuery {
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub assignment_id: Uuid,
    pub total_submissions: usize,
    pub pairs_found: usize,
    pub threshold: f64,
    pub pairs: Vec<PlagiarismPair>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// GET /assignments/:id/plagiarism?threshold=
pub async fn scan_assignment(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<Uuid>,
    Query(query): Query<ScanQuery>,
) -> ApiResult<Json<ScanReport>> {
    let assignment = require_assignment(&state, assignment_id).await?;
    let threshold = query.threshold.unwrap_or(state.similarity.threshold());
    if !(0.0..=100.0).contains(&threshold) {
        return Err(ApiError::Validation(
            "Threshold must be between 0 and 100".into(),
        ));
    }

    let submissions: Vec<SubmissionRef> = state
        .store
        .list_submissions(assignment_id)
        .await?
        .iter()
        .map(SubmissionRef::from)
        .collect();
    let total_submissions = submissions.len();

    if total_submissions < 2 {
        return Ok(Json(ScanReport {
            assignment_id,
            total_submissions,
            pairs_found: 0,
            threshold,
            pairs: Vec::new(),
            message: Some("Need at least 2 submissions to check for plagiarism".into()),
        }));
    }

    let started = Instant::now();
    let worker_state = state.clone();
    let language = assignment.language;
    let pairs = tokio::task::spawn_blocking(move || {
        worker_state
            .similarity
            .find_plagiarism_pairs(&submissions, &language, Some(threshold))
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;
    metrics::PLAGIARISM_SECONDS
        .with_label_values(&["scan"])
        .observe(started.elapsed().as_secs_f64());

    info!(
        assignment_id = %assignment_id,
        total_submissions,
        pairs_found = pairs.len(),
        threshold,
        "Plagiarism scan finished"
    );

    Ok(Json(ScanReport {
        assignment_id,
        total_submissions,
        pairs_found: pairs.len(),
        threshold,
        pairs,
        message: None,
    }))
}
