// Record store boundary
// Generic persistence for assignments, test cases, submissions and test results,
// plus the grading job queue. Redis backs production; MemoryStore backs tests and the CLI.

use crate::types::{Assignment, GradeJob, Submission, TestCase, TestResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },
    #[error("Maximum resubmission limit reached. You have already submitted {used} time(s). Maximum allowed: {max} submissions per assignment.")]
    AttemptLimit { used: usize, max: usize },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_assignment(&self, assignment: &Assignment) -> StoreResult<()>;
    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>>;

    async fn create_test_case(&self, test_case: &TestCase) -> StoreResult<()>;
    async fn get_test_case(&self, id: Uuid) -> StoreResult<Option<TestCase>>;
    /// Overwrite an existing test case. Fails with NotFound if it does not exist.
    async fn update_test_case(&self, test_case: &TestCase) -> StoreResult<()>;
    /// Returns false when nothing was deleted.
    async fn delete_test_case(&self, id: Uuid) -> StoreResult<bool>;
    /// Test cases of an assignment in creation order.
    async fn list_test_cases(&self, assignment_id: Uuid) -> StoreResult<Vec<TestCase>>;

    async fn create_submission(&self, submission: &Submission) -> StoreResult<()>;
    /// Store `submission` as the student's next attempt, counting and inserting
    /// in one step. Fails with AttemptLimit once `max_attempts` exist (0 means
    /// unlimited). Returns the 1-based attempt number.
    async fn create_attempt(&self, submission: &Submission, max_attempts: usize)
        -> StoreResult<usize>;
    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<Submission>>;
    async fn list_submissions(&self, assignment_id: Uuid) -> StoreResult<Vec<Submission>>;
    /// All attempts of one student on one assignment, oldest first.
    async fn list_attempts(&self, assignment_id: Uuid, student_id: &str)
        -> StoreResult<Vec<Submission>>;

    /// Persist a finished grading run: the submission row is overwritten and the
    /// submission's previous results are replaced by `results`, as one atomic step.
    async fn record_grading(&self, submission: &Submission, results: &[TestResult])
        -> StoreResult<()>;
    async fn list_results(&self, submission_id: Uuid) -> StoreResult<Vec<TestResult>>;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push_job(&self, job: &GradeJob) -> StoreResult<()>;
    /// Blocks up to `timeout` waiting for a job.
    async fn pop_job(&self, timeout: Duration) -> StoreResult<Option<GradeJob>>;
}

#[derive(Default)]
struct MemoryState {
    assignments: HashMap<Uuid, Assignment>,
    test_cases: HashMap<Uuid, TestCase>,
    test_case_order: HashMap<Uuid, Vec<Uuid>>,
    submissions: HashMap<Uuid, Submission>,
    submission_order: HashMap<Uuid, Vec<Uuid>>,
    results: HashMap<Uuid, Vec<TestResult>>,
}

/// In-process store. Every operation holds a single lock, so `record_grading`
/// is atomic with respect to readers.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    queue: Mutex<VecDeque<GradeJob>>,
    queued: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_assignment(&self, assignment: &Assignment) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.assignments.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        Ok(self.state.read().await.assignments.get(&id).cloned())
    }

    async fn create_test_case(&self, test_case: &TestCase) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.test_cases.insert(test_case.id, test_case.clone());
        state
            .test_case_order
            .entry(test_case.assignment_id)
            .or_default()
            .push(test_case.id);
        Ok(())
    }

    async fn get_test_case(&self, id: Uuid) -> StoreResult<Option<TestCase>> {
        Ok(self.state.read().await.test_cases.get(&id).cloned())
    }

    async fn update_test_case(&self, test_case: &TestCase) -> StoreResult<()> {
        let mut state = self.state.write().await;
        match state.test_cases.get_mut(&test_case.id) {
            Some(existing) => {
                *existing = test_case.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "Test case",
                id: test_case.id,
            }),
        }
    }

    async fn delete_test_case(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let Some(removed) = state.test_cases.remove(&id) else {
            return Ok(false);
        };
        if let Some(order) = state.test_case_order.get_mut(&removed.assignment_id) {
            order.retain(|existing| *existing != id);
        }
        Ok(true)
    }

    async fn list_test_cases(&self, assignment_id: Uuid) -> StoreResult<Vec<TestCase>> {
        let state = self.state.read().await;
        Ok(state
            .test_case_order
            .get(&assignment_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.test_cases.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_submission(&self, submission: &Submission) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.submissions.insert(submission.id, submission.clone());
        state
            .submission_order
            .entry(submission.assignment_id)
            .or_default()
            .push(submission.id);
        Ok(())
    }

    async fn create_attempt(
        &self,
        submission: &Submission,
        max_attempts: usize,
    ) -> StoreResult<usize> {
        let mut state = self.state.write().await;
        let used = state
            .submission_order
            .get(&submission.assignment_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.submissions.get(id))
                    .filter(|existing| existing.student_id == submission.student_id)
                    .count()
            })
            .unwrap_or_default();
        if max_attempts > 0 && used >= max_attempts {
            return Err(StoreError::AttemptLimit {
                used,
                max: max_attempts,
            });
        }

        state.submissions.insert(submission.id, submission.clone());
        state
            .submission_order
            .entry(submission.assignment_id)
            .or_default()
            .push(submission.id);
        Ok(used + 1)
    }

    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<Submission>> {
        Ok(self.state.read().await.submissions.get(&id).cloned())
    }

    async fn list_submissions(&self, assignment_id: Uuid) -> StoreResult<Vec<Submission>> {
        let state = self.state.read().await;
        Ok(state
            .submission_order
            .get(&assignment_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.submissions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_attempts(
        &self,
        assignment_id: Uuid,
        student_id: &str,
    ) -> StoreResult<Vec<Submission>> {
        Ok(self
            .list_submissions(assignment_id)
            .await?
            .into_iter()
            .filter(|submission| submission.student_id == student_id)
            .collect())
    }

    async fn record_grading(
        &self,
        submission: &Submission,
        results: &[TestResult],
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.submissions.contains_key(&submission.id) {
            return Err(StoreError::NotFound {
                kind: "Submission",
                id: submission.id,
            });
        }
        state.submissions.insert(submission.id, submission.clone());
        state.results.insert(submission.id, results.to_vec());
        Ok(())
    }

    async fn list_results(&self, submission_id: Uuid) -> StoreResult<Vec<TestResult>> {
        Ok(self
            .state
            .read()
            .await
            .results
            .get(&submission_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl JobQueue for MemoryStore {
    async fn push_job(&self, job: &GradeJob) -> StoreResult<()> {
        self.queue.lock().await.push_back(job.clone());
        self.queued.notify_one();
        Ok(())
    }

    async fn pop_job(&self, timeout: Duration) -> StoreResult<Option<GradeJob>> {
        if let Some(job) = self.queue.lock().await.pop_front() {
            return Ok(Some(job));
        }
        let _ = tokio::time::timeout(timeout, self.queued.notified()).await;
        Ok(self.queue.lock().await.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewTestCase, SubmissionStatus};
    use chrono::Utc;
    use serde_json::json;

    fn make_test_case(assignment_id: Uuid, expected: &str) -> TestCase {
        NewTestCase {
            assignment_id,
            input: json!(1),
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

    fn make_submission(assignment_id: Uuid, student_id: &str) -> Submission {
        Submission {
            id: Uuid::new_v4(),
            assignment_id,
            student_id: student_id.to_string(),
            student_name: None,
            code: "print(1)".to_string(),
            language: "python".to_string(),
            status: SubmissionStatus::Pending,
            score: None,
            max_score: 100,
            avg_runtime_ms: None,
            error: None,
            submitted_at: Utc::now(),
            graded_at: None,
        }
    }

    fn make_result(submission_id: Uuid, test_case_id: Uuid, passed: bool) -> TestResult {
        TestResult {
            submission_id,
            test_case_id,
            passed,
            actual_output: String::new(),
            runtime_ms: 10,
            memory_mb: 5.0,
            error: None,
            comparison: None,
        }
    }

    #[tokio::test]
    async fn test_test_cases_keep_creation_order() {
        let store = MemoryStore::new();
        let assignment_id = Uuid::new_v4();
        let first = make_test_case(assignment_id, "1");
        let second = make_test_case(assignment_id, "2");
        let third = make_test_case(assignment_id, "3");
        for tc in [&first, &second, &third] {
            store.create_test_case(tc).await.unwrap();
        }
        store
            .create_test_case(&make_test_case(Uuid::new_v4(), "other"))
            .await
            .unwrap();

        assert!(store.delete_test_case(second.id).await.unwrap());
        assert!(!store.delete_test_case(second.id).await.unwrap());

        let listed = store.list_test_cases(assignment_id).await.unwrap();
        let expected: Vec<&str> = listed.iter().map(|tc| tc.expected_output.as_str()).collect();
        assert_eq!(expected, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_update_missing_test_case_fails() {
        let store = MemoryStore::new();
        let tc = make_test_case(Uuid::new_v4(), "x");
        let err = store.update_test_case(&tc).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_record_grading_replaces_previous_results() {
        let store = MemoryStore::new();
        let assignment_id = Uuid::new_v4();
        let mut submission = make_submission(assignment_id, "s1");
        store.create_submission(&submission).await.unwrap();

        let tc = Uuid::new_v4();
        store
            .record_grading(&submission, &[make_result(submission.id, tc, false)])
            .await
            .unwrap();

        submission.status = SubmissionStatus::Graded;
        submission.score = Some(100.0);
        store
            .record_grading(
                &submission,
                &[make_result(submission.id, tc, true), make_result(submission.id, Uuid::new_v4(), true)],
            )
            .await
            .unwrap();

        let results = store.list_results(submission.id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.passed));
        let stored = store.get_submission(submission.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Graded);
    }

    #[tokio::test]
    async fn test_attempts_are_separate_rows() {
        let store = MemoryStore::new();
        let assignment_id = Uuid::new_v4();
        for student in ["alice", "alice", "bob"] {
            store
                .create_submission(&make_submission(assignment_id, student))
                .await
                .unwrap();
        }
        assert_eq!(store.list_attempts(assignment_id, "alice").await.unwrap().len(), 2);
        assert_eq!(store.list_submissions(assignment_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_attempt_cap_holds_under_concurrency() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let assignment_id = Uuid::new_v4();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .create_attempt(&make_submission(assignment_id, "alice"), 3)
                        .await
                })
            })
            .collect();

        let mut attempts = Vec::new();
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(attempt) => attempts.push(attempt),
                Err(StoreError::AttemptLimit { used, max }) => {
                    assert_eq!((used, max), (3, 3));
                    rejected += 1;
                }
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        attempts.sort_unstable();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(rejected, 7);
        assert_eq!(store.list_attempts(assignment_id, "alice").await.unwrap().len(), 3);

        // other students and unlimited caps are unaffected
        assert_eq!(
            store
                .create_attempt(&make_submission(assignment_id, "bob"), 3)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .create_attempt(&make_submission(assignment_id, "alice"), 0)
                .await
                .unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn test_memory_queue_is_fifo() {
        let store = MemoryStore::new();
        let first = GradeJob::for_submission(Uuid::new_v4());
        let second = GradeJob::for_submission(Uuid::new_v4());
        store.push_job(&first).await.unwrap();
        store.push_job(&second).await.unwrap();

        let timeout = Duration::from_millis(10);
        assert_eq!(store.pop_job(timeout).await.unwrap().unwrap().id, first.id);
        assert_eq!(store.pop_job(timeout).await.unwrap().unwrap().id, second.id);
        assert!(store.pop_job(timeout).await.unwrap().is_none());
    }
}
