use crate::store::{JobQueue, RecordStore, StoreError, StoreResult};
use crate::types::{Assignment, GradeJob, Submission, TestCase, TestResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

// Redis key semantics - shared by API and worker.
// Records are JSON strings under deterministic keys; ordered membership
// (creation order) lives in lists next to the owning record.

pub const QUEUE_KEY: &str = "grader:queue:grading";
pub const ASSIGNMENT_PREFIX: &str = "grader:assignment";
pub const TEST_CASE_PREFIX: &str = "grader:testcase";
pub const SUBMISSION_PREFIX: &str = "grader:submission";

pub fn assignment_key(id: &Uuid) -> String {
    format!("{}:{}", ASSIGNMENT_PREFIX, id)
}

pub fn assignment_test_cases_key(assignment_id: &Uuid) -> String {
    format!("{}:{}:testcases", ASSIGNMENT_PREFIX, assignment_id)
}

pub fn assignment_submissions_key(assignment_id: &Uuid) -> String {
    format!("{}:{}:submissions", ASSIGNMENT_PREFIX, assignment_id)
}

pub fn student_attempts_key(assignment_id: &Uuid, student_id: &str) -> String {
    format!("{}:{}:student:{}", ASSIGNMENT_PREFIX, assignment_id, student_id)
}

pub fn test_case_key(id: &Uuid) -> String {
    format!("{}:{}", TEST_CASE_PREFIX, id)
}

pub fn submission_key(id: &Uuid) -> String {
    format!("{}:{}", SUBMISSION_PREFIX, id)
}

pub fn results_key(submission_id: &Uuid) -> String {
    format!("{}:{}:results", SUBMISSION_PREFIX, submission_id)
}

// KEYS: submission record, assignment list, student attempt list.
// ARGV: submission JSON, submission id, attempt cap (0 = unlimited).
// Replies {accepted, attempts}.
const CREATE_ATTEMPT_SCRIPT: &str = r#"
local used = redis.call('LLEN', KEYS[3])
local max = tonumber(ARGV[3])
if max > 0 and used >= max then
  return {0, used}
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('RPUSH', KEYS[2], ARGV[2])
redis.call('RPUSH', KEYS[3], ARGV[2])
return {1, used + 1}
"#;

/// Redis-backed record store and grading queue.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(key).await?;
        match payload {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(value)?;
        let _: () = conn.set(key, payload).await?;
        Ok(())
    }

    /// Fetch every record whose id is listed under `list_key`, keeping list order.
    async fn get_listed<T: DeserializeOwned>(
        &self,
        list_key: &str,
        record_key: fn(&Uuid) -> String,
    ) -> StoreResult<Vec<T>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.lrange(list_key, 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .filter_map(|id| Uuid::parse_str(id).ok())
            .map(|id| record_key(&id))
            .collect();
        let payloads: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        payloads
            .into_iter()
            .flatten()
            .map(|data| serde_json::from_str(&data).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn create_assignment(&self, assignment: &Assignment) -> StoreResult<()> {
        self.set_json(&assignment_key(&assignment.id), assignment).await
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        self.get_json(&assignment_key(&id)).await
    }

    async fn create_test_case(&self, test_case: &TestCase) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(test_case)?;
        let _: () = redis::pipe()
            .atomic()
            .set(test_case_key(&test_case.id), payload)
            .ignore()
            .rpush(
                assignment_test_cases_key(&test_case.assignment_id),
                test_case.id.to_string(),
            )
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_test_case(&self, id: Uuid) -> StoreResult<Option<TestCase>> {
        self.get_json(&test_case_key(&id)).await
    }

    async fn update_test_case(&self, test_case: &TestCase) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(test_case)?;
        // SET XX only overwrites an existing key
        let updated: Option<String> = redis::cmd("SET")
            .arg(test_case_key(&test_case.id))
            .arg(payload)
            .arg("XX")
            .query_async(&mut conn)
            .await?;
        match updated {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                kind: "Test case",
                id: test_case.id,
            }),
        }
    }

    async fn delete_test_case(&self, id: Uuid) -> StoreResult<bool> {
        let Some(existing) = self.get_test_case(id).await? else {
            return Ok(false);
        };
        let mut conn = self.conn.clone();
        let (deleted,): (i64,) = redis::pipe()
            .atomic()
            .del(test_case_key(&id))
            .lrem(assignment_test_cases_key(&existing.assignment_id), 0, id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn list_test_cases(&self, assignment_id: Uuid) -> StoreResult<Vec<TestCase>> {
        self.get_listed(&assignment_test_cases_key(&assignment_id), test_case_key)
            .await
    }

    async fn create_submission(&self, submission: &Submission) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(submission)?;
        let id = submission.id.to_string();
        let _: () = redis::pipe()
            .atomic()
            .set(submission_key(&submission.id), payload)
            .ignore()
            .rpush(assignment_submissions_key(&submission.assignment_id), &id)
            .ignore()
            .rpush(
                student_attempts_key(&submission.assignment_id, &submission.student_id),
                &id,
            )
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn create_attempt(
        &self,
        submission: &Submission,
        max_attempts: usize,
    ) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(submission)?;
        // scripts run atomically, so concurrent submits cannot both pass the LLEN check
        let (accepted, attempts): (i64, i64) = redis::Script::new(CREATE_ATTEMPT_SCRIPT)
            .key(submission_key(&submission.id))
            .key(assignment_submissions_key(&submission.assignment_id))
            .key(student_attempts_key(&submission.assignment_id, &submission.student_id))
            .arg(payload)
            .arg(submission.id.to_string())
            .arg(max_attempts)
            .invoke_async(&mut conn)
            .await?;

        let attempts = attempts.max(0) as usize;
        if accepted == 0 {
            return Err(StoreError::AttemptLimit {
                used: attempts,
                max: max_attempts,
            });
        }
        Ok(attempts)
    }

    async fn get_submission(&self, id: Uuid) -> StoreResult<Option<Submission>> {
        self.get_json(&submission_key(&id)).await
    }

    async fn list_submissions(&self, assignment_id: Uuid) -> StoreResult<Vec<Submission>> {
        self.get_listed(&assignment_submissions_key(&assignment_id), submission_key)
            .await
    }

    async fn list_attempts(
        &self,
        assignment_id: Uuid,
        student_id: &str,
    ) -> StoreResult<Vec<Submission>> {
        self.get_listed(&student_attempts_key(&assignment_id, student_id), submission_key)
            .await
    }

    async fn record_grading(
        &self,
        submission: &Submission,
        results: &[TestResult],
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let submission_payload = serde_json::to_string(submission)?;
        let results_payload = serde_json::to_string(results)?;
        let results_key = results_key(&submission.id);

        // MULTI/EXEC: submission row, old results and new results change together
        let _: () = redis::pipe()
            .atomic()
            .set(submission_key(&submission.id), submission_payload)
            .ignore()
            .del(&results_key)
            .ignore()
            .set(&results_key, results_payload)
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!(
            submission_id = %submission.id,
            results = results.len(),
            "Grading persisted"
        );
        Ok(())
    }

    async fn list_results(&self, submission_id: Uuid) -> StoreResult<Vec<TestResult>> {
        Ok(self
            .get_json(&results_key(&submission_id))
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl JobQueue for RedisStore {
    /// RPUSH for FIFO semantics
    async fn push_job(&self, job: &GradeJob) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(job)?;
        let _: () = conn.rpush(QUEUE_KEY, payload).await?;
        Ok(())
    }

    /// BLPOP with timeout so the worker loop can observe shutdown
    async fn pop_job(&self, timeout: Duration) -> StoreResult<Option<GradeJob>> {
        let mut conn = self.conn.clone();
        let result: Option<(String, String)> =
            conn.blpop(QUEUE_KEY, timeout.as_secs_f64()).await?;

        match result {
            Some((_key, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_naming() {
        let id = Uuid::new_v4();
        assert_eq!(assignment_key(&id), format!("grader:assignment:{}", id));
        assert_eq!(
            assignment_test_cases_key(&id),
            format!("grader:assignment:{}:testcases", id)
        );
        assert_eq!(
            student_attempts_key(&id, "s42"),
            format!("grader:assignment:{}:student:s42", id)
        );
        assert_eq!(results_key(&id), format!("grader:submission:{}:results", id));
    }

    #[test]
    fn test_keys_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(submission_key(&id), submission_key(&id));
        assert!(test_case_key(&id).starts_with("grader:testcase:"));
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_record_grading_roundtrip() {
        use crate::types::SubmissionStatus;
        use chrono::Utc;

        let store = RedisStore::connect("redis://127.0.0.1:6379").await.unwrap();
        let submission = Submission {
            id: Uuid::new_v4(),
            assignment_id: Uuid::new_v4(),
            student_id: "redis-test".to_string(),
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
        };
        store.create_submission(&submission).await.unwrap();

        let result = TestResult {
            submission_id: submission.id,
            test_case_id: Uuid::new_v4(),
            passed: true,
            actual_output: "1".to_string(),
            runtime_ms: 12,
            memory_mb: 5.0,
            error: None,
            comparison: None,
        };
        store.record_grading(&submission, &[result.clone()]).await.unwrap();
        store.record_grading(&submission, &[result]).await.unwrap();

        assert_eq!(store.list_results(submission.id).await.unwrap().len(), 1);

        let mut retry = submission.clone();
        retry.id = Uuid::new_v4();
        assert!(matches!(
            store.create_attempt(&retry, 1).await,
            Err(StoreError::AttemptLimit { used: 1, max: 1 })
        ));
        assert_eq!(store.create_attempt(&retry, 2).await.unwrap(), 2);
        assert_eq!(
            store
                .list_attempts(submission.assignment_id, "redis-test")
                .await
                .unwrap()
                .len(),
            2
        );
    }
}
