/// Code Execution Client - Remote Sandbox Dispatch
///
/// **Contract with the execution service:**
/// - `POST {base_url}/api/v2/execute`
/// - request: `{language, version, files: [{name, content}], stdin}`
/// - response: `{run: {stdout, stderr, code}}`
///
/// **Outcome vs. fault:**
/// - Anything the service answered (including compile errors, nonzero exit,
///   error responses) is an `ExecutionOutcome`
/// - Unsupported language, unreachable service, timeout and other transport
///   failures are an `ExecutionFault`
///
/// The service reports no memory figure; `memory_mb` is a size-based estimate.

use async_trait::async_trait;
use grader_common::config::{ExecutionConfig, LanguageTable};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Base figure of the memory estimate, in MB.
const BASE_MEMORY_MB: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionFault {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("Code execution service is not available ({0}). Please check if the execution service is running.")]
    ServiceUnavailable(String),
    #[error("Execution timed out after {0}ms")]
    Timeout(u64),
    #[error("Execution transport error: {0}")]
    Transport(String),
}

impl ExecutionFault {
    /// Faults that mean the grader is broken rather than the submission.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ExecutionFault::ServiceUnavailable(_) | ExecutionFault::Transport(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
    pub stdin: String,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>, stdin: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
            stdin: stdin.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub runtime_ms: u64,
    pub memory_mb: f64,
}

#[mockall::automock]
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, ExecutionFault>;
}

#[derive(Debug, Serialize)]
struct SourceFile<'a> {
    name: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ExecutePayload<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<SourceFile<'a>>,
    stdin: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    run: RunSection,
}

#[derive(Debug, Deserialize)]
struct RunSection {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// `5 MB + (stdout + stderr bytes) / 1024 / 1024`.
pub fn estimate_memory_mb(stdout: &str, stderr: &str) -> f64 {
    let kilobytes = (stdout.len() + stderr.len()) as f64 / 1024.0;
    BASE_MEMORY_MB + kilobytes / 1024.0
}

/// HTTP client for the sandboxed execution service.
#[derive(Debug, Clone)]
pub struct ExecutionClient {
    http: reqwest::Client,
    endpoint: String,
    timeout_ms: u64,
    languages: LanguageTable,
}

impl ExecutionClient {
    pub fn new(config: &ExecutionConfig) -> Result<Self, ExecutionFault> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ExecutionFault::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/api/v2/execute", config.base_url.trim_end_matches('/')),
            timeout_ms: config.timeout_ms,
            languages: config.languages.clone(),
        })
    }

    pub fn languages(&self) -> &LanguageTable {
        &self.languages
    }

    fn classify(&self, error: reqwest::Error) -> ExecutionFault {
        if error.is_timeout() {
            ExecutionFault::Timeout(self.timeout_ms)
        } else if error.is_connect() {
            ExecutionFault::ServiceUnavailable(self.endpoint.clone())
        } else {
            ExecutionFault::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl CodeExecutor for ExecutionClient {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, ExecutionFault> {
        let spec = self
            .languages
            .get(&request.language)
            .ok_or_else(|| ExecutionFault::UnsupportedLanguage(request.language.clone()))?;

        let payload = ExecutePayload {
            language: &spec.runtime,
            version: &spec.version,
            files: vec![SourceFile {
                name: &spec.file_name,
                content: &request.code,
            }],
            stdin: &request.stdin,
        };

        let start = Instant::now();
        let response = self
            .http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body: ErrorBody = response.json().await.unwrap_or_default();
            let runtime_ms = start.elapsed().as_millis() as u64;
            tracing::debug!(
                status = status.as_u16(),
                language = %request.language,
                "Execution service returned an error response"
            );
            return Ok(ExecutionOutcome {
                stdout: String::new(),
                stderr: body.message.unwrap_or_else(|| "Execution failed".to_string()),
                exit_code: 1,
                runtime_ms,
                memory_mb: 0.0,
            });
        }

        let body: ExecuteResponse = response.json().await.map_err(|e| self.classify(e))?;
        let runtime_ms = start.elapsed().as_millis() as u64;

        let stdout = body.run.stdout.unwrap_or_default();
        let stderr = body.run.stderr.unwrap_or_default();
        let memory_mb = estimate_memory_mb(&stdout, &stderr);

        Ok(ExecutionOutcome {
            stdout: stdout.trim().to_string(),
            stderr,
            exit_code: body.run.code.unwrap_or(0),
            runtime_ms,
            memory_mb,
        })
    }
}
