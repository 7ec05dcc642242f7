// Grader configuration
// Loaded from config/grader.json (or $GRADER_CONFIG) with environment overrides

use crate::types::{ComparisonKind, InputFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Concrete runtime for one language identifier on the execution service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageSpec {
    pub runtime: String,
    pub version: String,
    pub file_name: String,
    /// Override of the single-line comment markers stripped before similarity
    /// checks. Empty means both `//` and `#`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_comments: Vec<String>,
}

impl LanguageSpec {
    fn new(runtime: &str, version: &str, file_name: &str) -> Self {
        Self {
            runtime: runtime.to_string(),
            version: version.to_string(),
            file_name: file_name.to_string(),
            line_comments: Vec::new(),
        }
    }
}

/// Language identifier → runtime table, keyed by lowercase identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, LanguageSpec>",
    into = "BTreeMap<String, LanguageSpec>"
)]
pub struct LanguageTable(BTreeMap<String, LanguageSpec>);

impl From<BTreeMap<String, LanguageSpec>> for LanguageTable {
    fn from(raw: BTreeMap<String, LanguageSpec>) -> Self {
        let mut table = Self(BTreeMap::new());
        for (language, spec) in raw {
            table.insert(&language, spec);
        }
        table
    }
}

impl From<LanguageTable> for BTreeMap<String, LanguageSpec> {
    fn from(table: LanguageTable) -> Self {
        table.0
    }
}

impl LanguageTable {
    pub fn get(&self, language: &str) -> Option<&LanguageSpec> {
        self.0.get(&language.trim().to_lowercase())
    }

    pub fn insert(&mut self, language: &str, spec: LanguageSpec) {
        self.0.insert(language.trim().to_lowercase(), spec);
    }

    pub fn languages(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }
}

impl Default for LanguageTable {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert(
            "python".to_string(),
            LanguageSpec::new("python", "3.12.0", "main.py"),
        );
        table.insert(
            "javascript".to_string(),
            LanguageSpec::new("javascript", "20.11.1", "main.js"),
        );
        table.insert(
            "cpp".to_string(),
            LanguageSpec::new("c++", "10.2.0", "main.cpp"),
        );
        table.insert(
            "java".to_string(),
            LanguageSpec::new("java", "15.0.2", "Main.java"),
        );
        table.insert(
            "c".to_string(),
            LanguageSpec::new("c", "10.2.0", "main.c"),
        );
        Self(table)
    }
}

fn default_base_url() -> String {
    "http://localhost:2000".into()
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Base URL of the sandboxed execution service.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-call timeout. Default: 10s.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub languages: LanguageTable,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            languages: LanguageTable::default(),
        }
    }
}

/// Upper bounds (exclusive) of the four better performance bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bands {
    pub excellent: f64,
    pub good: f64,
    pub average: f64,
    pub below_average: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Excellent,
    Good,
    Average,
    BelowAverage,
    Poor,
}

impl Bands {
    pub fn classify(&self, value: f64) -> Band {
        if value < self.excellent {
            Band::Excellent
        } else if value < self.good {
            Band::Good
        } else if value < self.average {
            Band::Average
        } else if value < self.below_average {
            Band::BelowAverage
        } else {
            Band::Poor
        }
    }
}

fn default_runtime_bands() -> Bands {
    Bands {
        excellent: 200.0,
        good: 500.0,
        average: 1000.0,
        below_average: 2000.0,
    }
}

fn default_memory_bands() -> Bands {
    Bands {
        excellent: 10.0,
        good: 50.0,
        average: 100.0,
        below_average: 200.0,
    }
}

/// Runtime bands are in milliseconds, memory bands in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradingThresholds {
    #[serde(default = "default_runtime_bands")]
    pub runtime: Bands,
    #[serde(default = "default_memory_bands")]
    pub memory: Bands,
}

impl Default for GradingThresholds {
    fn default() -> Self {
        Self {
            runtime: default_runtime_bands(),
            memory: default_memory_bands(),
        }
    }
}

/// Fallbacks used when a test case leaves a setting unset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefaults {
    #[serde(default)]
    pub input_format: InputFormat,
    #[serde(default)]
    pub comparison_mode: ComparisonKind,
    #[serde(default)]
    pub tolerance: f64,
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        Self {
            input_format: InputFormat::Single,
            comparison_mode: ComparisonKind::Exact,
            tolerance: 0.0,
        }
    }
}

fn default_threshold() -> f64 {
    80.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlagiarismConfig {
    /// Similarity percentage at or above which a pair is flagged.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for PlagiarismConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_run_timeout_ms() -> u64 {
    300_000
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Attempts allowed per (student, assignment). 0 means unlimited.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Caller-level bound on one whole grading run.
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            run_timeout_ms: default_run_timeout_ms(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}

fn default_bind() -> String {
    "0.0.0.0:3000".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraderConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub grading: GradingThresholds,
    #[serde(default)]
    pub defaults: PipelineDefaults,
    #[serde(default)]
    pub plagiarism: PlagiarismConfig,
    #[serde(default)]
    pub submissions: SubmissionConfig,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            bind: default_bind(),
            execution: ExecutionConfig::default(),
            grading: GradingThresholds::default(),
            defaults: PipelineDefaults::default(),
            plagiarism: PlagiarismConfig::default(),
            submissions: SubmissionConfig::default(),
        }
    }
}

impl GraderConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load from $GRADER_CONFIG or config/grader.json, falling back to defaults
    /// when no file exists, then apply environment overrides.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = std::env::var("GRADER_CONFIG").unwrap_or_else(|_| "config/grader.json".into());
        let path = Path::new(&path);

        let config = if path.exists() {
            Self::load(path)?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply REDIS_URL, EXECUTION_URL, EXECUTION_TIMEOUT_MS and GRADER_BIND.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(url) = lookup("REDIS_URL") {
            self.redis_url = url;
        }
        if let Some(url) = lookup("EXECUTION_URL") {
            self.execution.base_url = url;
        }
        if let Some(raw) = lookup("EXECUTION_TIMEOUT_MS") {
            self.execution.timeout_ms = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "EXECUTION_TIMEOUT_MS",
                value: raw.clone(),
            })?;
        }
        if let Some(bind) = lookup("GRADER_BIND") {
            self.bind = bind;
        }
        Ok(self)
    }
}
