// CLI commands for local grading and similarity checks
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use grader_common::config::GraderConfig;
use grader_common::store::MemoryStore;
use grader_common::types::{InputFormat, NewTestCase, TestCase};
use grader_core::execution::ExecutionClient;
use grader_core::formatter;
use grader_core::grading::GradingEngine;
use grader_core::runner::{RunReport, TestRunner};
use grader_core::similarity::{SimilarityEngine, SubmissionRef};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Load configuration from an explicit path, or the default lookup chain
pub fn load_config(path: Option<&Path>) -> Result<GraderConfig> {
    let config = match path {
        Some(path) => GraderConfig::load(path)?
            .with_env_overrides(|key| std::env::var(key).ok())?,
        None => GraderConfig::load_default()?,
    };
    Ok(config)
}

/// Parse a JSON array of test cases. Every case gets the same throwaway
/// assignment id; omitted fields take the usual defaults.
fn load_test_cases(path: &Path, assignment_id: Uuid) -> Result<Vec<TestCase>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let raw: Vec<Value> = serde_json::from_str(&content)
        .with_context(|| format!("{} must be a JSON array of test cases", path.display()))?;

    raw.into_iter()
        .enumerate()
        .map(|(index, mut case)| {
            let Some(fields) = case.as_object_mut() else {
                bail!("Test case #{} is not an object", index + 1);
            };
            fields.insert("assignment_id".into(), Value::String(assignment_id.to_string()));
            let case: NewTestCase = serde_json::from_value(case)
                .with_context(|| format!("Test case #{} is invalid", index + 1))?;
            Ok(case.into_test_case())
        })
        .collect()
}

/// Grade a local source file against a test case file
pub async fn grade(
    config: &GraderConfig,
    file: &Path,
    language: &str,
    tests: &Path,
    max_score: u32,
    json: bool,
) -> Result<()> {
    let code = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let cases = load_test_cases(tests, Uuid::new_v4())?;
    if config.execution.languages.get(language).is_none() {
        bail!(
            "Unsupported language '{}'. Configured: {}",
            language,
            config.execution.languages.languages().join(", ")
        );
    }

    if !json {
        println!("🚀 Grading {} ({}) against {} test case(s)...", file.display(), language, cases.len());
    }

    let executor = ExecutionClient::new(&config.execution)?;
    let runner = TestRunner::new(Arc::new(MemoryStore::new()), Arc::new(executor), config.defaults);
    let report = runner.run_cases(&code, language, &cases).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&report, GradingEngine::new(config.grading), max_score);
    Ok(())
}

fn print_report(report: &RunReport, engine: GradingEngine, max_score: u32) {
    println!("\n{:<4} {:<8} {:>10} {:>10}  {}", "#", "Result", "Time (ms)", "Mem (MB)", "Detail");
    println!("{}", "─".repeat(72));

    for (index, case) in report.test_results.iter().enumerate() {
        let detail = match (&case.error, case.passed) {
            (Some(error), _) => error.lines().next().unwrap_or_default().to_string(),
            (None, true) => String::new(),
            (None, false) => format!(
                "expected {:?}, got {:?}",
                case.expected_output.trim(),
                case.actual_output.trim()
            ),
        };
        println!(
            "{:<4} {:<8} {:>10} {:>10.2}  {}",
            index + 1,
            if case.passed { "✅ pass" } else { "❌ fail" },
            case.runtime_ms,
            case.memory_mb,
            detail
        );
    }

    let score = engine.calculate_grade(
        report.avg_runtime_ms,
        report.avg_memory_mb,
        report.passed_tests,
        report.total_tests,
        max_score as f64,
    );
    let letter = engine.letter_grade(
        report.avg_runtime_ms,
        report.avg_memory_mb,
        report.passed_tests,
        report.total_tests,
    );

    println!("\n📋 Passed: {}/{}", report.passed_tests, report.total_tests);
    println!("⏱️  Avg runtime: {} ms, avg memory: {} MB", report.avg_runtime_ms, report.avg_memory_mb);
    println!("✅ Score: {}/{} (letter grade {})", score.round().clamp(0.0, max_score as f64), max_score, letter);
}

/// Compare two files
pub fn compare(config: &GraderConfig, first: &Path, second: &Path, language: &str) -> Result<()> {
    let first_code = fs::read_to_string(first)
        .with_context(|| format!("Failed to read {}", first.display()))?;
    let second_code = fs::read_to_string(second)
        .with_context(|| format!("Failed to read {}", second.display()))?;

    let engine = SimilarityEngine::new(&config.plagiarism, &config.execution.languages);
    let check = engine.check_plagiarism(&first_code, &second_code, language);

    println!("📊 {} vs {}", first.display(), second.display());
    println!("   Similarity: {}% (threshold {}%)", check.similarity, check.threshold);
    if check.is_plagiarized {
        println!("⚠️  {}", check.message);
    } else {
        println!("✅ {}", check.message);
    }
    Ok(())
}

/// Read every regular file in `dir` as one submission, keyed by file stem.
fn load_submissions(dir: &Path) -> Result<Vec<SubmissionRef>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;

    let mut submissions = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let code = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let submitted_at: DateTime<Utc> = fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        let student_id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        submissions.push(SubmissionRef {
            submission_id: Uuid::new_v4(),
            student_name: Some(student_id.clone()),
            student_id,
            submitted_at,
            code,
        });
    }
    submissions.sort_by(|a, b| a.student_id.cmp(&b.student_id));
    Ok(submissions)
}

/// Scan a directory of submissions for similar pairs
pub fn scan(config: &GraderConfig, dir: &Path, language: &str, threshold: Option<f64>) -> Result<()> {
    if let Some(t) = threshold {
        if !(0.0..=100.0).contains(&t) {
            bail!("Threshold must be between 0 and 100");
        }
    }

    let submissions = load_submissions(dir)?;
    if submissions.len() < 2 {
        println!("Need at least 2 submissions to check for plagiarism.");
        return Ok(());
    }

    let engine = SimilarityEngine::new(&config.plagiarism, &config.execution.languages);
    let threshold = threshold.unwrap_or(engine.threshold());
    println!("📊 Scanning {} submission(s) at {}%...", submissions.len(), threshold);

    let pairs = engine.find_plagiarism_pairs(&submissions, language, Some(threshold));
    if pairs.is_empty() {
        println!("✅ No pairs at or above {}%", threshold);
        return Ok(());
    }

    println!("\n{:<20} {:<20} {:>10}", "First", "Second", "Similarity");
    println!("{}", "─".repeat(52));
    for pair in &pairs {
        println!(
            "{:<20} {:<20} {:>9}%{}",
            pair.first.student_id,
            pair.second.student_id,
            pair.similarity,
            if pair.is_plagiarized { " ⚠️" } else { "" }
        );
    }
    println!("\n⚠️  Total: {} pair(s)", pairs.len());
    Ok(())
}

/// Print the stdin a test input produces under `format`
pub fn format_input(input: &str, format: &str) -> Result<()> {
    let value: Value = serde_json::from_str(input).context("Input must be valid JSON")?;
    let format: InputFormat = format.parse().unwrap_or_default();

    let validation = formatter::validate(&value, format);
    if !validation.valid {
        bail!(
            "Invalid {} input: {}",
            format,
            validation.error.unwrap_or_default()
        );
    }
    print!("{}", formatter::ensure_trailing_newline(&formatter::format(&value, format)));
    Ok(())
}

/// List configured languages
pub fn list_languages(config: &GraderConfig) {
    let languages = config.execution.languages.languages();

    println!("📋 Configured Languages:\n");
    println!("{:<12} {:<10} {:<10} {:<16} {}", "Name", "Runtime", "Version", "File", "Comments");
    println!("{}", "─".repeat(64));

    for name in &languages {
        if let Some(spec) = config.execution.languages.get(name) {
            println!(
                "{:<12} {:<10} {:<10} {:<16} {}",
                name,
                spec.runtime,
                spec.version,
                spec.file_name,
                if spec.line_comments.is_empty() {
                    "// #".to_string()
                } else {
                    spec.line_comments.join(" ")
                }
            );
        }
    }

    println!("\n✅ Total: {} language(s)", languages.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use grader_common::types::ComparisonKind;

    fn make_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("grader-cli-{}-{}", name, Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_test_cases_applies_defaults() {
        let dir = make_dir("cases");
        let path = dir.join("tests.json");
        fs::write(
            &path,
            r#"[
                {"input": [1, 2], "expected_output": "3"},
                {"input": "x", "expected_output": "1.0", "comparison_mode": "numeric_tolerance", "tolerance": 0.01}
            ]"#,
        )
        .unwrap();

        let assignment_id = Uuid::new_v4();
        let cases = load_test_cases(&path, assignment_id).unwrap();
        assert_eq!(cases.len(), 2);
        assert!(cases.iter().all(|c| c.assignment_id == assignment_id));
        assert_eq!(cases[0].points, 10);
        assert_eq!(cases[1].comparison_mode, Some(ComparisonKind::NumericTolerance));
        assert_eq!(cases[1].tolerance, Some(0.01));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_load_test_cases_rejects_non_objects() {
        let dir = make_dir("bad-cases");
        let path = dir.join("tests.json");
        fs::write(&path, "[1, 2]").unwrap();

        let err = load_test_cases(&path, Uuid::new_v4()).unwrap_err();
        assert!(err.to_string().contains("Test case #1"));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_load_submissions_keys_by_file_stem() {
        let dir = make_dir("subs");
        fs::write(dir.join("bob.py"), "print(2)\n").unwrap();
        fs::write(dir.join("alice.py"), "print(1)\n").unwrap();
        fs::create_dir_all(dir.join("nested")).unwrap();

        let submissions = load_submissions(&dir).unwrap();
        let ids: Vec<&str> = submissions.iter().map(|s| s.student_id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob"]);
        assert_eq!(submissions[0].code, "print(1)\n");

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_format_input_rejects_bad_matrix() {
        let err = format_input(r#"{"rows": 1, "cols": 2, "data": 5}"#, "matrix").unwrap_err();
        assert!(err.to_string().starts_with("Invalid matrix input"));
        assert!(format_input("[1, 2, 3]", "array").is_ok());
        assert!(format_input("not json", "single").is_err());
    }
}
