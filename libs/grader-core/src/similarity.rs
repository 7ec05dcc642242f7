/// Similarity Engine - Plagiarism Detection over Submission Code
///
/// **Normalization (per code string, in order):**
/// - line comments stripped to end of line: both `//` and `#`, unless the
///   language table overrides the markers
/// - `/* ... */`, `""" ... """` and `''' ... '''` blocks stripped (shortest match)
/// - whitespace runs collapsed to one space, trimmed, lowercased
///
/// **Metric:**
/// `(max_len - edit_distance) / max_len * 100`, over chars, rounded to 2 decimals.
/// Identical strings score 100; an empty side scores 0.
///
/// **Batch scan:**
/// Every unordered pair once, cheap `PairFilter` first, full edit distance in
/// parallel (rayon), results sorted by similarity descending.

use crate::round2;
use chrono::{DateTime, Utc};
use grader_common::config::{LanguageTable, PlagiarismConfig};
use grader_common::types::Submission;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

const PREVIEW_CHARS: usize = 200;
const DEFAULT_LINE_COMMENTS: [&str; 2] = ["//", "#"];
const BLOCK_COMMENTS: [(&str, &str); 3] = [("/*", "*/"), ("\"\"\"", "\"\"\""), ("'''", "'''")];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlagiarismCheck {
    pub similarity: f64,
    pub is_plagiarized: bool,
    pub threshold: f64,
    /// First 200 chars of each normalized submission.
    pub normalized_first: String,
    pub normalized_second: String,
    pub message: String,
}

/// Code plus the identifying metadata reported with a flagged pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRef {
    pub submission_id: Uuid,
    pub student_id: String,
    pub student_name: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub code: String,
}

impl From<&Submission> for SubmissionRef {
    fn from(submission: &Submission) -> Self {
        Self {
            submission_id: submission.id,
            student_id: submission.student_id.clone(),
            student_name: submission.student_name.clone(),
            submitted_at: submission.submitted_at,
            code: submission.code.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairMember {
    pub submission_id: Uuid,
    pub student_id: String,
    pub student_name: String,
    pub submitted_at: DateTime<Utc>,
}

impl From<&SubmissionRef> for PairMember {
    fn from(submission: &SubmissionRef) -> Self {
        Self {
            submission_id: submission.submission_id,
            student_id: submission.student_id.clone(),
            student_name: submission
                .student_name
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            submitted_at: submission.submitted_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlagiarismPair {
    pub first: PairMember,
    pub second: PairMember,
    pub similarity: f64,
    /// Judged against the configured threshold, not the scan threshold.
    pub is_plagiarized: bool,
}

/// Cheap test run before the full edit distance of a batch scan.
pub trait PairFilter: Send + Sync {
    /// `false` only when the normalized pair cannot reach `threshold`.
    fn may_reach(&self, first: &str, second: &str, threshold: f64) -> bool;
}

/// Length bound: edit distance is at least the length difference, so
/// similarity never exceeds `min_len / max_len * 100`. Never drops a real match.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthBound;

impl PairFilter for LengthBound {
    fn may_reach(&self, first: &str, second: &str, threshold: f64) -> bool {
        let (a, b) = (first.chars().count(), second.chars().count());
        let longest = a.max(b);
        let bound = if a == 0 || b == 0 {
            0.0
        } else {
            a.min(b) as f64 / longest as f64 * 100.0
        };
        round2(bound) >= threshold
    }
}

/// Strip everything from the first marker to end of line, on every line.
fn strip_line_comments(code: &str, markers: &[&str]) -> String {
    code.split('\n')
        .map(|line| {
            let cut = markers
                .iter()
                .filter_map(|marker| line.find(marker))
                .min()
                .unwrap_or(line.len());
            &line[..cut]
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove every `open ... close` span, shortest match first. An unterminated
/// opener is left in place.
fn strip_delimited(code: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut rest = code;
    while let Some(start) = rest.find(open) {
        let after_open = &rest[start + open.len()..];
        match after_open.find(close) {
            Some(end) => {
                out.push_str(&rest[..start]);
                rest = &after_open[end + close.len()..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

/// Classic edit distance (unit costs) over chars, two rolling rows.
pub fn edit_distance(first: &str, second: &str) -> usize {
    let a: Vec<char> = first.chars().collect();
    let b: Vec<char> = second.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j]
            } else {
                1 + previous[j].min(previous[j + 1]).min(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Similarity percentage of two already-normalized strings.
pub fn similarity(first: &str, second: &str) -> f64 {
    if first.is_empty() || second.is_empty() {
        return 0.0;
    }
    if first == second {
        return 100.0;
    }
    let longest = first.chars().count().max(second.chars().count()) as f64;
    let distance = edit_distance(first, second) as f64;
    round2((longest - distance) / longest * 100.0)
}

fn preview(normalized: &str) -> String {
    normalized.chars().take(PREVIEW_CHARS).collect()
}

pub struct SimilarityEngine {
    threshold: f64,
    languages: LanguageTable,
    filter: Box<dyn PairFilter>,
}

impl SimilarityEngine {
    pub fn new(config: &PlagiarismConfig, languages: &LanguageTable) -> Self {
        Self {
            threshold: config.threshold,
            languages: languages.clone(),
            filter: Box::new(LengthBound),
        }
    }

    pub fn with_filter(mut self, filter: impl PairFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn normalize(&self, code: &str, language: &str) -> String {
        let markers: Vec<&str> = match self.languages.get(language) {
            Some(spec) if !spec.line_comments.is_empty() => {
                spec.line_comments.iter().map(String::as_str).collect()
            }
            _ => DEFAULT_LINE_COMMENTS.to_vec(),
        };

        let mut normalized = strip_line_comments(code, &markers);
        for (open, close) in BLOCK_COMMENTS {
            normalized = strip_delimited(&normalized, open, close);
        }

        normalized
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Compare two submissions. Symmetric in its code arguments.
    pub fn check_plagiarism(&self, first: &str, second: &str, language: &str) -> PlagiarismCheck {
        if first.is_empty() || second.is_empty() {
            return PlagiarismCheck {
                similarity: 0.0,
                is_plagiarized: false,
                threshold: self.threshold,
                normalized_first: String::new(),
                normalized_second: String::new(),
                message: "One or both submissions are empty".to_string(),
            };
        }

        let normalized_first = self.normalize(first, language);
        let normalized_second = self.normalize(second, language);
        let similarity = similarity(&normalized_first, &normalized_second);
        let is_plagiarized = similarity >= self.threshold;

        PlagiarismCheck {
            similarity,
            is_plagiarized,
            threshold: self.threshold,
            normalized_first: preview(&normalized_first),
            normalized_second: preview(&normalized_second),
            message: if is_plagiarized {
                format!("High similarity detected ({}%). Possible plagiarism.", similarity)
            } else {
                format!("Similarity: {}%", similarity)
            },
        }
    }

    /// All pairs at or above `threshold` (default: configured threshold),
    /// highest similarity first.
    #[tracing::instrument(skip(self, submissions), fields(submissions = submissions.len()))]
    pub fn find_plagiarism_pairs(
        &self,
        submissions: &[SubmissionRef],
        language: &str,
        threshold: Option<f64>,
    ) -> Vec<PlagiarismPair> {
        let threshold = threshold.unwrap_or(self.threshold);

        let normalized: Vec<String> = submissions
            .par_iter()
            .map(|submission| self.normalize(&submission.code, language))
            .collect();

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for i in 0..submissions.len() {
            for j in (i + 1)..submissions.len() {
                let (a, b) = (submissions[i].submission_id, submissions[j].submission_id);
                if !seen.insert((a.min(b), a.max(b))) {
                    continue;
                }
                candidates.push((i, j));
            }
        }
        let considered = candidates.len();

        let mut pairs: Vec<PlagiarismPair> = candidates
            .into_par_iter()
            .filter(|&(i, j)| self.filter.may_reach(&normalized[i], &normalized[j], threshold))
            .filter_map(|(i, j)| {
                let first = &submissions[i];
                let second = &submissions[j];
                // empty raw code never matches, like a two-way check
                let similarity = if first.code.is_empty() || second.code.is_empty() {
                    0.0
                } else {
                    similarity(&normalized[i], &normalized[j])
                };
                (similarity >= threshold).then(|| PlagiarismPair {
                    first: first.into(),
                    second: second.into(),
                    similarity,
                    is_plagiarized: similarity >= self.threshold,
                })
            })
            .collect();

        pairs.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        tracing::debug!(considered, flagged = pairs.len(), threshold, "Plagiarism scan complete");
        pairs
    }
}
