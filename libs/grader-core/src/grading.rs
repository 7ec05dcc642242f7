// Grading engine
// Numeric score with performance adjustment, plus an independent letter-grade policy.

use crate::round2;
use grader_common::config::{Band, Bands, GradingThresholds};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest combined performance adjustment in either direction.
const MAX_ADJUSTMENT: f64 = 5.0;

fn band_bonus(band: Band) -> f64 {
    match band {
        Band::Excellent => 2.5,
        Band::Good => 1.5,
        Band::Average => 0.0,
        Band::BelowAverage => -1.0,
        Band::Poor => -2.5,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    F,
    D,
    C,
    B,
    A,
    #[serde(rename = "A+")]
    APlus,
}

impl LetterGrade {
    /// Best to worst.
    const LADDER: [LetterGrade; 6] = [
        LetterGrade::APlus,
        LetterGrade::A,
        LetterGrade::B,
        LetterGrade::C,
        LetterGrade::D,
        LetterGrade::F,
    ];

    pub fn points(self) -> f64 {
        match self {
            LetterGrade::APlus => 4.3,
            LetterGrade::A => 4.0,
            LetterGrade::B => 3.0,
            LetterGrade::C => 2.0,
            LetterGrade::D => 1.0,
            LetterGrade::F => 0.0,
        }
    }

    /// Highest letter whose points do not exceed `points`.
    pub fn from_points(points: f64) -> Self {
        Self::LADDER
            .into_iter()
            .find(|grade| grade.points() <= points + f64::EPSILON)
            .unwrap_or(LetterGrade::F)
    }

    fn from_band(band: Band) -> Self {
        match band {
            Band::Excellent => LetterGrade::APlus,
            Band::Good => LetterGrade::A,
            Band::Average => LetterGrade::B,
            Band::BelowAverage => LetterGrade::C,
            Band::Poor => LetterGrade::D,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LetterGrade::APlus => "A+",
            LetterGrade::A => "A",
            LetterGrade::B => "B",
            LetterGrade::C => "C",
            LetterGrade::D => "D",
            LetterGrade::F => "F",
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GradingEngine {
    thresholds: GradingThresholds,
}

impl GradingEngine {
    pub fn new(thresholds: GradingThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &GradingThresholds {
        &self.thresholds
    }

    /// Score in `[0, max_score]`, rounded to 2 decimals.
    ///
    /// Base score is the pass fraction of `max_score`. Only a fully passing run
    /// receives the performance adjustment, and a penalised full pass never
    /// drops below the base score of one failure, so the score is non-decreasing
    /// in `passed`.
    pub fn calculate_grade(
        &self,
        avg_runtime_ms: f64,
        avg_memory_mb: f64,
        passed: usize,
        total: usize,
        max_score: f64,
    ) -> f64 {
        if total == 0 {
            return 0.0;
        }

        let per_test = max_score / total as f64;
        let mut score = passed as f64 * per_test;
        if passed == total {
            let one_failure = (total - 1) as f64 * per_test;
            score = (score + self.performance_adjustment(avg_runtime_ms, avg_memory_mb))
                .max(one_failure);
        }

        round2(score.clamp(0.0, max_score.max(0.0)))
    }

    /// Runtime and memory bonuses (±2.5 each), clamped to ±5.
    pub fn performance_adjustment(&self, avg_runtime_ms: f64, avg_memory_mb: f64) -> f64 {
        let runtime = band_bonus(self.thresholds.runtime.classify(avg_runtime_ms));
        let memory = band_bonus(self.thresholds.memory.classify(avg_memory_mb));
        (runtime + memory).clamp(-MAX_ADJUSTMENT, MAX_ADJUSTMENT)
    }

    /// Letter-grade policy. Informational only; it never feeds the numeric score.
    pub fn letter_grade(
        &self,
        avg_runtime_ms: f64,
        avg_memory_mb: f64,
        passed: usize,
        total: usize,
    ) -> LetterGrade {
        if total == 0 {
            return LetterGrade::F;
        }
        if passed < total {
            return pass_rate_letter(passed as f64 / total as f64 * 100.0);
        }

        let runtime = performance_letter(&self.thresholds.runtime, avg_runtime_ms);
        let memory = performance_letter(&self.thresholds.memory, avg_memory_mb);
        LetterGrade::from_points((runtime.points() + memory.points()) / 2.0)
    }
}

fn pass_rate_letter(percent: f64) -> LetterGrade {
    match percent {
        p if p >= 90.0 => LetterGrade::A,
        p if p >= 80.0 => LetterGrade::B,
        p if p >= 70.0 => LetterGrade::C,
        p if p >= 60.0 => LetterGrade::D,
        _ => LetterGrade::F,
    }
}

fn performance_letter(bands: &Bands, value: f64) -> LetterGrade {
    LetterGrade::from_band(bands.classify(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> GradingEngine {
        GradingEngine::new(GradingThresholds::default())
    }

    #[test]
    fn test_zero_total_scores_zero() {
        assert_eq!(engine().calculate_grade(50.0, 5.0, 0, 0, 100.0), 0.0);
    }

    #[test]
    fn test_full_pass_with_bonus_clamped_to_max() {
        assert_eq!(engine().calculate_grade(50.0, 5.0, 4, 4, 100.0), 100.0);
    }

    #[test]
    fn test_partial_pass_gets_no_adjustment() {
        assert_eq!(engine().calculate_grade(50.0, 5.0, 1, 2, 100.0), 50.0);
        assert_eq!(engine().calculate_grade(5000.0, 500.0, 1, 2, 100.0), 50.0);
        assert_eq!(engine().calculate_grade(100.0, 5.0, 1, 3, 10.0), 3.33);
    }

    #[test]
    fn test_full_pass_with_penalty() {
        // poor runtime (-2.5) + below-average memory (-1)
        assert_eq!(engine().calculate_grade(3000.0, 150.0, 5, 5, 100.0), 96.5);
        // good runtime (+1.5) + average memory (0)
        assert_eq!(engine().calculate_grade(300.0, 60.0, 5, 5, 100.0), 100.0);
    }

    #[test]
    fn test_small_max_score_never_negative() {
        assert_eq!(engine().calculate_grade(9000.0, 900.0, 1, 1, 2.0), 0.0);
    }

    #[test]
    fn test_monotonic_in_passed() {
        let engine = engine();
        // excellent, neutral and poor bands, small and large totals
        for (runtime, memory) in [(50.0, 5.0), (800.0, 80.0), (3000.0, 300.0)] {
            for total in [1, 2, 10, 100] {
                let mut previous = -1.0;
                for passed in 0..=total {
                    let score = engine.calculate_grade(runtime, memory, passed, total, 100.0);
                    assert!(
                        score >= previous,
                        "score dropped at passed={}/{} ({}ms, {}MB)",
                        passed,
                        total,
                        runtime,
                        memory
                    );
                    previous = score;
                }
            }
        }
    }

    #[test]
    fn test_penalised_full_pass_floored_at_one_failure() {
        let engine = engine();
        assert_eq!(engine.calculate_grade(3000.0, 300.0, 99, 100, 100.0), 99.0);
        assert_eq!(engine.calculate_grade(3000.0, 300.0, 100, 100, 100.0), 99.0);
        // floor below the penalised score leaves it alone
        assert_eq!(engine.calculate_grade(3000.0, 300.0, 4, 4, 100.0), 95.0);
        assert_eq!(engine.calculate_grade(3000.0, 300.0, 1, 1, 2.0), 0.0);
    }

    #[test]
    fn test_adjustment_bands_are_strict() {
        let engine = engine();
        assert_eq!(engine.performance_adjustment(199.9, 9.9), 5.0);
        assert_eq!(engine.performance_adjustment(200.0, 10.0), 3.0);
        assert_eq!(engine.performance_adjustment(2000.0, 200.0), -5.0);
    }

    #[test]
    fn test_letter_grade_by_pass_rate() {
        let engine = engine();
        assert_eq!(engine.letter_grade(0.0, 0.0, 9, 10), LetterGrade::A);
        assert_eq!(engine.letter_grade(0.0, 0.0, 8, 10), LetterGrade::B);
        assert_eq!(engine.letter_grade(0.0, 0.0, 7, 10), LetterGrade::C);
        assert_eq!(engine.letter_grade(0.0, 0.0, 6, 10), LetterGrade::D);
        assert_eq!(engine.letter_grade(0.0, 0.0, 1, 10), LetterGrade::F);
        assert_eq!(engine.letter_grade(0.0, 0.0, 0, 0), LetterGrade::F);
    }

    #[test]
    fn test_letter_grade_full_pass_averages_performance() {
        let engine = engine();
        // A+ runtime, A+ memory
        assert_eq!(engine.letter_grade(50.0, 5.0, 3, 3), LetterGrade::APlus);
        // A+ (4.3) and B (3.0) average 3.65 → B
        assert_eq!(engine.letter_grade(50.0, 60.0, 3, 3), LetterGrade::B);
        // A (4.0) and A (4.0)
        assert_eq!(engine.letter_grade(300.0, 20.0, 3, 3), LetterGrade::A);
        // D (1.0) and D (1.0)
        assert_eq!(engine.letter_grade(5000.0, 500.0, 3, 3), LetterGrade::D);
    }

    #[test]
    fn test_letter_grade_serializes_plus() {
        assert_eq!(serde_json::to_string(&LetterGrade::APlus).unwrap(), "\"A+\"");
        assert_eq!(LetterGrade::from_points(4.15), LetterGrade::A);
    }
}
