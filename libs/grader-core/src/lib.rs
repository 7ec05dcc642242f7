pub mod comparator;
pub mod execution;
pub mod formatter;
pub mod grading;
pub mod runner;
pub mod similarity;

/// Round to 2 decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
