// Prometheus metrics exposed on GET /metrics

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Submission intake by outcome: queued, rejected.
    pub static ref SUBMISSIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("grader_submissions_total", "Submissions received by intake outcome"),
        &["outcome"],
    )
    .expect("valid metric definition");

    /// Run-only executions by outcome: ok, fault.
    pub static ref EXECUTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("grader_executions_total", "Run-only executions by outcome"),
        &["outcome"],
    )
    .expect("valid metric definition");

    pub static ref PLAGIARISM_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("grader_plagiarism_seconds", "Plagiarism check duration")
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["kind"],
    )
    .expect("valid metric definition");
}

/// Register all collectors once at boot.
pub fn register() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(SUBMISSIONS.clone()))?;
    REGISTRY.register(Box::new(EXECUTIONS.clone()))?;
    REGISTRY.register(Box::new(PLAGIARISM_SECONDS.clone()))?;
    Ok(())
}

/// Text exposition format of every registered metric.
pub fn render() -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_registered_counters() {
        // registration may already have happened in another test
        let _ = register();
        SUBMISSIONS.with_label_values(&["queued"]).inc();
        let text = render().unwrap();
        assert!(text.contains("grader_submissions_total"));
    }
}
