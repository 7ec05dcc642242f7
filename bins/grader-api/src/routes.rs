use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/assignments", post(handlers::create_assignment))
        .route("/assignments/:id", get(handlers::get_assignment))
        .route("/assignments/:id/test-cases", get(handlers::list_test_cases))
        .route("/assignments/:id/submissions", get(handlers::list_submissions))
        .route("/assignments/:id/plagiarism", get(handlers::scan_assignment))
        .route("/assignments/:id/stats", get(handlers::assignment_stats))
        .route("/test-cases", post(handlers::create_test_case))
        .route(
            "/test-cases/:id",
            get(handlers::get_test_case)
                .put(handlers::update_test_case)
                .delete(handlers::delete_test_case),
        )
        .route("/submissions", post(handlers::submit))
        .route("/submissions/:id", get(handlers::get_submission))
        .route("/execute", post(handlers::execute))
        .route(
            "/plagiarism/compare/:first/:second",
            get(handlers::compare_submissions),
        )
}
