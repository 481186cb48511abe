pub mod handlers;

pub use handlers::*;

use axum::{
    routing::{get, post},
    Router,
};

/// 组装路由
pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/departments", get(list_departments))
        .route("/api/mess/monthly", post(confirm_monthly))
        .route("/api/mess/monthly/:month_year", get(get_monthly))
        .route("/api/mess/bills", get(query_bills))
        .route("/api/mess/bills/generate", post(generate_bills))
        .route("/api/mess/bills/export", get(export_bills))
        .route("/api/mess/bills/bulk", post(bulk_action))
        .route("/api/mess/bills/:id/verify", post(verify_bill))
        .route("/api/mess/bills/:id/edit", post(edit_bill))
        .route("/api/mess/bills/:id/payment", post(record_payment))
        .route("/api/mess/publish", post(publish))
        .route("/api/mess/verification", get(verification_status))
        .with_state(service)
}
