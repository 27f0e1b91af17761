use axum::{
    routing::{get, post},
    Router,
};

use crate::{billing, notifications};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/billing/run", post(billing::api::run_billing))
        .route(
            "/api/billing/partners/:id/run",
            post(billing::api::run_partner_billing),
        )
        .route("/api/billing/payments/check", post(billing::api::check_payments))
        .route("/api/billing/invoices/stats", get(billing::api::invoice_stats))
        .route("/api/notifications", get(notifications::list_notifications))
        .route(
            "/api/notifications/:id/read",
            post(notifications::mark_notification_read),
        )
}
