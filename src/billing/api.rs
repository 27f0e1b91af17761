use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::gateway::PaymentGateway;
use super::models::{CycleReport, Invoice, InvoiceStats, ReconciliationReport};
use super::orchestrator;
use super::service::{billing_cycle_for, InvoiceService};
use crate::email::Mailer;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize, Default)]
pub struct RunBillingRequest {
    #[serde(default)]
    pub billing_cycle: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct PartnerBillingResponse {
    pub billing_cycle: NaiveDate,
    pub invoice: Option<Invoice>,
}

/// A billing cycle is identified by the first day of its month.
fn validated_cycle(request: &RunBillingRequest) -> Result<Option<NaiveDate>, AppError> {
    if let Some(cycle) = request.billing_cycle {
        if cycle.day() != 1 {
            return Err(AppError::BadRequest(
                "billing_cycle must be the first day of a month".to_string(),
            ));
        }
    }
    Ok(request.billing_cycle)
}

/// key: billing-api -> manual full-cycle trigger
pub async fn run_billing(
    Extension(pool): Extension<PgPool>,
    Extension(gateway): Extension<Arc<dyn PaymentGateway>>,
    Extension(mailer): Extension<Arc<dyn Mailer>>,
    payload: Option<Json<RunBillingRequest>>,
) -> AppResult<Json<CycleReport>> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let cycle_override = validated_cycle(&request)?;
    let report =
        orchestrator::run_billing_cycle(&pool, &gateway, &mailer, cycle_override, Utc::now())
            .await?;
    Ok(Json(report))
}

/// key: billing-api -> single-partner trigger, used after verification
pub async fn run_partner_billing(
    Extension(pool): Extension<PgPool>,
    Extension(gateway): Extension<Arc<dyn PaymentGateway>>,
    Extension(mailer): Extension<Arc<dyn Mailer>>,
    Path(partner_id): Path<i32>,
    payload: Option<Json<RunBillingRequest>>,
) -> AppResult<Json<PartnerBillingResponse>> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let now = Utc::now();
    let billing_cycle = validated_cycle(&request)?.unwrap_or_else(|| billing_cycle_for(now));

    let invoice =
        orchestrator::bill_partner(&pool, &gateway, &mailer, partner_id, billing_cycle, now)
            .await?;

    Ok(Json(PartnerBillingResponse {
        billing_cycle,
        invoice,
    }))
}

pub async fn check_payments(
    Extension(pool): Extension<PgPool>,
    Extension(gateway): Extension<Arc<dyn PaymentGateway>>,
) -> AppResult<Json<ReconciliationReport>> {
    let report = orchestrator::reconcile_payments(&pool, &gateway).await?;
    Ok(Json(report))
}

pub async fn invoice_stats(
    Extension(pool): Extension<PgPool>,
) -> AppResult<Json<InvoiceStats>> {
    let service = InvoiceService::new(pool);
    let stats = service.invoice_stats().await?;
    Ok(Json(stats))
}
