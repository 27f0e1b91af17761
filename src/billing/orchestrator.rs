use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{error, info, warn};

use super::gateway::{build_invoice_payload, PaymentGateway, RemoteInvoice};
use super::models::{CycleError, CycleReport, Invoice, ReconciliationReport};
use super::service::{billing_cycle_for, ConsolidatedInvoice, InvoiceService};
use crate::email::Mailer;
use crate::notifications::{self, NewNotification, NotificationKind};

/// key: billing-orchestrator -> per-partner isolation, idempotent triggers
///
/// Single-partner entry point, also invoked synchronously right after a
/// verification submission. Consolidation commits first; publishing happens
/// against the committed invoice and a gateway failure leaves it `pending`
/// for the next attempt. Safe to race the scheduled full-cycle run.
pub async fn bill_partner(
    pool: &PgPool,
    gateway: &Arc<dyn PaymentGateway>,
    mailer: &Arc<dyn Mailer>,
    partner_id: i32,
    billing_cycle: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Option<Invoice>> {
    let service = InvoiceService::new(pool.clone());

    let Some(consolidated) = service
        .create_consolidated_invoice(partner_id, billing_cycle, now)
        .await?
    else {
        return Ok(None);
    };

    if !consolidated.invoice.needs_publishing() {
        return Ok(Some(consolidated.invoice));
    }

    let invoice = publish_invoice(pool, &service, gateway, mailer, &consolidated).await?;
    Ok(Some(invoice))
}

async fn publish_invoice(
    pool: &PgPool,
    service: &InvoiceService,
    gateway: &Arc<dyn PaymentGateway>,
    mailer: &Arc<dyn Mailer>,
    consolidated: &ConsolidatedInvoice,
) -> Result<Invoice> {
    let payload = build_invoice_payload(
        &consolidated.partner,
        &consolidated.invoice,
        &consolidated.line_items,
    );
    let remote = gateway.create_invoice(payload).await?;
    gateway.send_invoice(&remote.id).await?;

    let invoice = service
        .mark_invoice_sent(&consolidated.invoice, &remote.id)
        .await?;
    info!(
        invoice = invoice.id,
        partner_id = invoice.partner_id,
        remote_id = %remote.id,
        "invoice published"
    );

    // Side effects only after the sent transition committed; their failure
    // never unwinds billing state.
    dispatch_sent_side_effects(pool, mailer, consolidated, &invoice, &remote).await;

    Ok(invoice)
}

async fn dispatch_sent_side_effects(
    pool: &PgPool,
    mailer: &Arc<dyn Mailer>,
    consolidated: &ConsolidatedInvoice,
    invoice: &Invoice,
    remote: &RemoteInvoice,
) {
    if let Err(err) = mailer
        .send_invoice_notification(
            &consolidated.partner,
            invoice,
            consolidated.line_items.len(),
            &remote.url(),
        )
        .await
    {
        warn!(?err, invoice = invoice.id, "invoice email notification failed");
    }

    if let Err(err) = notifications::create_notification(
        pool,
        NewNotification {
            kind: NotificationKind::InvoiceCreated,
            title: "Invoice Created".to_string(),
            message: format!(
                "Consolidated invoice for {} created with {} line items (${:.2})",
                consolidated.partner.name,
                consolidated.line_items.len(),
                invoice.amount
            ),
            partner_id: Some(invoice.partner_id),
            booking_id: None,
            invoice_id: Some(invoice.id),
        },
    )
    .await
    {
        warn!(?err, invoice = invoice.id, "failed to record invoice notification");
    }
}

/// Full-cycle run over every partner with billable bookings. One partner's
/// failure is recorded and never stops the others.
pub async fn run_billing_cycle(
    pool: &PgPool,
    gateway: &Arc<dyn PaymentGateway>,
    mailer: &Arc<dyn Mailer>,
    cycle_override: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Result<CycleReport> {
    let billing_cycle = cycle_override.unwrap_or_else(|| billing_cycle_for(now));
    let service = InvoiceService::new(pool.clone());
    let candidates = service.candidate_partners(now).await?;

    let mut report = CycleReport {
        billing_cycle,
        total_partners: candidates.len(),
        success_count: 0,
        failure_count: 0,
        errors: Vec::new(),
    };

    for candidate in candidates {
        match bill_partner(pool, gateway, mailer, candidate.id, billing_cycle, now).await {
            Ok(Some(invoice)) => {
                report.success_count += 1;
                info!(
                    partner_id = candidate.id,
                    invoice = invoice.id,
                    "partner billed"
                );
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    ?err,
                    partner_id = candidate.id,
                    "failed to create invoice for partner"
                );
                report.failure_count += 1;
                report.errors.push(CycleError {
                    partner_id: candidate.id,
                    partner_name: candidate.name.clone(),
                    error: format!("{err:#}"),
                });
            }
        }
    }

    info!(
        billing_cycle = %report.billing_cycle,
        success = report.success_count,
        failed = report.failure_count,
        "consolidated invoicing complete"
    );
    Ok(report)
}

/// key: payment-reconciliation -> sent invoices advance to paid only on
/// explicit remote confirmation; per-invoice failures are logged and retried
/// on the next sweep.
pub async fn reconcile_payments(
    pool: &PgPool,
    gateway: &Arc<dyn PaymentGateway>,
) -> Result<ReconciliationReport> {
    let service = InvoiceService::new(pool.clone());
    let invoices = service.sent_invoices().await?;

    let mut report = ReconciliationReport {
        checked: invoices.len(),
        paid_count: 0,
        still_pending: 0,
    };

    for invoice in invoices {
        let Some(remote_id) = invoice.paypal_invoice_id.as_deref() else {
            continue;
        };

        match gateway.is_invoice_paid(remote_id).await {
            Ok(true) => match service.mark_invoice_paid(&invoice).await {
                Ok(paid) => {
                    report.paid_count += 1;
                    info!(invoice = paid.id, "invoice marked as paid");
                    if let Err(err) = notifications::create_notification(
                        pool,
                        NewNotification {
                            kind: NotificationKind::InvoicePaid,
                            title: "Invoice Paid".to_string(),
                            message: format!(
                                "Invoice #{} has been paid (${:.2})",
                                paid.id, paid.amount
                            ),
                            partner_id: Some(paid.partner_id),
                            booking_id: None,
                            invoice_id: Some(paid.id),
                        },
                    )
                    .await
                    {
                        warn!(?err, invoice = paid.id, "failed to record paid notification");
                    }
                }
                Err(err) => {
                    error!(?err, invoice = invoice.id, "failed to record invoice payment");
                    report.still_pending += 1;
                }
            },
            Ok(false) => report.still_pending += 1,
            Err(err) => {
                error!(
                    ?err,
                    invoice = invoice.id,
                    "failed to check invoice payment status"
                );
                report.still_pending += 1;
            }
        }
    }

    info!(
        checked = report.checked,
        paid = report.paid_count,
        still_pending = report.still_pending,
        "payment reconciliation complete"
    );
    Ok(report)
}
