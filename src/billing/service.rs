use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{debug, info};

use super::commission::{compute_commission, round_currency};
use super::models::{
    Booking, CandidatePartner, Invoice, InvoiceLineItem, InvoiceStats, InvoiceStatus, Partner,
};
use crate::config;

const ELIGIBLE_BOOKINGS_SQL: &str = r#"
    SELECT *
    FROM retreat_bookings
    WHERE partner_id = $1
      AND status = 'completed'
      AND invoiced = FALSE
      AND final_net_revenue IS NOT NULL
      AND retreat_date <= $2
    ORDER BY retreat_date ASC
"#;

/// A consolidated invoice together with everything the publisher needs.
#[derive(Debug, Clone)]
pub struct ConsolidatedInvoice {
    pub partner: Partner,
    pub invoice: Invoice,
    pub line_items: Vec<InvoiceLineItem>,
    pub freshly_created: bool,
}

/// key: invoice-service -> eligibility, consolidation, status transitions
#[derive(Clone)]
pub struct InvoiceService {
    pool: PgPool,
}

impl InvoiceService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn partner(&self, partner_id: i32) -> Result<Partner> {
        sqlx::query_as::<_, Partner>("SELECT * FROM partners WHERE id = $1")
            .bind(partner_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow!("partner {partner_id} not found"))
    }

    /// Bookings billable right now: completed, uninvoiced, verified revenue,
    /// and aged past the hold period (the boundary day itself is eligible).
    /// Bookings completed without a final revenue are excluded until verified.
    pub async fn eligible_bookings(
        &self,
        partner_id: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>> {
        let bookings = sqlx::query_as::<_, Booking>(ELIGIBLE_BOOKINGS_SQL)
            .bind(partner_id)
            .bind(hold_period_cutoff(now))
            .fetch_all(&self.pool)
            .await?;
        Ok(bookings)
    }

    /// Distinct partners with at least one eligible booking.
    pub async fn candidate_partners(&self, now: DateTime<Utc>) -> Result<Vec<CandidatePartner>> {
        let partners = sqlx::query_as::<_, CandidatePartner>(
            r#"
            SELECT DISTINCT p.id, p.name
            FROM partners p
            JOIN retreat_bookings rb ON p.id = rb.partner_id
            WHERE rb.status = 'completed'
              AND rb.invoiced = FALSE
              AND rb.final_net_revenue IS NOT NULL
              AND rb.retreat_date <= $1
            ORDER BY p.name
            "#,
        )
        .bind(hold_period_cutoff(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(partners)
    }

    pub async fn find_invoice(
        &self,
        partner_id: i32,
        billing_cycle: NaiveDate,
    ) -> Result<Option<Invoice>> {
        let invoice = sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE partner_id = $1 AND billing_cycle = $2",
        )
        .bind(partner_id)
        .bind(billing_cycle)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invoice)
    }

    pub async fn line_items(&self, invoice_id: i32) -> Result<Vec<InvoiceLineItem>> {
        let items = sqlx::query_as::<_, InvoiceLineItem>(
            "SELECT * FROM invoice_line_items WHERE invoice_id = $1 ORDER BY retreat_date ASC",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// key: invoice-consolidation -> one atomic unit, idempotent per (partner, cycle)
    ///
    /// Returns `None` when the partner has nothing to bill. An existing invoice
    /// for the cycle is returned unchanged (`freshly_created = false`); callers
    /// resume at publishing when it still needs it. A concurrent insert for the
    /// same pair loses to the unique constraint and is treated identically to
    /// "found existing".
    pub async fn create_consolidated_invoice(
        &self,
        partner_id: i32,
        billing_cycle: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<ConsolidatedInvoice>> {
        let partner = self.partner(partner_id).await?;

        if let Some(existing) = self.find_invoice(partner_id, billing_cycle).await? {
            debug!(
                partner_id,
                invoice = existing.id,
                %billing_cycle,
                "invoice already exists for billing cycle"
            );
            let line_items = self.line_items(existing.id).await?;
            return Ok(Some(ConsolidatedInvoice {
                partner,
                invoice: existing,
                line_items,
                freshly_created: false,
            }));
        }

        let mut tx = self.pool.begin().await?;

        let bookings = sqlx::query_as::<_, Booking>(ELIGIBLE_BOOKINGS_SQL)
            .bind(partner_id)
            .bind(hold_period_cutoff(now))
            .fetch_all(&mut tx)
            .await?;

        if bookings.is_empty() {
            tx.rollback().await?;
            debug!(partner_id, "no bookings ready for invoicing");
            return Ok(None);
        }

        let mut total = 0.0;
        let mut drafts = Vec::with_capacity(bookings.len());
        for booking in &bookings {
            let revenue = booking.final_net_revenue.unwrap_or_default();
            let commission = compute_commission(&partner, revenue);
            let amount = round_currency(commission.amount);
            total += amount;
            drafts.push((booking, revenue, commission, amount));
        }
        let total = round_currency(total);

        let inserted = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (partner_id, billing_cycle, amount, due_date, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING *
            "#,
        )
        .bind(partner_id)
        .bind(billing_cycle)
        .bind(total)
        .bind(invoice_due_date(now))
        .fetch_one(&mut tx)
        .await;

        let invoice = match inserted {
            Ok(invoice) => invoice,
            Err(err) if is_unique_violation(&err) => {
                // Lost the race against a concurrent billing attempt for the
                // same pair; fetch the winner's invoice instead.
                tx.rollback().await?;
                let existing = self
                    .find_invoice(partner_id, billing_cycle)
                    .await?
                    .ok_or_else(|| {
                        anyhow!("invoice insert conflicted but no invoice found for partner {partner_id}")
                    })?;
                let line_items = self.line_items(existing.id).await?;
                return Ok(Some(ConsolidatedInvoice {
                    partner,
                    invoice: existing,
                    line_items,
                    freshly_created: false,
                }));
            }
            Err(err) => return Err(err.into()),
        };

        let mut line_items = Vec::with_capacity(drafts.len());
        for (booking, revenue, commission, amount) in drafts {
            let item = sqlx::query_as::<_, InvoiceLineItem>(
                r#"
                INSERT INTO invoice_line_items
                    (invoice_id, booking_id, guest_name, retreat_date, revenue,
                     commission_type, commission_rate, flat_rate_amount, line_item_amount)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING *
                "#,
            )
            .bind(invoice.id)
            .bind(booking.id)
            .bind(&booking.guest_name)
            .bind(booking.retreat_date)
            .bind(revenue)
            .bind(commission.mode.as_str())
            .bind(commission.rate)
            .bind(commission.flat_amount)
            .bind(amount)
            .fetch_one(&mut tx)
            .await?;

            let updated = sqlx::query(
                "UPDATE retreat_bookings SET invoiced = TRUE, updated_at = NOW() \
                 WHERE id = $1 AND invoiced = FALSE",
            )
            .bind(booking.id)
            .execute(&mut tx)
            .await?;
            if updated.rows_affected() != 1 {
                // Dropping the transaction rolls everything back.
                bail!("booking {} was already invoiced", booking.id);
            }

            line_items.push(item);
        }

        tx.commit().await?;

        info!(
            partner_id,
            invoice = invoice.id,
            line_items = line_items.len(),
            amount = invoice.amount,
            "consolidated invoice created"
        );

        Ok(Some(ConsolidatedInvoice {
            partner,
            invoice,
            line_items,
            freshly_created: true,
        }))
    }

    /// pending -> sent, stamping the remote id. Rejects any other transition.
    pub async fn mark_invoice_sent(&self, invoice: &Invoice, remote_id: &str) -> Result<Invoice> {
        let current = InvoiceStatus::parse(&invoice.status)
            .ok_or_else(|| anyhow!("invoice {} has unknown status {}", invoice.id, invoice.status))?;
        if !current.can_advance_to(InvoiceStatus::Sent) {
            bail!(
                "invoice {} cannot move from {} to sent",
                invoice.id,
                invoice.status
            );
        }

        sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET paypal_invoice_id = $1, status = 'sent', sent_date = NOW()
            WHERE id = $2 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(remote_id)
        .bind(invoice.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| anyhow!("invoice {} left pending state concurrently", invoice.id))
    }

    /// sent -> paid, only ever on explicit remote confirmation.
    pub async fn mark_invoice_paid(&self, invoice: &Invoice) -> Result<Invoice> {
        let current = InvoiceStatus::parse(&invoice.status)
            .ok_or_else(|| anyhow!("invoice {} has unknown status {}", invoice.id, invoice.status))?;
        if !current.can_advance_to(InvoiceStatus::Paid) {
            bail!(
                "invoice {} cannot move from {} to paid",
                invoice.id,
                invoice.status
            );
        }

        sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = 'paid', paid_date = NOW()
            WHERE id = $1 AND status = 'sent'
            RETURNING *
            "#,
        )
        .bind(invoice.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| anyhow!("invoice {} left sent state concurrently", invoice.id))
    }

    /// Published invoices awaiting payment confirmation, oldest first.
    pub async fn sent_invoices(&self) -> Result<Vec<Invoice>> {
        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT * FROM invoices
            WHERE status = 'sent' AND paypal_invoice_id IS NOT NULL
            ORDER BY sent_date ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(invoices)
    }

    pub async fn invoice_stats(&self) -> Result<InvoiceStats> {
        let stats = sqlx::query_as::<_, InvoiceStats>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending_count,
                COUNT(*) FILTER (WHERE status = 'sent') AS sent_count,
                COUNT(*) FILTER (WHERE status = 'paid') AS paid_count,
                SUM(amount) FILTER (WHERE status = 'paid') AS total_revenue,
                SUM(amount) FILTER (WHERE status IN ('pending', 'sent')) AS outstanding_revenue
            FROM invoices
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}

/// First day of the month following `now`; consolidated invoices for a month
/// are grouped under the next month's marker.
pub fn billing_cycle_for(now: DateTime<Utc>) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1).expect("valid first of month");
    first.checked_add_months(Months::new(1)).unwrap_or(first)
}

/// Payment is due 72 hours after invoice creation by default; the hold period
/// already aged the underlying retreats.
pub fn invoice_due_date(now: DateTime<Utc>) -> NaiveDate {
    (now + Duration::hours(*config::INVOICE_DUE_HOURS)).date_naive()
}

fn hold_period_cutoff(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive() - Duration::days(*config::HOLD_PERIOD_DAYS)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
