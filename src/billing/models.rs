use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// key: billing-models -> partners,bookings,invoices,line-items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionMode {
    Percentage,
    FlatRate,
}

impl CommissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionMode::Percentage => "percentage",
            CommissionMode::FlatRate => "flat_rate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "percentage" => Some(CommissionMode::Percentage),
            "flat_rate" => Some(CommissionMode::FlatRate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Scheduled,
    Completed,
    Canceled,
    Rescheduled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Scheduled => "scheduled",
            BookingStatus::Completed => "completed",
            BookingStatus::Canceled => "canceled",
            BookingStatus::Rescheduled => "rescheduled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(BookingStatus::Scheduled),
            "completed" => Some(BookingStatus::Completed),
            "canceled" => Some(BookingStatus::Canceled),
            "rescheduled" => Some(BookingStatus::Rescheduled),
            _ => None,
        }
    }

    /// Only scheduled bookings may move; completed/canceled/rescheduled are terminal.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (
                BookingStatus::Scheduled,
                BookingStatus::Completed | BookingStatus::Canceled | BookingStatus::Rescheduled
            )
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Sent,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(InvoiceStatus::Pending),
            "sent" => Some(InvoiceStatus::Sent),
            "paid" => Some(InvoiceStatus::Paid),
            _ => None,
        }
    }

    /// Invoices only move forward: pending -> sent -> paid.
    pub fn can_advance_to(&self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (InvoiceStatus::Pending, InvoiceStatus::Sent)
                | (InvoiceStatus::Sent, InvoiceStatus::Paid)
        )
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Partner {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub commission_type: String,
    pub commission_rate: Option<f64>,
    pub flat_rate_amount: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Booking {
    pub id: i32,
    pub partner_id: i32,
    pub guest_name: String,
    pub retreat_date: NaiveDate,
    pub expected_net_revenue: Option<f64>,
    pub final_net_revenue: Option<f64>,
    pub status: String,
    pub invoiced: bool,
    pub verification_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i32,
    pub partner_id: i32,
    pub billing_cycle: NaiveDate,
    pub amount: f64,
    pub status: String,
    pub due_date: NaiveDate,
    pub paypal_invoice_id: Option<String>,
    pub sent_date: Option<DateTime<Utc>>,
    pub paid_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// A committed invoice that never reached the gateway. Retried at publish,
    /// not re-consolidated.
    pub fn needs_publishing(&self) -> bool {
        self.status == InvoiceStatus::Pending.as_str() && self.paypal_invoice_id.is_none()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub id: i32,
    pub invoice_id: i32,
    pub booking_id: i32,
    pub guest_name: String,
    pub retreat_date: NaiveDate,
    pub revenue: f64,
    pub commission_type: String,
    pub commission_rate: Option<f64>,
    pub flat_rate_amount: Option<f64>,
    pub line_item_amount: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CandidatePartner {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleError {
    pub partner_id: i32,
    pub partner_name: String,
    pub error: String,
}

/// key: billing-cycle-report -> admin-facing outcome of a full run
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub billing_cycle: NaiveDate,
    pub total_partners: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub errors: Vec<CycleError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub checked: usize,
    pub paid_count: usize,
    pub still_pending: usize,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InvoiceStats {
    pub pending_count: i64,
    pub sent_count: i64,
    pub paid_count: i64,
    pub total_revenue: Option<f64>,
    pub outstanding_revenue: Option<f64>,
}
