use anyhow::Result;
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::config;
use crate::error::{AppError, AppResult};

/// key: notification-sink -> structured events for downstream display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    InvoiceCreated,
    InvoicePaid,
    PaymentOverdue,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::InvoiceCreated => "invoice_created",
            NotificationKind::InvoicePaid => "invoice_paid",
            NotificationKind::PaymentOverdue => "payment_overdue",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Notification {
    pub id: i32,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub related_partner_id: Option<i32>,
    pub related_booking_id: Option<i32>,
    pub related_invoice_id: Option<i32>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub partner_id: Option<i32>,
    pub booking_id: Option<i32>,
    pub invoice_id: Option<i32>,
}

pub async fn create_notification(
    pool: &PgPool,
    notification: NewNotification,
) -> Result<Notification, sqlx::Error> {
    sqlx::query_as::<_, Notification>(
        r#"
        INSERT INTO notifications
            (kind, title, message, related_partner_id, related_booking_id, related_invoice_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(notification.kind.as_str())
    .bind(&notification.title)
    .bind(&notification.message)
    .bind(notification.partner_id)
    .bind(notification.booking_id)
    .bind(notification.invoice_id)
    .fetch_one(pool)
    .await
}

pub async fn unread_notifications(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<Notification>, sqlx::Error> {
    sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications WHERE is_read = FALSE ORDER BY created_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Returns the number of rows flipped; zero means no such notification.
pub async fn mark_as_read(pool: &PgPool, notification_id: i32) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE id = $1")
        .bind(notification_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// key: overdue-sweep -> payment_overdue events, deduplicated per day
pub async fn check_overdue_payments(pool: &PgPool, now: DateTime<Utc>) -> Result<usize> {
    let overdue_before = now.date_naive() - Duration::days(*config::PAYMENT_OVERDUE_GRACE_DAYS);
    let rows = sqlx::query_as::<_, (i32, i32, String, f64)>(
        r#"
        SELECT i.id, i.partner_id, p.name, i.amount
        FROM invoices i
        JOIN partners p ON i.partner_id = p.id
        WHERE i.status IN ('pending', 'sent')
          AND i.due_date < $1
        "#,
    )
    .bind(overdue_before)
    .fetch_all(pool)
    .await?;

    let dedupe_after = now - Duration::days(1);
    let mut count = 0;
    for (invoice_id, partner_id, partner_name, amount) in rows {
        let existing: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT id FROM notifications
            WHERE kind = 'payment_overdue'
              AND related_invoice_id = $1
              AND created_at > $2
            LIMIT 1
            "#,
        )
        .bind(invoice_id)
        .bind(dedupe_after)
        .fetch_optional(pool)
        .await?;
        if existing.is_some() {
            continue;
        }

        create_notification(
            pool,
            NewNotification {
                kind: NotificationKind::PaymentOverdue,
                title: "Payment Overdue".to_string(),
                message: format!(
                    "{partner_name} has an overdue payment of ${amount:.2} (Invoice #{invoice_id})"
                ),
                partner_id: Some(partner_id),
                booking_id: None,
                invoice_id: Some(invoice_id),
            },
        )
        .await?;
        count += 1;
    }

    Ok(count)
}

pub async fn list_notifications(
    Extension(pool): Extension<PgPool>,
) -> AppResult<Json<Vec<Notification>>> {
    let records = unread_notifications(&pool, 50).await?;
    Ok(Json(records))
}

pub async fn mark_notification_read(
    Extension(pool): Extension<PgPool>,
    Path(notification_id): Path<i32>,
) -> AppResult<StatusCode> {
    if mark_as_read(&pool, notification_id).await? == 0 {
        return Err(AppError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}
