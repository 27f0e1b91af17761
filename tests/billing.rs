use chrono::{Duration, NaiveDate, Utc};
use sqlx::PgPool;

use retreatops::billing::{billing_cycle_for, InvoiceService};

// key: billing-tests -> consolidation idempotency, hold period, transitions

async fn insert_partner(pool: &PgPool, name: &str, email: &str) -> i32 {
    sqlx::query_scalar(
        "INSERT INTO partners (name, email, commission_type, commission_rate) \
         VALUES ($1, $2, 'percentage', 15.0) RETURNING id",
    )
    .bind(name)
    .bind(email)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn insert_booking(
    pool: &PgPool,
    partner_id: i32,
    guest: &str,
    retreat_date: NaiveDate,
    final_net_revenue: Option<f64>,
) -> i32 {
    sqlx::query_scalar(
        "INSERT INTO retreat_bookings \
         (partner_id, guest_name, retreat_date, final_net_revenue, status) \
         VALUES ($1, $2, $3, $4, 'completed') RETURNING id",
    )
    .bind(partner_id)
    .bind(guest)
    .bind(retreat_date)
    .bind(final_net_revenue)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn invoice_count(pool: &PgPool, partner_id: i32) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM invoices WHERE partner_id = $1")
        .bind(partner_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn consolidation_is_idempotent_per_cycle(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let old_date = now.date_naive() - Duration::days(45);
    let partner_id = insert_partner(&pool, "Sierra Retreats", "sierra@example.com").await;
    insert_booking(&pool, partner_id, "Ada Guest", old_date, Some(1000.0)).await;
    insert_booking(&pool, partner_id, "Ben Guest", old_date, Some(2000.0)).await;

    let service = InvoiceService::new(pool.clone());
    let cycle = billing_cycle_for(now);

    let first = service
        .create_consolidated_invoice(partner_id, cycle, now)
        .await
        .unwrap()
        .unwrap();
    assert!(first.freshly_created);
    assert_eq!(first.line_items.len(), 2);
    assert_eq!(first.invoice.amount, 450.0);
    assert_eq!(first.invoice.status, "pending");

    let second = service
        .create_consolidated_invoice(partner_id, cycle, now)
        .await
        .unwrap()
        .unwrap();
    assert!(!second.freshly_created);
    assert_eq!(second.invoice.id, first.invoice.id);
    assert_eq!(second.line_items.len(), 2);

    assert_eq!(invoice_count(&pool, partner_id).await, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn concurrent_insert_adopts_winner_invoice(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let partner_id = insert_partner(&pool, "Racing Partner", "racing@example.com").await;
    let booking_id = insert_booking(
        &pool,
        partner_id,
        "Ada Guest",
        now.date_naive() - Duration::days(45),
        Some(1000.0),
    )
    .await;
    let cycle = billing_cycle_for(now);

    // Hold an uncommitted insert for the same (partner, cycle) open so the
    // service's own insert races it and loses on the unique constraint.
    let mut winner_tx = pool.begin().await.unwrap();
    let winner_id: i32 = sqlx::query_scalar(
        "INSERT INTO invoices (partner_id, billing_cycle, amount, due_date, status) \
         VALUES ($1, $2, 150.0, $3, 'pending') RETURNING id",
    )
    .bind(partner_id)
    .bind(cycle)
    .bind(now.date_naive())
    .fetch_one(&mut winner_tx)
    .await
    .unwrap();

    let service = InvoiceService::new(pool.clone());
    let loser = tokio::spawn({
        let service = service.clone();
        async move {
            service
                .create_consolidated_invoice(partner_id, cycle, now)
                .await
        }
    });

    // Let the loser block on the unique index, then commit the winner.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    winner_tx.commit().await.unwrap();

    let consolidated = loser.await.unwrap().unwrap().unwrap();
    assert!(!consolidated.freshly_created);
    assert_eq!(consolidated.invoice.id, winner_id);
    assert!(consolidated.line_items.is_empty());
    assert_eq!(invoice_count(&pool, partner_id).await, 1);

    // The loser's transaction rolled back wholesale; the booking stays
    // billable for a later cycle.
    let invoiced: bool =
        sqlx::query_scalar("SELECT invoiced FROM retreat_bookings WHERE id = $1")
            .bind(booking_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(!invoiced);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn no_invoice_when_nothing_is_billable(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let partner_id = insert_partner(&pool, "Empty Partner", "empty@example.com").await;
    // A recent retreat still inside the hold period.
    insert_booking(
        &pool,
        partner_id,
        "Recent Guest",
        now.date_naive() - Duration::days(5),
        Some(1000.0),
    )
    .await;

    let service = InvoiceService::new(pool.clone());
    let result = service
        .create_consolidated_invoice(partner_id, billing_cycle_for(now), now)
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(invoice_count(&pool, partner_id).await, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn hold_period_boundary_day_is_eligible(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let partner_id = insert_partner(&pool, "Boundary Partner", "boundary@example.com").await;
    let on_boundary = insert_booking(
        &pool,
        partner_id,
        "Boundary Guest",
        now.date_naive() - Duration::days(30),
        Some(1000.0),
    )
    .await;
    insert_booking(
        &pool,
        partner_id,
        "Too Recent Guest",
        now.date_naive() - Duration::days(29),
        Some(1000.0),
    )
    .await;

    let service = InvoiceService::new(pool.clone());
    let bookings = service.eligible_bookings(partner_id, now).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].id, on_boundary);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unverified_revenue_is_excluded(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let old_date = now.date_naive() - Duration::days(60);
    let partner_id = insert_partner(&pool, "Verified Partner", "verified@example.com").await;
    let verified = insert_booking(&pool, partner_id, "Verified Guest", old_date, Some(900.0)).await;
    insert_booking(&pool, partner_id, "Unverified Guest", old_date, None).await;

    let service = InvoiceService::new(pool.clone());
    let consolidated = service
        .create_consolidated_invoice(partner_id, billing_cycle_for(now), now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(consolidated.line_items.len(), 1);
    assert_eq!(consolidated.line_items[0].booking_id, verified);
    assert_eq!(consolidated.invoice.amount, 135.0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn invoiced_bookings_never_rebilled(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let old_date = now.date_naive() - Duration::days(45);
    let partner_id = insert_partner(&pool, "Repeat Partner", "repeat@example.com").await;
    insert_booking(&pool, partner_id, "Ada Guest", old_date, Some(1000.0)).await;

    let service = InvoiceService::new(pool.clone());
    let first_cycle = billing_cycle_for(now);
    service
        .create_consolidated_invoice(partner_id, first_cycle, now)
        .await
        .unwrap()
        .unwrap();

    // The booking is flagged invoiced; a later cycle finds nothing to bill.
    let next_cycle = first_cycle + Duration::days(31);
    let result = service
        .create_consolidated_invoice(partner_id, next_cycle, now)
        .await
        .unwrap();
    assert!(result.is_none());

    let invoiced: bool =
        sqlx::query_scalar("SELECT invoiced FROM retreat_bookings WHERE partner_id = $1")
            .bind(partner_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(invoiced);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn line_items_ordered_by_retreat_date(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let partner_id = insert_partner(&pool, "Ordered Partner", "ordered@example.com").await;
    insert_booking(
        &pool,
        partner_id,
        "Later Guest",
        now.date_naive() - Duration::days(40),
        Some(500.0),
    )
    .await;
    insert_booking(
        &pool,
        partner_id,
        "Earlier Guest",
        now.date_naive() - Duration::days(70),
        Some(500.0),
    )
    .await;

    let service = InvoiceService::new(pool.clone());
    let consolidated = service
        .create_consolidated_invoice(partner_id, billing_cycle_for(now), now)
        .await
        .unwrap()
        .unwrap();
    let dates: Vec<_> = consolidated
        .line_items
        .iter()
        .map(|item| item.retreat_date)
        .collect();
    assert_eq!(dates[0], now.date_naive() - Duration::days(70));
    assert_eq!(dates[1], now.date_naive() - Duration::days(40));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn pending_invoice_resumes_at_publishing(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let partner_id = insert_partner(&pool, "Resume Partner", "resume@example.com").await;
    insert_booking(
        &pool,
        partner_id,
        "Ada Guest",
        now.date_naive() - Duration::days(45),
        Some(1000.0),
    )
    .await;

    let service = InvoiceService::new(pool.clone());
    let cycle = billing_cycle_for(now);
    let consolidated = service
        .create_consolidated_invoice(partner_id, cycle, now)
        .await
        .unwrap()
        .unwrap();
    assert!(consolidated.invoice.needs_publishing());

    let sent = service
        .mark_invoice_sent(&consolidated.invoice, "INV2-REMOTE")
        .await
        .unwrap();
    assert_eq!(sent.status, "sent");
    assert_eq!(sent.paypal_invoice_id.as_deref(), Some("INV2-REMOTE"));
    assert!(sent.sent_date.is_some());

    let resumed = service
        .create_consolidated_invoice(partner_id, cycle, now)
        .await
        .unwrap()
        .unwrap();
    assert!(!resumed.freshly_created);
    assert!(!resumed.invoice.needs_publishing());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn invoice_transitions_are_guarded(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let now = Utc::now();
    let partner_id = insert_partner(&pool, "Guarded Partner", "guarded@example.com").await;
    insert_booking(
        &pool,
        partner_id,
        "Ada Guest",
        now.date_naive() - Duration::days(45),
        Some(1000.0),
    )
    .await;

    let service = InvoiceService::new(pool.clone());
    let cycle = billing_cycle_for(now);
    let consolidated = service
        .create_consolidated_invoice(partner_id, cycle, now)
        .await
        .unwrap()
        .unwrap();

    // pending may not jump straight to paid
    assert!(service.mark_invoice_paid(&consolidated.invoice).await.is_err());

    let sent = service
        .mark_invoice_sent(&consolidated.invoice, "INV2-REMOTE")
        .await
        .unwrap();
    // sent may not be re-sent
    assert!(service.mark_invoice_sent(&sent, "INV2-OTHER").await.is_err());

    let paid = service.mark_invoice_paid(&sent).await.unwrap();
    assert_eq!(paid.status, "paid");
    assert!(paid.paid_date.is_some());
    // paid is terminal
    assert!(service.mark_invoice_paid(&paid).await.is_err());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn invoice_stats_bucket_by_status(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let partner_id = insert_partner(&pool, "Stats Partner", "stats@example.com").await;
    for (cycle, status, amount) in [
        ("2024-01-01", "paid", 100.0),
        ("2024-02-01", "sent", 250.0),
        ("2024-03-01", "pending", 50.0),
    ] {
        sqlx::query(
            "INSERT INTO invoices (partner_id, billing_cycle, amount, due_date, status) \
             VALUES ($1, $2::date, $3, $2::date, $4)",
        )
        .bind(partner_id)
        .bind(cycle)
        .bind(amount)
        .bind(status)
        .execute(&pool)
        .await
        .unwrap();
    }

    let service = InvoiceService::new(pool.clone());
    let stats = service.invoice_stats().await.unwrap();
    assert_eq!(stats.pending_count, 1);
    assert_eq!(stats.sent_count, 1);
    assert_eq!(stats.paid_count, 1);
    assert_eq!(stats.total_revenue, Some(100.0));
    assert_eq!(stats.outstanding_revenue, Some(300.0));
}
