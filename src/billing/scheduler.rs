use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio::time::{self, Duration as TokioDuration};
use tracing::{info, warn};

use super::gateway::PaymentGateway;
use super::orchestrator;
use crate::config;
use crate::email::Mailer;
use crate::notifications;

/// key: billing-scheduler -> automate invoicing, reconciliation, overdue sweep
pub fn spawn(pool: PgPool, gateway: Arc<dyn PaymentGateway>, mailer: Arc<dyn Mailer>) {
    let billing_interval = TokioDuration::from_secs(*config::BILLING_RUN_INTERVAL_SECS);
    let payment_interval = TokioDuration::from_secs(*config::PAYMENT_CHECK_INTERVAL_SECS);
    let overdue_interval = TokioDuration::from_secs(*config::OVERDUE_CHECK_INTERVAL_SECS);

    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        let mailer = mailer.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(billing_interval);
            loop {
                ticker.tick().await;
                match orchestrator::run_billing_cycle(&pool, &gateway, &mailer, None, Utc::now())
                    .await
                {
                    Ok(report) => {
                        if report.total_partners > 0 {
                            info!(
                                billing_cycle = %report.billing_cycle,
                                success = report.success_count,
                                failed = report.failure_count,
                                "scheduled billing run complete"
                            );
                        }
                    }
                    Err(err) => warn!(?err, "scheduled billing run failed"),
                }
            }
        });
    }

    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(payment_interval);
            loop {
                ticker.tick().await;
                if let Err(err) = orchestrator::reconcile_payments(&pool, &gateway).await {
                    warn!(?err, "scheduled payment reconciliation failed");
                }
            }
        });
    }

    tokio::spawn(async move {
        let mut ticker = time::interval(overdue_interval);
        loop {
            ticker.tick().await;
            match notifications::check_overdue_payments(&pool, Utc::now()).await {
                Ok(count) if count > 0 => {
                    info!(count, "overdue payment notifications created")
                }
                Ok(_) => {}
                Err(err) => warn!(?err, "overdue payment sweep failed"),
            }
        }
    });
}
