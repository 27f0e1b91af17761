use once_cell::sync::Lazy;

/// Default commission percentage applied when a partner has no rate configured.
pub static COMMISSION_RATE: Lazy<f64> = Lazy::new(|| {
    std::env::var("COMMISSION_RATE")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| *value >= 0.0)
        .unwrap_or(15.0)
});

/// Days a completed retreat must age before its commission becomes billable.
pub static HOLD_PERIOD_DAYS: Lazy<i64> = Lazy::new(|| {
    std::env::var("HOLD_PERIOD_DAYS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value >= 0)
        .unwrap_or(30)
});

/// Hours until a freshly created invoice falls due.
pub static INVOICE_DUE_HOURS: Lazy<i64> = Lazy::new(|| {
    std::env::var("INVOICE_DUE_HOURS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(72)
});

/// Cadence of the scheduled full-cycle billing run.
pub static BILLING_RUN_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("BILLING_RUN_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3600)
});

/// Cadence of the payment reconciliation sweep.
pub static PAYMENT_CHECK_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("PAYMENT_CHECK_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3600)
});

/// Cadence of the overdue-payment notification sweep.
pub static OVERDUE_CHECK_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("OVERDUE_CHECK_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(86_400)
});

/// Days past the due date before an invoice counts as payment-overdue.
pub static PAYMENT_OVERDUE_GRACE_DAYS: Lazy<i64> = Lazy::new(|| {
    std::env::var("PAYMENT_OVERDUE_GRACE_DAYS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value >= 0)
        .unwrap_or(7)
});

/// PayPal environment. `sandbox` unless explicitly set to `live`.
pub static PAYPAL_MODE: Lazy<String> =
    Lazy::new(|| std::env::var("PAYPAL_MODE").unwrap_or_else(|_| "sandbox".to_string()));

pub static PAYPAL_CLIENT_ID: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("PAYPAL_CLIENT_ID"));

pub static PAYPAL_CLIENT_SECRET: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("PAYPAL_CLIENT_SECRET"));

/// Merchant address shown as the invoicer on outbound invoices.
pub static PAYPAL_MERCHANT_EMAIL: Lazy<String> = Lazy::new(|| {
    std::env::var("PAYPAL_MERCHANT_EMAIL")
        .unwrap_or_else(|_| "partners@psychedelics.com".to_string())
});

pub static GMAIL_CLIENT_ID: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("GOOGLE_CLIENT_ID"));

pub static GMAIL_CLIENT_SECRET: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("GOOGLE_CLIENT_SECRET"));

pub static GMAIL_REFRESH_TOKEN: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("GOOGLE_REFRESH_TOKEN"));

pub static FROM_EMAIL: Lazy<String> = Lazy::new(|| {
    std::env::var("FROM_EMAIL").unwrap_or_else(|_| "reports@psychedelics.com".to_string())
});

pub static FROM_NAME: Lazy<String> = Lazy::new(|| {
    std::env::var("FROM_NAME").unwrap_or_else(|_| "Psychedelics.com Partner Team".to_string())
});

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
