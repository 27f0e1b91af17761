use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tracing::debug;

use super::models::{CommissionMode, Invoice, InvoiceLineItem, Partner};
use crate::config;

/// Remote invoice handle returned by the gateway at creation time.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteInvoice {
    pub id: String,
    #[serde(default)]
    pub href: Option<String>,
}

impl RemoteInvoice {
    pub fn url(&self) -> String {
        self.href
            .clone()
            .unwrap_or_else(|| format!("https://www.paypal.com/invoice/p/#{}", self.id))
    }
}

/// key: payment-gateway -> remote invoicing contract
///
/// All failures here are retryable; local invoices stay `pending` and the
/// next billing attempt resumes at publish.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(&self, payload: Value) -> Result<RemoteInvoice>;
    async fn send_invoice(&self, remote_id: &str) -> Result<()>;
    async fn invoice_status(&self, remote_id: &str) -> Result<String>;

    async fn is_invoice_paid(&self, remote_id: &str) -> Result<bool> {
        Ok(self.invoice_status(remote_id).await? == "PAID")
    }
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// key: paypal-gateway -> OAuth token cached as instance state, no singleton
pub struct PaypalGateway {
    base: String,
    client_id: String,
    client_secret: String,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl PaypalGateway {
    pub fn from_env() -> Option<Self> {
        let client_id = config::PAYPAL_CLIENT_ID.clone()?;
        let client_secret = config::PAYPAL_CLIENT_SECRET.clone()?;
        let base = if config::PAYPAL_MODE.as_str() == "live" {
            "https://api-m.paypal.com"
        } else {
            "https://api-m.sandbox.paypal.com"
        };
        Some(Self::new(base, client_id, client_secret))
    }

    pub fn new(
        base: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            client: Client::builder()
                .timeout(StdDuration::from_secs(10))
                .build()
                .expect("client build"),
            token: Mutex::new(None),
        }
    }

    async fn valid_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Utc::now() {
                return Ok(cached.token.clone());
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64,
        }

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await
            .context("payment gateway token request failed")?
            .error_for_status()
            .context("payment gateway rejected credentials")?;

        let token: TokenResponse = response
            .json()
            .await
            .context("malformed token response from payment gateway")?;

        // Refresh five minutes before the advertised expiry.
        let expires_at = Utc::now() + Duration::seconds((token.expires_in - 300).max(0));
        *guard = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at,
        });
        debug!("payment gateway access token refreshed");

        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentGateway for PaypalGateway {
    async fn create_invoice(&self, payload: Value) -> Result<RemoteInvoice> {
        let token = self.valid_token().await?;
        let remote: RemoteInvoice = self
            .client
            .post(format!("{}/v2/invoicing/invoices", self.base))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .context("failed to reach payment gateway")?
            .error_for_status()
            .context("payment gateway rejected invoice payload")?
            .json()
            .await
            .context("malformed invoice response from payment gateway")?;
        Ok(remote)
    }

    async fn send_invoice(&self, remote_id: &str) -> Result<()> {
        let token = self.valid_token().await?;
        self.client
            .post(format!("{}/v2/invoicing/invoices/{remote_id}/send", self.base))
            .bearer_auth(token)
            .json(&json!({ "send_to_invoicer": false }))
            .send()
            .await
            .context("failed to reach payment gateway")?
            .error_for_status()
            .context("payment gateway refused to dispatch invoice")?;
        Ok(())
    }

    async fn invoice_status(&self, remote_id: &str) -> Result<String> {
        let token = self.valid_token().await?;
        let body: Value = self
            .client
            .get(format!("{}/v2/invoicing/invoices/{remote_id}", self.base))
            .bearer_auth(token)
            .send()
            .await
            .context("failed to reach payment gateway")?
            .error_for_status()
            .context("payment gateway rejected status lookup")?
            .json()
            .await
            .context("malformed status response from payment gateway")?;
        Ok(body["status"].as_str().unwrap_or_default().to_string())
    }
}

/// Remote payload for a consolidated invoice: one remote line item per
/// booking with a human-readable commission breakdown.
pub fn build_invoice_payload(
    partner: &Partner,
    invoice: &Invoice,
    line_items: &[InvoiceLineItem],
) -> Value {
    let billing_month = invoice.billing_cycle.format("%B %Y").to_string();

    let items: Vec<Value> = line_items
        .iter()
        .map(|item| {
            let breakdown = match CommissionMode::parse(&item.commission_type) {
                Some(CommissionMode::FlatRate) => format!(
                    "Flat rate: ${:.2}",
                    item.flat_rate_amount.unwrap_or(item.line_item_amount)
                ),
                _ => format!(
                    "{}% of ${:.2}",
                    item.commission_rate.unwrap_or_default(),
                    item.revenue
                ),
            };
            json!({
                "name": format!("Retreat - {}", item.guest_name),
                "description": format!(
                    "Date: {}\nRevenue: ${:.2}\nCommission: {}",
                    item.retreat_date, item.revenue, breakdown
                ),
                "quantity": "1",
                "unit_amount": {
                    "currency_code": "USD",
                    "value": format!("{:.2}", item.line_item_amount),
                },
            })
        })
        .collect();

    json!({
        "detail": {
            "invoice_number": format!("INV-{}", invoice.id),
            "invoice_date": Utc::now().date_naive().to_string(),
            "payment_term": { "due_date": invoice.due_date.to_string() },
            "currency_code": "USD",
            "note": format!(
                "Monthly commission invoice for {billing_month}\n{} completed retreat{}",
                line_items.len(),
                if line_items.len() == 1 { "" } else { "s" }
            ),
            "memo": "Thank you for your partnership with Psychedelics.com",
        },
        "invoicer": {
            "name": { "given_name": "Psychedelics.com" },
            "email_address": config::PAYPAL_MERCHANT_EMAIL.as_str(),
        },
        "primary_recipients": [
            {
                "billing_info": {
                    "name": { "given_name": partner.name },
                    "email_address": partner.email,
                },
            },
        ],
        "items": items,
        "configuration": {
            "partial_payment": { "allow_partial_payment": false },
            "allow_tip": false,
            "tax_calculated_after_discount": true,
            "tax_inclusive": false,
        },
        "amount": {
            "breakdown": {
                "item_total": {
                    "currency_code": "USD",
                    "value": format!("{:.2}", invoice.amount),
                },
            },
        },
    })
}
