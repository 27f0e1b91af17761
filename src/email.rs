use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tracing::info;

use crate::billing::models::{Invoice, Partner};
use crate::config;

/// key: email-transport -> fire-and-forget from the billing engine's view;
/// callers log failures and never abort billing on them.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_invoice_notification(
        &self,
        partner: &Partner,
        invoice: &Invoice,
        line_item_count: usize,
        remote_url: &str,
    ) -> Result<()>;
}

/// Fallback when no mail credentials are configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_invoice_notification(
        &self,
        partner: &Partner,
        invoice: &Invoice,
        line_item_count: usize,
        remote_url: &str,
    ) -> Result<()> {
        info!(
            partner = %partner.email,
            invoice = invoice.id,
            line_items = line_item_count,
            %remote_url,
            "invoice email suppressed: no mail credentials configured"
        );
        Ok(())
    }
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Gmail REST transport with a cached refresh-token exchange.
pub struct GmailMailer {
    token_url: String,
    api_base: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl GmailMailer {
    pub fn from_env() -> Option<Self> {
        let client_id = config::GMAIL_CLIENT_ID.clone()?;
        let client_secret = config::GMAIL_CLIENT_SECRET.clone()?;
        let refresh_token = config::GMAIL_REFRESH_TOKEN.clone()?;
        Some(Self::new(
            "https://oauth2.googleapis.com",
            "https://gmail.googleapis.com",
            client_id,
            client_secret,
            refresh_token,
        ))
    }

    pub fn new(
        token_url: impl Into<String>,
        api_base: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into().trim_end_matches('/').to_string(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
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

        let token: TokenResponse = self
            .client
            .post(format!("{}/token", self.token_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("mail token request failed")?
            .error_for_status()
            .context("mail transport rejected credentials")?
            .json()
            .await
            .context("malformed mail token response")?;

        let expires_at = Utc::now() + Duration::seconds((token.expires_in - 300).max(0));
        *guard = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    /// RFC 2822 message, base64url-encoded the way the Gmail API expects.
    fn encode_message(to: &str, subject: &str, html: &str) -> String {
        let message = format!(
            "From: {} <{}>\nTo: {}\nSubject: {}\nMIME-Version: 1.0\nContent-Type: text/html; charset=utf-8\n\n{}",
            config::FROM_NAME.as_str(),
            config::FROM_EMAIL.as_str(),
            to,
            subject,
            html
        );
        URL_SAFE_NO_PAD.encode(message)
    }
}

#[async_trait]
impl Mailer for GmailMailer {
    async fn send_invoice_notification(
        &self,
        partner: &Partner,
        invoice: &Invoice,
        line_item_count: usize,
        remote_url: &str,
    ) -> Result<()> {
        let billing_month = invoice.billing_cycle.format("%B %Y").to_string();
        let subject = format!("Commission Invoice for {billing_month} (INV-{})", invoice.id);
        let html = format!(
            "<p>Hi {},</p>\
             <p>Your consolidated commission invoice for {} is ready: \
             {} completed retreat{} totalling ${:.2}, due {}.</p>\
             <p><a href=\"{}\">View and pay the invoice</a></p>\
             <p>Thank you for your partnership with Psychedelics.com.</p>",
            partner.name,
            billing_month,
            line_item_count,
            if line_item_count == 1 { "" } else { "s" },
            invoice.amount,
            invoice.due_date,
            remote_url
        );

        let token = self.valid_token().await?;
        let raw = Self::encode_message(&partner.email, &subject, &html);
        self.client
            .post(format!(
                "{}/gmail/v1/users/me/messages/send",
                self.api_base
            ))
            .bearer_auth(token)
            .json(&json!({ "raw": raw }))
            .send()
            .await
            .context("failed to reach mail transport")?
            .error_for_status()
            .context("mail transport rejected message")?;

        info!(
            partner = %partner.email,
            invoice = invoice.id,
            "invoice notification email sent"
        );
        Ok(())
    }
}
