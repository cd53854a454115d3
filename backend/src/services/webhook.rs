//! # Completion Webhook
//!
//! Notifies a merchant endpoint when a payment completes.
//!
//! ## Request
//!
//! ```text
//! POST {WEBHOOK_URL}
//! Content-Type: application/json
//! X-Signature: hex(HMAC-SHA256(WEBHOOK_SECRET, body))
//!
//! {"event":"payment.completed","payment":{...}}
//! ```
//!
//! Receivers verify the signature over the raw body bytes. Delivery is
//! best effort: a failure is logged and never touches payment state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::db::{PaymentRecord, PaymentStatus};

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Errors that can occur while delivering a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook endpoint answered {0}")]
    Status(u16),

    #[error("Failed to serialize webhook payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Invalid webhook secret")]
    Secret,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentPayload<'a> {
    id: Uuid,
    address: &'a str,
    amount: i64,
    status: PaymentStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct WebhookEvent<'a> {
    event: &'static str,
    payment: PaymentPayload<'a>,
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::Secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Serialize the `payment.completed` event for `payment`.
fn completed_event(payment: &PaymentRecord) -> Result<Vec<u8>, WebhookError> {
    let event = WebhookEvent {
        event: "payment.completed",
        payment: PaymentPayload {
            id: payment.id,
            address: &payment.address,
            amount: payment.amount_sats,
            status: PaymentStatus::Completed,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
            expires_at: payment.expires_at,
        },
    };
    Ok(serde_json::to_vec(&event)?)
}

/// Sends signed completion callbacks.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            secret: config.secret.clone(),
        })
    }

    /// POST the `payment.completed` event for `payment`.
    pub async fn notify_completed(&self, payment: &PaymentRecord) -> Result<(), WebhookError> {
        let body = completed_event(payment)?;
        let signature = sign_payload(&self.secret, &body)?;

        info!(payment_id = %payment.id, "Sending completion webhook");

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Signature", signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(payment_id = %payment.id, %status, "Webhook endpoint refused the event");
            return Err(WebhookError::Status(status.as_u16()));
        }

        info!(payment_id = %payment.id, "Webhook delivered");
        Ok(())
    }
}
