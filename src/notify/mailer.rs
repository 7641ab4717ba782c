//! Mail provider seam.
//!
//! One production implementation speaking the SendGrid v3 mail API; the
//! trait exists so the notification dispatcher can be exercised with a
//! recording double.

use async_trait::async_trait;
use thiserror::Error;

use crate::db::{CheckResponse, Portal};

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Mail error types.
#[derive(Error, Debug)]
pub enum MailError {
    #[error("mail transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Abstract alert-email sender. Returns the provider's HTTP status code;
/// SendGrid answers 202 when a message is queued for delivery.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send_failure_alert(
        &self,
        portal: &Portal,
        response: &CheckResponse,
    ) -> Result<u16, MailError>;
}

/// SendGrid v3 web API client.
pub struct SendGridMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
    reply_to: String,
}

impl SendGridMailer {
    pub fn new(client: reqwest::Client, api_key: String, from: String, reply_to: String) -> Self {
        Self {
            client,
            api_key,
            from,
            reply_to,
        }
    }
}

#[async_trait]
impl MailSender for SendGridMailer {
    async fn send_failure_alert(
        &self,
        portal: &Portal,
        response: &CheckResponse,
    ) -> Result<u16, MailError> {
        let error = response.error.as_deref().unwrap_or("none");
        let when = response.request_time.format("%Y-%m-%d %H:%M:%S");

        let text = format!(
            "{} (URL: {}) responded with status {} and message \"{}\" in {} ms on {}",
            portal.name, portal.url, response.status, error, response.latency_ms, when
        );
        let html = format!(
            "<p><strong>Portal:</strong> {}</p>\
             <p><strong>URL:</strong> {}</p>\
             <p><strong>Status:</strong> {}</p>\
             <p><strong>Message:</strong> {}</p>\
             <p><strong>Response time:</strong> {} ms</p>\
             <p><strong>Checked at:</strong> {}</p>",
            portal.name, portal.url, response.status, error, response.latency_ms, when
        );

        let message = serde_json::json!({
            "personalizations": [{ "to": [{ "email": portal.email }] }],
            "from": { "email": self.from },
            "reply_to": { "email": self.reply_to },
            "subject": format!("PortalWatch: {} failed its check", portal.name),
            "content": [
                { "type": "text/plain", "value": text },
                { "type": "text/html", "value": html },
            ],
        });

        let provider = self
            .client
            .post(SENDGRID_SEND_URL)
            .bearer_auth(&self.api_key)
            .json(&message)
            .send()
            .await?;

        Ok(provider.status().as_u16())
    }
}
