//! Failure notifications: throttle decision, email dispatch, audit trail.

mod mailer;
mod throttle;

pub use mailer::{MailError, MailSender, SendGridMailer};
pub use throttle::{should_alert, AlertCause};

use std::sync::Arc;

use crate::db::{DbError, RecordedCheck, Store};

/// SendGrid's "queued for delivery" answer.
const PROVIDER_ACCEPTED: u16 = 202;

/// Decides on and dispatches alert emails for failing checks.
pub struct Notifier {
    store: Store,
    mailer: Arc<dyn MailSender>,
    ignore_hours: i64,
}

impl Notifier {
    pub fn new(store: Store, mailer: Arc<dyn MailSender>, ignore_hours: i64) -> Self {
        Self {
            store,
            mailer,
            ignore_hours,
        }
    }

    /// Run the notification branch for one recorded failing check.
    ///
    /// When the throttle approves: stamp the portal's last-notification time
    /// with the check's request time, send the email, and append an alert
    /// record whether or not the provider took it. Returns the provider
    /// status, or `None` when the alert was suppressed.
    pub async fn notify_failure(&self, recorded: &RecordedCheck) -> Result<Option<u16>, DbError> {
        let portal = &recorded.portal;
        let response = &recorded.response;

        let Some(cause) = should_alert(
            self.ignore_hours,
            recorded.history_len,
            recorded.prev_status,
            portal.last_notification_sent,
            response.request_time,
        ) else {
            return Ok(None);
        };

        // Stamped before the send: a crash in between suppresses one alert
        // instead of duplicating it on the next cycle.
        self.store
            .set_last_notification_sent(portal.id, response.request_time)?;

        let provider_status = match self
            .mailer
            .send_failure_alert(portal, response)
            .await
        {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(portal_id = portal.id, "alert email failed: {e}");
                0
            }
        };

        if provider_status == PROVIDER_ACCEPTED {
            tracing::info!(
                portal_id = portal.id,
                response_id = response.id,
                cause = cause.as_str(),
                "alert email queued"
            );
        } else {
            tracing::warn!(
                portal_id = portal.id,
                response_id = response.id,
                provider_status,
                "alert email was not accepted"
            );
        }

        self.store.append_notification(
            portal.id,
            response.id,
            response.request_time,
            cause.as_str(),
            provider_status,
        )?;

        Ok(Some(provider_status))
    }
}
