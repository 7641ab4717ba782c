//! The check pipeline: probe, record, notify.
//!
//! Shared by the background poller and the on-demand ping endpoints so
//! every outcome, success or failure, takes the same path through the
//! recorder before anything else happens.

use serde::Serialize;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::{CheckResponse, DbError, Portal, PortalListEntry, PortalStatus, Store};
use crate::notify::Notifier;
use crate::probe;

/// An on-demand ping result, paired with the time of the most recent
/// response recorded before this one.
#[derive(Debug, Serialize)]
pub struct PingOutcome {
    #[serde(flatten)]
    pub response: CheckResponse,
    pub last_response_at: Option<DateTime<Utc>>,
}

pub struct Monitor {
    store: Store,
    client: reqwest::Client,
    notifier: Arc<Notifier>,
}

impl Monitor {
    pub fn new(store: Store, client: reqwest::Client, notifier: Arc<Notifier>) -> Self {
        Self {
            store,
            client,
            notifier,
        }
    }

    /// Probe one portal and run the full pipeline on the outcome.
    pub async fn check_portal(&self, portal: &Portal) -> Result<CheckResponse, DbError> {
        let response = probe::run_check(&self.client, portal).await;
        self.record_and_notify(portal.id, response).await
    }

    /// On-demand check of a stored portal. `None` when no Active portal
    /// matches the id.
    pub async fn ping_by_id(&self, id: i64) -> Result<Option<PingOutcome>, DbError> {
        let portal = match self.store.get_portal(id) {
            Ok(p) if p.status == PortalStatus::Active => p,
            Ok(_) | Err(DbError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };

        let last_response_at = self
            .store
            .list_responses(id, 1)?
            .first()
            .map(|r| r.request_time);

        let response = self.check_portal(&portal).await?;
        Ok(Some(PingOutcome {
            response,
            last_response_at,
        }))
    }

    /// Check a portal definition that need not be persisted. A draft whose
    /// id is unknown to the store gets probed and returned without side
    /// effects; a known id goes through the normal record path.
    pub async fn ping_by_definition(&self, draft: &Portal) -> Result<CheckResponse, DbError> {
        let response = probe::run_check(&self.client, draft).await;
        match self.record_and_notify(draft.id, response.clone()).await {
            Ok(recorded) => Ok(recorded),
            Err(DbError::NotFound) => Ok(response),
            Err(e) => Err(e),
        }
    }

    /// Active portals with their most recent response timestamp.
    pub fn list_active_with_last_response(&self) -> Result<Vec<PortalListEntry>, DbError> {
        self.store.list_active_with_last_response()
    }

    async fn record_and_notify(
        &self,
        portal_id: i64,
        response: CheckResponse,
    ) -> Result<CheckResponse, DbError> {
        let recorded = self.store.record_response(portal_id, &response)?;

        if !recorded.response.is_success() {
            // Notification bookkeeping failures must not take the check down
            // with them; the outcome is already recorded.
            if let Err(e) = self.notifier.notify_failure(&recorded).await {
                tracing::warn!(portal_id, "notification dropped: {e}");
            }
        }

        Ok(recorded.response)
    }
}
