//! Background poller: periodically sweeps all active portals and checks
//! the ones whose interval has elapsed.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::db::{Portal, Store};
use crate::monitor::Monitor;

/// The sweep loop. One logical worker: portals are checked sequentially
/// within a sweep, and the inter-cycle sleep aborts promptly on stop.
pub struct Poller {
    store: Store,
    monitor: Arc<Monitor>,
    period: Duration,
    stop_tx: broadcast::Sender<()>,
}

impl Poller {
    pub fn new(store: Store, monitor: Arc<Monitor>, period: Duration) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            store,
            monitor,
            period,
            stop_tx,
        }
    }

    /// Spawn the background loop: sweep, sleep, repeat until stopped.
    pub fn start(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let monitor = self.monitor.clone();
        let period = self.period;
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            tracing::info!("poller started, sweep period {:?}", period);
            loop {
                sweep(&store, &monitor).await;

                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("poller stopped");
                        break;
                    }
                    _ = tokio::time::sleep(period) => {}
                }
            }
        })
    }

    /// Signal the loop to stop. The current sweep finishes its in-flight
    /// portal; the sleep is abandoned immediately.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

/// Whether a portal's check interval has elapsed. A portal that was never
/// probed carries the epoch sentinel and is always due.
pub fn is_due(portal: &Portal, now: DateTime<Utc>) -> bool {
    portal.last_request_time + ChronoDuration::seconds(portal.check_interval_secs) < now
}

/// One pass over the active portals. Per-portal failures are logged and
/// the sweep moves on; only the portal in flight is affected.
pub async fn sweep(store: &Store, monitor: &Monitor) {
    let portals = match store.list_active() {
        Ok(portals) => portals,
        Err(e) => {
            tracing::error!("sweep aborted, could not load portals: {e}");
            return;
        }
    };

    let now = Utc::now();
    let due: Vec<Portal> = portals.into_iter().filter(|p| is_due(p, now)).collect();
    tracing::debug!(due = due.len(), "sweep selected portals");

    for portal in due {
        match monitor.check_portal(&portal).await {
            Ok(response) => {
                tracing::info!(
                    portal_id = portal.id,
                    name = %portal.name,
                    status = response.status,
                    latency_ms = response.latency_ms,
                    "portal checked"
                );
            }
            Err(e) => {
                tracing::warn!(portal_id = portal.id, "check dropped: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CheckResponse, NEVER};
    use crate::notify::{MailError, MailSender, Notifier};
    use crate::probe;
    use async_trait::async_trait;
    use axum::routing::get;
    use axum::Router;
    use tempfile::NamedTempFile;

    struct NullMailer;

    #[async_trait]
    impl MailSender for NullMailer {
        async fn send_failure_alert(
            &self,
            _portal: &Portal,
            _response: &CheckResponse,
        ) -> Result<u16, MailError> {
            Ok(202)
        }
    }

    fn portal_with(last_request: DateTime<Utc>, interval_secs: i64) -> Portal {
        Portal {
            last_request_time: last_request,
            check_interval_secs: interval_secs,
            ..Default::default()
        }
    }

    #[test]
    fn never_probed_portal_is_always_due() {
        let now = Utc::now();
        assert!(is_due(&portal_with(NEVER, 20), now));
    }

    #[test]
    fn due_selection_respects_the_interval() {
        let now = Utc::now();
        let recent = portal_with(now - ChronoDuration::seconds(15), 20);
        assert!(!is_due(&recent, now));

        let overdue = portal_with(now - ChronoDuration::seconds(25), 20);
        assert!(is_due(&overdue, now));
    }

    #[tokio::test]
    async fn sweep_checks_only_due_portals() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/", get(|| async { "ok" })))
                .await
                .unwrap();
        });

        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let mut due = Portal {
            name: "Due".to_string(),
            url: format!("http://{addr}"),
            email: "ops@example.com".to_string(),
            check_interval_secs: 20,
            ..Default::default()
        };
        let due_id = store.add_portal(&mut due).unwrap();

        // Probed moments ago: not due, must be left alone.
        let mut fresh = Portal {
            id: 0,
            name: "Fresh".to_string(),
            last_request_time: Utc::now(),
            ..due.clone()
        };
        let fresh_id = store.add_portal(&mut fresh).unwrap();

        let client = probe::build_client(Duration::from_secs(5)).unwrap();
        let notifier = Arc::new(Notifier::new(store.clone(), Arc::new(NullMailer), 24));
        let monitor = Monitor::new(store.clone(), client, notifier);

        sweep(&store, &monitor).await;

        let checked = store.get_portal(due_id).unwrap();
        assert_eq!(checked.last_request_status, 200);
        assert_eq!(store.list_responses(due_id, 10).unwrap().len(), 1);

        assert!(store.list_responses(fresh_id, 10).unwrap().is_empty());
    }
}
