//! SQLite persistence layer.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
}

/// Everything the recorder wrote for one check, in one transaction.
///
/// `history_len` counts responses including the one just recorded, and
/// `prev_status` is the status of the response immediately before it.
/// Both feed the notification throttle.
#[derive(Debug)]
pub struct RecordedCheck {
    pub portal: Portal,
    pub response: CheckResponse,
    pub history_len: i64,
    pub prev_status: Option<i64>,
}

const PORTAL_COLUMNS: &str = "id, name, kind, url, parameters, method, status, email, \
     check_interval_secs, response_time_threshold_ms, auth_username, auth_password, \
     last_notification_sent, last_request_time, last_request_status, \
     last_request_latency_ms, last_request_error";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at the given path and run migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        // The recorder relies on SQLite's documented default of foreign-key
        // enforcement being OFF: record_response inserts a response first and
        // detects a vanished portal via the follow-up UPDATE affecting no rows.
        // Some bundled SQLite builds flip this default on at compile time, so
        // set it explicitly to the default the code is written against.
        conn.execute_batch("PRAGMA foreign_keys = OFF;")
            .map_err(|e| DbError::Migration(format!("pragma setup failed: {e}")))?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("migration 1 failed: {e}")))?;
        Ok(())
    }

    // --- Portal CRUD ---

    /// Insert a new portal and return its id.
    pub fn add_portal(&self, portal: &mut Portal) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO portals (name, kind, url, parameters, method, status, email, \
             check_interval_secs, response_time_threshold_ms, auth_username, auth_password, \
             last_notification_sent, last_request_time, last_request_status, \
             last_request_latency_ms, last_request_error) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                portal.name,
                portal.kind,
                portal.url,
                portal.parameters,
                portal.method,
                portal.status,
                portal.email,
                portal.check_interval_secs,
                portal.response_time_threshold_ms,
                portal.auth_username,
                portal.auth_password,
                format_time(portal.last_notification_sent),
                format_time(portal.last_request_time),
                portal.last_request_status,
                portal.last_request_latency_ms,
                portal.last_request_error,
            ],
        )?;
        let id = conn.last_insert_rowid();
        portal.id = id;
        Ok(id)
    }

    /// Update a portal's configuration fields. The last-check summary and
    /// notification bookkeeping are owned by the pipeline and left alone.
    pub fn update_portal(&self, portal: &Portal) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE portals SET name=?1, kind=?2, url=?3, parameters=?4, method=?5, \
             status=?6, email=?7, check_interval_secs=?8, response_time_threshold_ms=?9, \
             auth_username=?10, auth_password=?11 WHERE id=?12",
            params![
                portal.name,
                portal.kind,
                portal.url,
                portal.parameters,
                portal.method,
                portal.status,
                portal.email,
                portal.check_interval_secs,
                portal.response_time_threshold_ms,
                portal.auth_username,
                portal.auth_password,
                portal.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get a portal by id regardless of lifecycle state.
    pub fn get_portal(&self, id: i64) -> Result<Portal, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {PORTAL_COLUMNS} FROM portals WHERE id = ?1"),
            params![id],
            portal_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// All portals whose lifecycle state is Active.
    pub fn list_active(&self) -> Result<Vec<Portal>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT {PORTAL_COLUMNS} FROM portals WHERE status = ?1"))?;
        let portals = stmt
            .query_map(params![PortalStatus::Active], portal_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(portals)
    }

    /// Active portals, each with the time of its most recent response.
    pub fn list_active_with_last_response(&self) -> Result<Vec<PortalListEntry>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PORTAL_COLUMNS}, \
             (SELECT request_time FROM responses r \
              WHERE r.portal_id = portals.id \
              ORDER BY r.request_time DESC, r.id DESC LIMIT 1) \
             FROM portals WHERE status = ?1"
        ))?;
        let entries = stmt
            .query_map(params![PortalStatus::Active], |row| {
                let portal = portal_from_row(row)?;
                let last: Option<String> = row.get(17)?;
                Ok(PortalListEntry {
                    portal,
                    last_response_at: last.as_deref().and_then(parse_db_time),
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(entries)
    }

    /// Change a portal's lifecycle state (soft delete included).
    pub fn set_status(&self, id: i64, status: PortalStatus) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE portals SET status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Hard-delete a portal together with its response and alert history.
    pub fn purge_portal(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM notifications WHERE portal_id = ?1", params![id])?;
        tx.execute("DELETE FROM responses WHERE portal_id = ?1", params![id])?;
        let changed = tx.execute("DELETE FROM portals WHERE id = ?1", params![id])?;
        tx.commit()?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // --- Check pipeline writes ---

    /// Append a response to a portal's history and overwrite its last-check
    /// summary, atomically. Returns the inputs the throttle needs alongside
    /// the updated portal.
    pub fn record_response(
        &self,
        portal_id: i64,
        response: &CheckResponse,
    ) -> Result<RecordedCheck, DbError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let prev_status: Option<i64> = tx
            .query_row(
                "SELECT status FROM responses WHERE portal_id = ?1 \
                 ORDER BY request_time DESC, id DESC LIMIT 1",
                params![portal_id],
                |row| row.get(0),
            )
            .optional()?;

        tx.execute(
            "INSERT INTO responses (portal_id, request_time, status, latency_ms, error) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                portal_id,
                format_time(response.request_time),
                response.status,
                response.latency_ms,
                response.error,
            ],
        )?;
        let response_id = tx.last_insert_rowid();

        let changed = tx.execute(
            "UPDATE portals SET last_request_time=?1, last_request_status=?2, \
             last_request_latency_ms=?3, last_request_error=?4 WHERE id=?5",
            params![
                format_time(response.request_time),
                response.status,
                response.latency_ms,
                response.error,
                portal_id,
            ],
        )?;
        if changed == 0 {
            // Portal vanished under us; leave nothing behind.
            return Err(DbError::NotFound);
        }

        let history_len: i64 = tx.query_row(
            "SELECT COUNT(*) FROM responses WHERE portal_id = ?1",
            params![portal_id],
            |row| row.get(0),
        )?;

        let portal = tx.query_row(
            &format!("SELECT {PORTAL_COLUMNS} FROM portals WHERE id = ?1"),
            params![portal_id],
            portal_from_row,
        )?;

        tx.commit()?;

        let mut recorded = response.clone();
        recorded.id = response_id;
        recorded.portal_id = portal_id;

        Ok(RecordedCheck {
            portal,
            response: recorded,
            history_len,
            prev_status,
        })
    }

    /// Stamp the portal's last-notification time. The pipeline always passes
    /// the triggering response's request time, so the value only moves forward.
    pub fn set_last_notification_sent(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<Portal, DbError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE portals SET last_notification_sent = ?1 WHERE id = ?2",
            params![format_time(at), id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        conn.query_row(
            &format!("SELECT {PORTAL_COLUMNS} FROM portals WHERE id = ?1"),
            params![id],
            portal_from_row,
        )
        .map_err(DbError::from)
    }

    /// Append one alert record. Exactly one per approved outcome.
    pub fn append_notification(
        &self,
        portal_id: i64,
        response_id: i64,
        sent_at: DateTime<Utc>,
        cause: &str,
        provider_status: u16,
    ) -> Result<AlertRecord, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO notifications (portal_id, response_id, sent_at, cause, provider_status) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                portal_id,
                response_id,
                format_time(sent_at),
                cause,
                provider_status,
            ],
        )?;
        Ok(AlertRecord {
            id: conn.last_insert_rowid(),
            portal_id,
            response_id,
            sent_at,
            cause: cause.to_string(),
            provider_status,
        })
    }

    // --- History reads ---

    /// Most recent responses for a portal, newest first.
    pub fn list_responses(&self, portal_id: i64, limit: i64) -> Result<Vec<CheckResponse>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, portal_id, request_time, status, latency_ms, error FROM responses \
             WHERE portal_id = ?1 ORDER BY request_time DESC, id DESC LIMIT ?2",
        )?;
        let responses = stmt
            .query_map(params![portal_id, limit], |row| {
                let time: String = row.get(2)?;
                Ok(CheckResponse {
                    id: row.get(0)?,
                    portal_id: row.get(1)?,
                    request_time: parse_db_time(&time).unwrap_or(NEVER),
                    status: row.get(3)?,
                    latency_ms: row.get(4)?,
                    error: row.get(5)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(responses)
    }

    /// Sent-alert history for a portal, newest first.
    pub fn list_notifications(&self, portal_id: i64) -> Result<Vec<AlertRecord>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, portal_id, response_id, sent_at, cause, provider_status \
             FROM notifications WHERE portal_id = ?1 ORDER BY sent_at DESC, id DESC",
        )?;
        let records = stmt
            .query_map(params![portal_id], |row| {
                let sent: String = row.get(3)?;
                Ok(AlertRecord {
                    id: row.get(0)?,
                    portal_id: row.get(1)?,
                    response_id: row.get(2)?,
                    sent_at: parse_db_time(&sent).unwrap_or(NEVER),
                    cause: row.get(4)?,
                    provider_status: row.get(5)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(records)
    }
}

fn portal_from_row(row: &Row<'_>) -> rusqlite::Result<Portal> {
    let last_notification: String = row.get(12)?;
    let last_request: String = row.get(13)?;
    Ok(Portal {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        url: row.get(3)?,
        parameters: row.get(4)?,
        method: row.get(5)?,
        status: row.get(6)?,
        email: row.get(7)?,
        check_interval_secs: row.get(8)?,
        response_time_threshold_ms: row.get(9)?,
        auth_username: row.get(10)?,
        auth_password: row.get(11)?,
        last_notification_sent: parse_db_time(&last_notification).unwrap_or(NEVER),
        last_request_time: parse_db_time(&last_request).unwrap_or(NEVER),
        last_request_status: row.get(14)?,
        last_request_latency_ms: row.get(15)?,
        last_request_error: row.get(16)?,
    })
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::NamedTempFile;

    fn open_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn sample_portal() -> Portal {
        Portal {
            name: "Intranet".to_string(),
            url: "http://intranet.example.com".to_string(),
            email: "ops@example.com".to_string(),
            check_interval_secs: 20,
            response_time_threshold_ms: 500,
            ..Default::default()
        }
    }

    fn failing_response(at: DateTime<Utc>) -> CheckResponse {
        CheckResponse {
            id: 0,
            portal_id: 0,
            request_time: at,
            status: 503,
            latency_ms: 80,
            error: Some("unexpected status 503".to_string()),
        }
    }

    #[test]
    fn portal_crud() {
        let (_tmp, store) = open_store();

        let mut portal = sample_portal();
        let id = store.add_portal(&mut portal).unwrap();
        assert!(id > 0);

        let fetched = store.get_portal(id).unwrap();
        assert_eq!(fetched.name, "Intranet");
        assert_eq!(fetched.kind, PortalKind::WebApp);
        assert_eq!(fetched.last_notification_sent, NEVER);

        let mut updated = fetched;
        updated.name = "Intranet v2".to_string();
        updated.check_interval_secs = 30;
        store.update_portal(&updated).unwrap();
        assert_eq!(store.get_portal(id).unwrap().name, "Intranet v2");

        store.purge_portal(id).unwrap();
        assert!(matches!(store.get_portal(id), Err(DbError::NotFound)));
    }

    #[test]
    fn soft_delete_excludes_from_active_list() {
        let (_tmp, store) = open_store();

        let mut active = sample_portal();
        store.add_portal(&mut active).unwrap();

        let mut hidden = sample_portal();
        hidden.name = "Hidden".to_string();
        let hidden_id = store.add_portal(&mut hidden).unwrap();
        store.set_status(hidden_id, PortalStatus::Deleted).unwrap();

        let listed = store.list_active().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Intranet");

        // Soft-deleted rows stay fetchable by id.
        assert_eq!(store.get_portal(hidden_id).unwrap().status, PortalStatus::Deleted);
    }

    #[test]
    fn record_response_appends_and_overwrites_summary() {
        let (_tmp, store) = open_store();
        let mut portal = sample_portal();
        let id = store.add_portal(&mut portal).unwrap();

        let first_at = Utc::now() - Duration::minutes(2);
        let first = CheckResponse {
            status: 200,
            error: None,
            ..failing_response(first_at)
        };
        let recorded = store.record_response(id, &first).unwrap();
        assert_eq!(recorded.history_len, 1);
        assert_eq!(recorded.prev_status, None);
        assert_eq!(recorded.portal.last_request_status, 200);

        let second_at = Utc::now();
        let recorded = store.record_response(id, &failing_response(second_at)).unwrap();
        assert_eq!(recorded.history_len, 2);
        assert_eq!(recorded.prev_status, Some(200));
        assert_eq!(recorded.portal.last_request_status, 503);
        assert_eq!(recorded.portal.last_request_latency_ms, 80);
        assert_eq!(
            recorded.portal.last_request_error.as_deref(),
            Some("unexpected status 503")
        );
        assert!(recorded.response.id > 0);

        let history = store.list_responses(id, 10).unwrap();
        assert_eq!(history.len(), 2);
        // Newest first.
        assert_eq!(history[0].status, 503);
        assert_eq!(history[1].status, 200);
    }

    #[test]
    fn record_response_for_vanished_portal_is_not_found() {
        let (_tmp, store) = open_store();
        let err = store.record_response(999, &failing_response(Utc::now()));
        assert!(matches!(err, Err(DbError::NotFound)));
    }

    #[test]
    fn notification_bookkeeping() {
        let (_tmp, store) = open_store();
        let mut portal = sample_portal();
        let id = store.add_portal(&mut portal).unwrap();

        let at = Utc::now();
        let recorded = store.record_response(id, &failing_response(at)).unwrap();

        let updated = store.set_last_notification_sent(id, at).unwrap();
        // Round-trips through text storage at microsecond precision.
        assert_eq!(updated.last_notification_sent.timestamp_micros(), at.timestamp_micros());

        let record = store
            .append_notification(id, recorded.response.id, at, "first-ever-failure", 202)
            .unwrap();
        assert!(record.id > 0);

        let records = store.list_notifications(id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cause, "first-ever-failure");
        assert_eq!(records[0].provider_status, 202);
    }

    #[test]
    fn active_list_carries_last_response_time() {
        let (_tmp, store) = open_store();
        let mut portal = sample_portal();
        let id = store.add_portal(&mut portal).unwrap();

        let entries = store.list_active_with_last_response().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].last_response_at.is_none());

        let at = Utc::now();
        store.record_response(id, &failing_response(at)).unwrap();

        let entries = store.list_active_with_last_response().unwrap();
        assert_eq!(
            entries[0].last_response_at.map(|t| t.timestamp_micros()),
            Some(at.timestamp_micros())
        );
    }
}
