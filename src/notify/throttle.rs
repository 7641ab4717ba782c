//! Alert-suppression decision.
//!
//! Pure logic, no I/O: given a portal's alerting history and a new failing
//! check, decide whether an email goes out now and why.

use chrono::{DateTime, Duration, Utc};

use crate::db::NEVER;

/// Why an alert was approved. Stored on the alert record for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCause {
    /// Configured window is zero: alert on every failing check.
    EveryError,
    /// First recorded failure for this portal, or nothing was ever sent.
    FirstEverFailure,
    /// The check immediately before this one succeeded.
    FirstAfterRecovery,
    /// The last alert is older than the configured window.
    StaleWindow,
}

impl AlertCause {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertCause::EveryError => "every-error",
            AlertCause::FirstEverFailure => "first-ever-failure",
            AlertCause::FirstAfterRecovery => "first-after-recovery",
            AlertCause::StaleWindow => "stale-notification-window",
        }
    }
}

/// Decide whether a failing check warrants an alert email.
///
/// `ignore_hours < 0` disables alerting entirely; `0` alerts on every
/// failure. `history_len` counts recorded checks including the failing one
/// being decided, and `prev_status` is the status of the check immediately
/// before it, if any.
///
/// When several causes hold at once the label precedence is
/// every-error > first-ever > first-after-recovery > stale-window; the
/// boolean outcome is the same either way.
pub fn should_alert(
    ignore_hours: i64,
    history_len: i64,
    prev_status: Option<i64>,
    last_notification_sent: DateTime<Utc>,
    request_time: DateTime<Utc>,
) -> Option<AlertCause> {
    if ignore_hours < 0 {
        return None;
    }

    let every_error = ignore_hours == 0;
    let first_ever = history_len <= 1 || last_notification_sent == NEVER;
    let first_after_recovery = prev_status.is_some_and(|s| (200..=299).contains(&s));
    let stale_window = last_notification_sent + Duration::hours(ignore_hours) < request_time;

    if every_error {
        Some(AlertCause::EveryError)
    } else if first_ever {
        Some(AlertCause::FirstEverFailure)
    } else if first_after_recovery {
        Some(AlertCause::FirstAfterRecovery)
    } else if stale_window {
        Some(AlertCause::StaleWindow)
    } else {
        None
    }
}
