//! Database model types.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

/// Timestamp sentinel meaning "never happened".
pub const NEVER: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// What kind of endpoint a portal is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortalKind {
    WebApp,
    ServiceRest,
    ServiceSoap,
}

impl PortalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PortalKind::WebApp => "web-app",
            PortalKind::ServiceRest => "service-rest",
            PortalKind::ServiceSoap => "service-soap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "web-app" => Some(PortalKind::WebApp),
            "service-rest" => Some(PortalKind::ServiceRest),
            "service-soap" => Some(PortalKind::ServiceSoap),
            _ => None,
        }
    }
}

/// HTTP method used when probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    Post,
}

impl RequestMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(RequestMethod::Get),
            "POST" => Some(RequestMethod::Post),
            _ => None,
        }
    }
}

/// Portal lifecycle state. Deleted rows stay in the table until purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortalStatus {
    Active,
    NotActive,
    Deleted,
}

impl PortalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PortalStatus::Active => "active",
            PortalStatus::NotActive => "not-active",
            PortalStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PortalStatus::Active),
            "not-active" => Some(PortalStatus::NotActive),
            "deleted" => Some(PortalStatus::Deleted),
            _ => None,
        }
    }
}

macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                Self::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown value: {s}").into()))
            }
        }
    };
}

sql_text_enum!(PortalKind);
sql_text_enum!(RequestMethod);
sql_text_enum!(PortalStatus);

/// A monitored endpoint, with its denormalized last-check summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portal {
    pub id: i64,
    pub name: String,
    pub kind: PortalKind,
    pub url: String,
    /// JSON or XML payload for POST probes, absent for GET.
    pub parameters: Option<String>,
    pub method: RequestMethod,
    pub status: PortalStatus,
    /// Address failure alerts go to.
    pub email: String,
    pub check_interval_secs: i64,
    pub response_time_threshold_ms: i64,
    pub auth_username: Option<String>,
    #[serde(skip_serializing, default)]
    pub auth_password: Option<String>,
    /// `NEVER` until the first alert goes out; only ever moves forward.
    pub last_notification_sent: DateTime<Utc>,
    pub last_request_time: DateTime<Utc>,
    pub last_request_status: i64,
    pub last_request_latency_ms: i64,
    pub last_request_error: Option<String>,
}

impl Default for Portal {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            kind: PortalKind::WebApp,
            url: String::new(),
            parameters: None,
            method: RequestMethod::Get,
            status: PortalStatus::Active,
            email: String::new(),
            check_interval_secs: 60,
            response_time_threshold_ms: 1000,
            auth_username: None,
            auth_password: None,
            last_notification_sent: NEVER,
            last_request_time: NEVER,
            last_request_status: 0,
            last_request_latency_ms: 0,
            last_request_error: None,
        }
    }
}

/// The result of one probe. Append-only; never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    pub id: i64,
    pub portal_id: i64,
    pub request_time: DateTime<Utc>,
    /// HTTP status code; 0 means the transport call itself failed.
    pub status: i64,
    pub latency_ms: i64,
    /// Set exactly when the status falls outside 200..=299.
    pub error: Option<String>,
}

impl CheckResponse {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

/// One sent (or attempted) alert email. Append-only.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub id: i64,
    pub portal_id: i64,
    pub response_id: i64,
    pub sent_at: DateTime<Utc>,
    pub cause: String,
    /// Mail provider HTTP status; 0 when the send failed outright.
    pub provider_status: u16,
}

/// A portal paired with the time of its most recent recorded response,
/// for the dashboard list.
#[derive(Debug, Clone, Serialize)]
pub struct PortalListEntry {
    #[serde(flatten)]
    pub portal: Portal,
    pub last_response_at: Option<DateTime<Utc>>,
}
