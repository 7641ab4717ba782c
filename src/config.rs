//! Configuration module for PortalWatch.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Misconfiguration never aborts startup; bad values fall back.

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "portalwatch.db")
    pub db_path: String,
    /// Background sweep period in minutes (default: 60)
    pub check_frequency_minutes: u64,
    /// Hours to suppress repeat alerts for a continuing failure.
    /// Negative disables alerting entirely; zero alerts on every failure.
    pub notify_ignore_hours: i64,
    /// Per-request probe timeout in seconds (default: 30)
    pub probe_timeout_secs: u64,
    /// SendGrid API key; empty means sends fail soft and get recorded as such.
    pub sendgrid_api_key: String,
    /// Alert sender address.
    pub mail_from: String,
    /// Alert reply-to address.
    pub mail_reply_to: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "portalwatch.db".to_string(),
            check_frequency_minutes: 60,
            notify_ignore_hours: 24,
            probe_timeout_secs: 30,
            sendgrid_api_key: String::new(),
            mail_from: "alerts@portalwatch.local".to_string(),
            mail_reply_to: "alerts@portalwatch.local".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORTALWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PORTALWATCH_DB_PATH`: database file path (default: "portalwatch.db")
    /// - `PORTALWATCH_CHECK_FREQUENCY_MINUTES`: sweep period (default: 60)
    /// - `PORTALWATCH_NOTIFY_IGNORE_HOURS`: alert throttle window (default: 24)
    /// - `PORTALWATCH_PROBE_TIMEOUT_SECS`: probe timeout (default: 30)
    /// - `SENDGRID_API_KEY`, `PORTALWATCH_MAIL_FROM`, `PORTALWATCH_MAIL_REPLY_TO`
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("PORTALWATCH_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("PORTALWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(freq_str) = env::var("PORTALWATCH_CHECK_FREQUENCY_MINUTES") {
            cfg.check_frequency_minutes = parse_frequency_minutes(&freq_str);
        }

        if let Ok(hours_str) = env::var("PORTALWATCH_NOTIFY_IGNORE_HOURS") {
            if let Ok(hours) = hours_str.parse() {
                cfg.notify_ignore_hours = hours;
            }
        }

        if let Ok(timeout_str) = env::var("PORTALWATCH_PROBE_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout_str.parse::<u64>() {
                if timeout > 0 {
                    cfg.probe_timeout_secs = timeout;
                }
            }
        }

        if let Ok(key) = env::var("SENDGRID_API_KEY") {
            cfg.sendgrid_api_key = key;
        }

        if let Ok(from) = env::var("PORTALWATCH_MAIL_FROM") {
            cfg.mail_from = from.clone();
            cfg.mail_reply_to = from;
        }

        if let Ok(reply_to) = env::var("PORTALWATCH_MAIL_REPLY_TO") {
            cfg.mail_reply_to = reply_to;
        }

        cfg
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.check_frequency_minutes * 60)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// The sweep frequency arrives as a string; anything unparseable, and a
/// zero that would spin the loop, falls back to 60 minutes.
fn parse_frequency_minutes(s: &str) -> u64 {
    match s.trim().parse::<u64>() {
        Ok(minutes) if minutes > 0 => minutes,
        _ => 60,
    }
}
