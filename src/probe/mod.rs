//! Probe dispatch: one HTTP request per check, protocol-aware.
//!
//! `run_check` never fails; every outcome, including transport errors and
//! malformed payloads, comes back as a classified [`CheckResponse`].

mod payload;

pub use payload::{normalize_xml, validate_json};

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::db::{CheckResponse, Portal, PortalKind, RequestMethod};

/// Payload error types.
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("XML parse error: {0}")]
    Xml(String),
}

enum RequestBody {
    None,
    Json(String),
    Xml(String),
}

/// Build the shared probe client with the configured per-request timeout.
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Probe a portal once and classify the outcome.
///
/// Latency is measured around the transport call only; payload handling
/// happens before the clock starts. Persistence is the caller's job.
pub async fn run_check(client: &reqwest::Client, portal: &Portal) -> CheckResponse {
    let request_time = Utc::now();

    let body = match build_body(portal) {
        Ok(body) => body,
        Err(e) => {
            return CheckResponse {
                id: 0,
                portal_id: portal.id,
                request_time,
                status: 0,
                latency_ms: 0,
                error: Some(e.to_string()),
            }
        }
    };

    let mut request = match body {
        RequestBody::None => client.get(&portal.url),
        RequestBody::Json(payload) => client
            .post(&portal.url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload),
        RequestBody::Xml(payload) => client
            .post(&portal.url)
            .header(CONTENT_TYPE, "application/xml")
            .body(payload),
    };

    if let (Some(user), Some(password)) = (&portal.auth_username, &portal.auth_password) {
        request = request.basic_auth(user, Some(password));
    }

    let started = Instant::now();
    match request.send().await {
        Ok(response) => {
            let latency_ms = started.elapsed().as_millis() as i64;
            let status = response.status();
            let error = if status.is_success() {
                None
            } else {
                Some(format!("unexpected status {status}"))
            };
            CheckResponse {
                id: 0,
                portal_id: portal.id,
                request_time,
                status: i64::from(status.as_u16()),
                latency_ms,
                error,
            }
        }
        Err(e) => CheckResponse {
            id: 0,
            portal_id: portal.id,
            request_time,
            status: 0,
            latency_ms: 0,
            error: Some(e.to_string()),
        },
    }
}

/// Decide method and body from the portal's kind and configured method.
/// WebApp portals and GET services probe with a plain GET; POST services
/// carry their parameters, validated per protocol.
fn build_body(portal: &Portal) -> Result<RequestBody, PayloadError> {
    if portal.kind == PortalKind::WebApp || portal.method == RequestMethod::Get {
        return Ok(RequestBody::None);
    }

    let parameters = portal.parameters.as_deref().unwrap_or_default();
    match portal.kind {
        PortalKind::ServiceSoap => Ok(RequestBody::Xml(normalize_xml(parameters)?)),
        _ => {
            validate_json(parameters)?;
            Ok(RequestBody::Json(parameters.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::Router;
    use std::sync::{Arc, Mutex};

    fn client() -> reqwest::Client {
        build_client(Duration::from_secs(5)).unwrap()
    }

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn webapp_portal(url: String) -> Portal {
        Portal {
            url,
            email: "ops@example.com".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn webapp_2xx_is_success() {
        let base = spawn_server(Router::new().route("/", get(|| async { "ok" }))).await;
        let response = run_check(&client(), &webapp_portal(base)).await;
        assert_eq!(response.status, 200);
        assert!(response.error.is_none());
        assert!(response.latency_ms >= 0);
    }

    #[tokio::test]
    async fn webapp_503_is_failure_with_error_text() {
        let base = spawn_server(Router::new().route(
            "/",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;
        let response = run_check(&client(), &webapp_portal(base)).await;
        assert_eq!(response.status, 503);
        let error = response.error.unwrap();
        assert!(error.contains("503"), "got: {error}");
    }

    #[tokio::test]
    async fn rest_post_sends_parameters_verbatim() {
        let seen: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let seen_handler = seen.clone();
        let router = Router::new()
            .route(
                "/",
                post(|State(seen): State<Arc<Mutex<Option<String>>>>, body: String| async move {
                    *seen.lock().unwrap() = Some(body);
                    StatusCode::CREATED
                }),
            )
            .with_state(seen_handler);
        let base = spawn_server(router).await;

        let portal = Portal {
            kind: PortalKind::ServiceRest,
            method: RequestMethod::Post,
            parameters: Some(r#"{"echo":1}"#.to_string()),
            ..webapp_portal(base)
        };
        let response = run_check(&client(), &portal).await;
        assert_eq!(response.status, 201);
        assert!(response.error.is_none());
        assert_eq!(seen.lock().unwrap().as_deref(), Some(r#"{"echo":1}"#));
    }

    #[tokio::test]
    async fn rest_post_with_truncated_json_never_hits_the_wire() {
        // Unroutable URL: a transport attempt would fail differently.
        let portal = Portal {
            kind: PortalKind::ServiceRest,
            method: RequestMethod::Post,
            parameters: Some("{".to_string()),
            ..webapp_portal("http://127.0.0.1:9".to_string())
        };
        let response = run_check(&client(), &portal).await;
        assert_eq!(response.status, 0);
        assert_eq!(response.latency_ms, 0);
        assert!(response.error.unwrap().contains("JSON parse error"));
    }

    #[tokio::test]
    async fn soap_post_with_bad_xml_never_hits_the_wire() {
        let portal = Portal {
            kind: PortalKind::ServiceSoap,
            method: RequestMethod::Post,
            parameters: Some("<Envelope>".to_string()),
            ..webapp_portal("http://127.0.0.1:9".to_string())
        };
        let response = run_check(&client(), &portal).await;
        assert_eq!(response.status, 0);
        assert!(response.error.unwrap().contains("XML parse error"));
    }

    #[tokio::test]
    async fn soap_post_sends_normalized_xml() {
        let seen: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let seen_handler = seen.clone();
        let router = Router::new()
            .route(
                "/",
                post(|State(seen): State<Arc<Mutex<Option<String>>>>, body: String| async move {
                    *seen.lock().unwrap() = Some(body);
                    StatusCode::OK
                }),
            )
            .with_state(seen_handler);
        let base = spawn_server(router).await;

        let portal = Portal {
            kind: PortalKind::ServiceSoap,
            method: RequestMethod::Post,
            parameters: Some("<Envelope><Body/></Envelope>".to_string()),
            ..webapp_portal(base)
        };
        let response = run_check(&client(), &portal).await;
        assert_eq!(response.status, 200);
        let body = seen.lock().unwrap().clone().unwrap();
        assert!(body.contains("<Envelope>"));
    }

    #[tokio::test]
    async fn connection_refused_is_status_zero() {
        // Grab a free port, then close the listener so nothing answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let response = run_check(&client(), &webapp_portal(format!("http://{addr}"))).await;
        assert_eq!(response.status, 0);
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn basic_auth_header_is_attached() {
        let router = Router::new().route(
            "/",
            get(|headers: axum::http::HeaderMap| async move {
                if headers.contains_key(axum::http::header::AUTHORIZATION) {
                    StatusCode::OK
                } else {
                    StatusCode::UNAUTHORIZED
                }
            }),
        );
        let base = spawn_server(router).await;

        let mut portal = webapp_portal(base);
        portal.auth_username = Some("monitor".to_string());
        portal.auth_password = Some("secret".to_string());
        let response = run_check(&client(), &portal).await;
        assert_eq!(response.status, 200);
    }
}
