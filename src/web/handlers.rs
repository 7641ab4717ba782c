//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, Portal, PortalKind, PortalStatus, RequestMethod};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;

pub async fn handle_health() -> &'static str {
    "ok"
}

// ============================================================================
// Portal CRUD
// ============================================================================

/// Request body for creating, updating, or ad-hoc pinging a portal.
#[derive(Debug, Deserialize)]
pub struct PortalRequest {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub kind: PortalKind,
    pub url: String,
    #[serde(default)]
    pub parameters: Option<String>,
    pub method: RequestMethod,
    #[serde(default)]
    pub status: Option<PortalStatus>,
    pub email: String,
    pub check_interval_secs: i64,
    pub response_time_threshold_ms: i64,
    #[serde(default)]
    pub auth_username: Option<String>,
    #[serde(default)]
    pub auth_password: Option<String>,
}

fn validate(req: &PortalRequest) -> Result<(), String> {
    if req.check_interval_secs < 10 {
        return Err("check interval must be at least 10 seconds".to_string());
    }
    if req.response_time_threshold_ms < 10 {
        return Err("response time threshold must be at least 10 ms".to_string());
    }
    if req.auth_username.is_some() != req.auth_password.is_some() {
        return Err("basic auth requires both username and password".to_string());
    }
    if req.kind == PortalKind::WebApp && req.method != RequestMethod::Get {
        return Err("web-app portals are probed with GET".to_string());
    }
    if req.kind != PortalKind::WebApp
        && req.method == RequestMethod::Post
        && req.parameters.as_deref().map_or(true, |p| p.trim().is_empty())
    {
        return Err("POST service portals require parameters".to_string());
    }
    Ok(())
}

fn portal_from_request(req: PortalRequest) -> Portal {
    Portal {
        id: req.id,
        name: req.name,
        kind: req.kind,
        url: req.url,
        parameters: req.parameters,
        method: req.method,
        status: req.status.unwrap_or(PortalStatus::Active),
        email: req.email,
        check_interval_secs: req.check_interval_secs,
        response_time_threshold_ms: req.response_time_threshold_ms,
        auth_username: req.auth_username,
        auth_password: req.auth_password,
        ..Default::default()
    }
}

pub async fn handle_list_portals(State(state): State<AppState>) -> Response {
    match state.monitor.list_active_with_last_response() {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_get_portal(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_portal(id) {
        Ok(portal) => Json(portal).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_create_portal(
    State(state): State<AppState>,
    Json(req): Json<PortalRequest>,
) -> Response {
    if let Err(msg) = validate(&req) {
        return (StatusCode::BAD_REQUEST, msg).into_response();
    }

    let mut portal = portal_from_request(req);
    portal.id = 0;
    match state.store.add_portal(&mut portal) {
        Ok(_) => Json(portal).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_update_portal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<PortalRequest>,
) -> Response {
    if let Err(msg) = validate(&req) {
        return (StatusCode::BAD_REQUEST, msg).into_response();
    }

    let existing = match state.store.get_portal(id) {
        Ok(portal) => portal,
        Err(e) => return db_error(e),
    };

    // A request without an explicit status keeps the stored one.
    let status = req.status.unwrap_or(existing.status);
    let mut portal = portal_from_request(req);
    portal.id = id;
    portal.status = status;

    match state.store.update_portal(&portal) {
        Ok(()) => match state.store.get_portal(id) {
            Ok(portal) => Json(portal).into_response(),
            Err(e) => db_error(e),
        },
        Err(e) => db_error(e),
    }
}

pub async fn handle_delete_portal(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.set_status(id, PortalStatus::Deleted) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_purge_portal(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.purge_portal(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// On-demand checks and history
// ============================================================================

pub async fn handle_ping_portal(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.monitor.ping_by_id(id).await {
        Ok(Some(outcome)) => Json(outcome).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "portal not found or inactive").into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_ping_definition(
    State(state): State<AppState>,
    Json(req): Json<PortalRequest>,
) -> Response {
    if let Err(msg) = validate(&req) {
        return (StatusCode::BAD_REQUEST, msg).into_response();
    }

    let draft = portal_from_request(req);
    match state.monitor.ping_by_definition(&draft).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub async fn handle_list_responses(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    match state.store.list_responses(id, limit) {
        Ok(responses) => Json(responses).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_list_alerts(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.list_notifications(id) {
        Ok(records) => Json(records).into_response(),
        Err(e) => db_error(e),
    }
}

fn db_error(e: DbError) -> Response {
    match e {
        DbError::NotFound => (StatusCode::NOT_FOUND, "not found").into_response(),
        e => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> PortalRequest {
        PortalRequest {
            id: 0,
            name: "Intranet".to_string(),
            kind: PortalKind::WebApp,
            url: "http://intranet.example.com".to_string(),
            parameters: None,
            method: RequestMethod::Get,
            status: None,
            email: "ops@example.com".to_string(),
            check_interval_secs: 20,
            response_time_threshold_ms: 500,
            auth_username: None,
            auth_password: None,
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(validate(&valid_request()).is_ok());
    }

    #[test]
    fn interval_and_threshold_floors() {
        let mut req = valid_request();
        req.check_interval_secs = 9;
        assert!(validate(&req).is_err());

        let mut req = valid_request();
        req.response_time_threshold_ms = 5;
        assert!(validate(&req).is_err());
    }

    #[test]
    fn basic_auth_must_be_paired() {
        let mut req = valid_request();
        req.auth_username = Some("monitor".to_string());
        assert!(validate(&req).is_err());

        req.auth_password = Some("secret".to_string());
        assert!(validate(&req).is_ok());
    }

    #[test]
    fn webapp_portals_are_get_only() {
        let mut req = valid_request();
        req.method = RequestMethod::Post;
        assert!(validate(&req).is_err());
    }

    #[test]
    fn post_services_require_parameters() {
        let mut req = valid_request();
        req.kind = PortalKind::ServiceRest;
        req.method = RequestMethod::Post;
        assert!(validate(&req).is_err());

        req.parameters = Some("  ".to_string());
        assert!(validate(&req).is_err());

        req.parameters = Some(r#"{"ping":true}"#.to_string());
        assert!(validate(&req).is_ok());
    }
}
