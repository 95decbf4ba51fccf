//! Request routing and handlers for the admin API

use crate::error::{AdminError, Result};
use bytes::Bytes;
use hyper::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use warden_proxy::filter::rules::parse_hhmm;
use warden_proxy::filter::{ParentalControlEngine, PolicyEngine};
use warden_proxy::store::{DeviceUpdate, PolicyUpdate, Schedule, ScheduleAction};
use warden_proxy::{DeviceRegistry, DeviceResolver, LogSink, PolicyStore, ProxyServer};

const DEFAULT_LOG_LIMIT: usize = 100;

/// Handles shared with the rest of the gateway
#[derive(Clone)]
pub struct AdminState {
    pub resolver: Arc<DeviceResolver>,
    pub devices: Arc<dyn DeviceRegistry>,
    pub policies: Arc<dyn PolicyStore>,
    pub logs: Arc<dyn LogSink>,
    pub policy_engine: Arc<PolicyEngine>,
    pub parental_engine: Arc<ParentalControlEngine>,
    pub proxy: Arc<ProxyServer>,
}

/// Status and JSON body of a handled request
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    fn error(err: &AdminError) -> Self {
        Self {
            status: err.status(),
            body: json!({ "error": err.to_string() }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToggleDevice {
    allowed: bool,
}

#[derive(Debug, Deserialize)]
struct DomainRequest {
    mac: String,
    domain: String,
}

#[derive(Debug, Deserialize)]
struct WindowRequest {
    mac: String,
    start: String,
    end: String,
    #[serde(default)]
    action: Option<ScheduleAction>,
}

#[derive(Debug, Deserialize)]
struct ParentalToggle {
    mac: String,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct VpnCidrRequest {
    cidr: String,
}

#[derive(Debug, Deserialize)]
struct SafeSearchRequest {
    enforce: bool,
}

/// Dispatch one request. Never fails: errors become JSON error bodies.
pub async fn route(
    state: &AdminState,
    method: &Method,
    path: &str,
    query: Option<&str>,
    body: Bytes,
) -> ApiResponse {
    match dispatch(state, method, path, query, body).await {
        Ok(value) => ApiResponse::ok(value),
        Err(e) => ApiResponse::error(&e),
    }
}

async fn dispatch(
    state: &AdminState,
    method: &Method,
    path: &str,
    query: Option<&str>,
    body: Bytes,
) -> Result<Value> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method, segments.as_slice()) {
        (&Method::GET, ["devices"]) => list_devices(state).await,
        (&Method::POST, ["devices", "refresh"]) => refresh_devices(state).await,
        (&Method::POST, ["devices", mac, "toggle"]) => {
            toggle_device(state, mac, parse_body(&body)?).await
        }

        (&Method::POST, ["policy", "block"]) => {
            let req: DomainRequest = parse_body(&body)?;
            edit_policy(state, &req.mac, PolicyUpdate::AddBlockDomain(req.domain), true).await
        }
        (&Method::POST, ["policy", "unblock"]) => {
            let req: DomainRequest = parse_body(&body)?;
            edit_policy(state, &req.mac, PolicyUpdate::RemoveBlockDomain(req.domain), false).await
        }
        (&Method::POST, ["policy", "allow"]) => {
            let req: DomainRequest = parse_body(&body)?;
            edit_policy(state, &req.mac, PolicyUpdate::AddAllowDomain(req.domain), true).await
        }
        (&Method::POST, ["policy", "disallow"]) => {
            let req: DomainRequest = parse_body(&body)?;
            edit_policy(state, &req.mac, PolicyUpdate::RemoveAllowDomain(req.domain), false).await
        }

        (&Method::POST, ["parental", "window"]) => set_window(state, parse_body(&body)?).await,
        (&Method::POST, ["parental", "toggle"]) => {
            toggle_parental(state, parse_body(&body)?).await
        }
        (&Method::POST, ["parental", "vpn-cidr"]) => {
            let req: VpnCidrRequest = parse_body(&body)?;
            state.parental_engine.add_vpn_cidr(&req.cidr)?;
            Ok(json!({ "success": true }))
        }
        (&Method::POST, ["parental", "safe-search"]) => {
            let req: SafeSearchRequest = parse_body(&body)?;
            state.parental_engine.set_safe_search(req.enforce);
            Ok(json!({ "success": true }))
        }

        (&Method::GET, ["logs"]) => recent_logs(state, query).await,

        (&Method::POST, ["proxy", "start"]) => {
            let addr = state.proxy.start().await?;
            Ok(json!({ "started": true, "listen": addr.to_string() }))
        }
        (&Method::POST, ["proxy", "stop"]) => {
            state.proxy.stop().await;
            Ok(json!({ "stopped": true }))
        }
        (&Method::GET, ["proxy", "status"]) => {
            Ok(json!({ "running": state.proxy.is_running().await }))
        }

        _ => Err(AdminError::NotFound(format!("{} {}", method, path))),
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    Ok(serde_json::from_slice(body)?)
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AdminError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

async fn list_devices(state: &AdminState) -> Result<Value> {
    let devices = state.devices.list_devices().await?;
    Ok(serde_json::to_value(devices)?)
}

async fn refresh_devices(state: &AdminState) -> Result<Value> {
    let devices = state.resolver.scan_network().await;
    Ok(json!({ "updated": true, "devices": devices }))
}

async fn toggle_device(state: &AdminState, mac: &str, req: ToggleDevice) -> Result<Value> {
    if state.devices.find_by_mac(mac).await?.is_none() {
        return Err(AdminError::NotFound(format!("device {mac}")));
    }
    let update = DeviceUpdate {
        proxy_enabled: Some(req.allowed),
        ..Default::default()
    };
    let device = state.devices.upsert_device(mac, update).await?;
    info!("Device {} filtering {}", device.mac, if req.allowed { "enabled" } else { "disabled" });
    reload_engines(state).await;
    Ok(json!({ "updated": true, "device": device }))
}

async fn edit_policy(
    state: &AdminState,
    mac: &str,
    update: PolicyUpdate,
    upsert: bool,
) -> Result<Value> {
    require("mac", mac)?;
    if !state.policies.update_policy(mac, update, upsert).await? {
        return Err(AdminError::NotFound(format!("policy for {mac}")));
    }
    state.policy_engine.reload().await;
    Ok(json!({ "success": true }))
}

async fn set_window(state: &AdminState, req: WindowRequest) -> Result<Value> {
    require("mac", &req.mac)?;
    for value in [&req.start, &req.end] {
        if parse_hhmm(value).is_none() {
            return Err(AdminError::BadRequest(format!("invalid time (expected HH:MM): {value}")));
        }
    }
    let schedule = Schedule {
        start: Some(req.start),
        end: Some(req.end),
        action: req.action.unwrap_or(ScheduleAction::BlockAllExceptAllowlist),
    };
    state
        .policies
        .update_policy(&req.mac, PolicyUpdate::SetSchedule(Some(schedule)), true)
        .await?;
    reload_engines(state).await;
    Ok(json!({ "success": true }))
}

async fn toggle_parental(state: &AdminState, req: ParentalToggle) -> Result<Value> {
    require("mac", &req.mac)?;
    if !req.enabled {
        state
            .policies
            .update_policy(&req.mac, PolicyUpdate::SetSchedule(None), false)
            .await?;
        reload_engines(state).await;
    }
    Ok(json!({ "success": true }))
}

async fn recent_logs(state: &AdminState, query: Option<&str>) -> Result<Value> {
    let mut mac = None;
    let mut limit = DEFAULT_LOG_LIMIT;
    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "mac" if !value.is_empty() => mac = Some(value.into_owned()),
            "limit" => {
                limit = value
                    .parse()
                    .map_err(|_| AdminError::BadRequest(format!("invalid limit: {value}")))?
            }
            _ => {}
        }
    }
    let logs = state.logs.recent(mac.as_deref(), limit).await?;
    Ok(serde_json::to_value(logs)?)
}

async fn reload_engines(state: &AdminState) {
    state.policy_engine.reload().await;
    state.parental_engine.reload().await;
}
