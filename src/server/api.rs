use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::AppState;
use crate::session::parse_seek_target;
use crate::{CastError, DeviceKind, Result};

#[derive(Debug, Deserialize)]
pub struct DeviceQuery {
    pub kind: Option<DeviceKind>,
    pub q: Option<String>,
}

/// Filtered snapshot of the device registry; never triggers a scan.
pub async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Json<Value> {
    let devices = state.registry.filter(query.kind, query.q.as_deref());
    Json(json!({ "devices": devices }))
}

/// One on-demand discovery pass over all device kinds.
pub async fn trigger_scan(State(state): State<AppState>) -> Result<Json<Value>> {
    let found = state
        .scanner
        .scan(&[DeviceKind::CastReceiver, DeviceKind::RokuReceiver])
        .await?;
    Ok(Json(json!({ "found": found.len() })))
}

#[derive(Debug, Deserialize)]
pub struct BindRequest {
    pub device_id: String,
}

pub async fn bind_device(
    State(state): State<AppState>,
    Json(request): Json<BindRequest>,
) -> Result<Json<Value>> {
    let device = state
        .registry
        .get(&request.device_id)
        .ok_or_else(|| CastError::NotFound(format!("unknown device {}", request.device_id)))?;
    info!("Bind requested for {}", device.name);
    let device = state.manager.bind(device).await?;
    Ok(Json(json!({ "bound": device })))
}

pub async fn unbind_device(State(state): State<AppState>) -> Json<Value> {
    state.manager.unbind().await;
    Json(json!({ "bound": Value::Null }))
}

/// Bound device, its playback snapshot, and the remote page URL the
/// secondary client can be pointed at (QR payload).
pub async fn session_state(State(state): State<AppState>) -> Json<Value> {
    let device = state.manager.current_device().await;
    let playback = state.manager.state().await;
    let remote = state.bridge.remote_url().ok();
    Json(json!({ "device": device, "state": playback, "remote": remote }))
}

#[derive(Debug, Deserialize)]
pub struct CastPathRequest {
    pub path: String,
}

/// Serve a local library file and cast it to the bound device.
pub async fn cast_path(
    State(state): State<AppState>,
    Json(request): Json<CastPathRequest>,
) -> Result<Json<Value>> {
    let url = state
        .bridge
        .cast_local(std::path::Path::new(&request.path))
        .await?;
    Ok(Json(json!({ "success": true, "url": url })))
}

pub async fn play_pause(State(state): State<AppState>) -> Result<Json<Value>> {
    state.manager.play_pause().await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn stop_playback(State(state): State<AppState>) -> Result<Json<Value>> {
    state.manager.stop().await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    /// `+30`, `-10`, `90`, `1:30` or `1:02:03`.
    pub target: String,
}

pub async fn seek(
    State(state): State<AppState>,
    Json(request): Json<SeekRequest>,
) -> Result<Json<Value>> {
    let target = parse_seek_target(&request.target)
        .ok_or_else(|| CastError::Unsupported(format!("bad seek target: {}", request.target)))?;
    state.manager.seek_to(target).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    pub level: u8,
}

pub async fn set_volume(
    State(state): State<AppState>,
    Json(request): Json<VolumeRequest>,
) -> Result<Json<Value>> {
    state.manager.set_volume(request.level).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn toggle_mute(State(state): State<AppState>) -> Result<Json<Value>> {
    state.manager.toggle_mute().await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct RemoteUrlRequest {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Pasted URL from the phone, cast straight through to the bound device.
pub async fn remote_url(
    State(state): State<AppState>,
    Json(request): Json<RemoteUrlRequest>,
) -> Result<Json<Value>> {
    state.bridge.relay_url(&request.url, &request.title).await?;
    Ok(Json(json!({ "success": true })))
}

/// Multipart file upload from the phone. The session check runs in the
/// bridge before any bytes hit disk, and the body is streamed to the upload
/// file chunk by chunk so a movie-sized file never sits in memory.
pub async fn remote_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| CastError::Load(format!("bad multipart body: {e}")))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let mut upload = state.bridge.begin_upload(&filename).await?;
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = upload.write_chunk(&chunk).await {
                        upload.abort().await;
                        return Err(e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    upload.abort().await;
                    return Err(CastError::Load(format!("upload truncated: {e}")));
                }
            }
        }
        info!("Relay upload received: {}", filename);
        let ticket = state.bridge.finish_upload(upload).await?;
        return Ok(Json(json!({
            "success": true,
            "ticket": ticket.token,
            "url": ticket.media_url,
        })));
    }
    Err(CastError::Load("no file field in upload".into()))
}
