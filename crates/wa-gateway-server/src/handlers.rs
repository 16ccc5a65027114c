// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP route handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, State};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use wa_gateway_core::GatewayError;
use wa_gateway_core::instance::MediaMessage;
use wa_gateway_core::session::SentMessage;

use crate::auth::AuthenticatedInstance;
use crate::error::ApiError;
use crate::server::AppState;

type ApiResult = Result<Json<Value>, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

/// Instance ids arrive as JSON numbers or numeric strings.
fn instance_id(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn path_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid instance id: {}", raw)))
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "WhatsApp gateway is running",
        "server": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "instances_active": state.manager.active_count(),
        "sessions_path": state.manager.config().sessions_root.display().to_string(),
    }))
}

/// Body of `POST /instance/init`.
#[derive(Debug, Deserialize)]
pub struct InitRequest {
    instance_id: Option<Value>,
    token: Option<String>,
}

/// `POST /instance/init`
pub async fn init_instance(
    State(state): State<AppState>,
    payload: Result<Json<InitRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let (Some(id), Some(token)) = (
        instance_id(request.instance_id.as_ref()),
        required(request.token),
    ) else {
        return Err(ApiError::bad_request("instance_id and token are required"));
    };

    info!(instance_id = id, "Initialize requested");

    if state.manager.store().find_instance(id, &token).await?.is_none() {
        return Err(ApiError::gateway(
            GatewayError::UnknownInstance(id),
            "Instance not found in the database",
        ));
    }

    state
        .manager
        .initialize_instance(id, &token)
        .await
        .map_err(|e| ApiError::gateway(e, "Failed to initialize instance"))?;

    let timeout = state.manager.config().qr_timeout;
    let qr_code = state.manager.await_qr_code(id, timeout).await;

    let message = if qr_code.is_some() {
        info!(instance_id = id, "QR code available");
        "QR code generated"
    } else {
        info!(instance_id = id, "Instance initialized, QR code not yet available");
        "Instance initialized, waiting for QR code"
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "qr_code": qr_code,
    })))
}

/// `GET /instance/qr/{id}`
pub async fn get_qr(State(state): State<AppState>, Path(raw_id): Path<String>) -> ApiResult {
    let id = path_id(&raw_id)?;

    let qr_code = match state.manager.current_qr(id) {
        Some(qr_code) => Some(qr_code),
        None => state
            .manager
            .store()
            .get_instance(id)
            .await?
            .and_then(|record| record.qr_code),
    };

    match qr_code {
        Some(qr_code) => Ok(Json(json!({ "success": true, "qr_code": qr_code }))),
        None => Err(ApiError::not_found("QR code not available")),
    }
}

/// `GET /instance/status/{id}`
pub async fn get_status(State(state): State<AppState>, Path(raw_id): Path<String>) -> ApiResult {
    let id = path_id(&raw_id)?;
    let report = state.manager.get_status(id).await;

    if !report.active {
        return Ok(Json(json!({
            "success": true,
            "status": report.status,
            "message": "Instance is not active on this server",
        })));
    }

    Ok(Json(json!({
        "success": true,
        "status": report.status,
        "state": report.state,
        "qr_code": report.qr_code,
    })))
}

/// Body of `POST /instance/disconnect`.
#[derive(Debug, Deserialize)]
pub struct DisconnectRequest {
    instance_id: Option<Value>,
}

/// `POST /instance/disconnect`
pub async fn disconnect_instance(
    State(state): State<AppState>,
    payload: Result<Json<DisconnectRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let id = instance_id(request.instance_id.as_ref())
        .ok_or_else(|| ApiError::bad_request("instance_id is required"))?;

    info!(instance_id = id, "Disconnect requested");

    state
        .manager
        .disconnect_instance(id)
        .await
        .map_err(|e| ApiError::gateway(e, "Instance is not active on this server"))?;

    Ok(Json(json!({
        "success": true,
        "message": "Instance disconnected",
    })))
}

fn sent(message: SentMessage) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "Message sent",
        "message_id": message.id,
    }))
}

/// Body of `POST /message/text`.
#[derive(Debug, Deserialize)]
pub struct TextRequest {
    number: Option<String>,
    message: Option<String>,
}

/// `POST /message/text`
pub async fn send_text(
    State(state): State<AppState>,
    Extension(AuthenticatedInstance(instance)): Extension<AuthenticatedInstance>,
    payload: Result<Json<TextRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let (Some(number), Some(text)) = (required(request.number), required(request.message)) else {
        return Err(ApiError::bad_request("number and message are required"));
    };

    info!(instance_id = instance.id, "Text message requested");

    state
        .manager
        .send_text(instance.id, &number, &text)
        .await
        .map(sent)
        .map_err(ApiError::send)
}

/// Body of `POST /message/image`.
#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    number: Option<String>,
    image_url: Option<String>,
    caption: Option<String>,
}

/// `POST /message/image`
pub async fn send_image(
    State(state): State<AppState>,
    Extension(AuthenticatedInstance(instance)): Extension<AuthenticatedInstance>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let (Some(number), Some(url)) = (required(request.number), required(request.image_url)) else {
        return Err(ApiError::bad_request("number and image_url are required"));
    };

    info!(instance_id = instance.id, "Image message requested");

    let media = MediaMessage::image(url, required(request.caption));
    state
        .manager
        .send_media(instance.id, &number, media)
        .await
        .map(sent)
        .map_err(ApiError::send)
}

/// Body of `POST /message/document`.
#[derive(Debug, Deserialize)]
pub struct DocumentRequest {
    number: Option<String>,
    document_url: Option<String>,
    filename: Option<String>,
}

/// `POST /message/document`
pub async fn send_document(
    State(state): State<AppState>,
    Extension(AuthenticatedInstance(instance)): Extension<AuthenticatedInstance>,
    payload: Result<Json<DocumentRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let (Some(number), Some(url)) = (required(request.number), required(request.document_url))
    else {
        return Err(ApiError::bad_request("number and document_url are required"));
    };

    info!(instance_id = instance.id, "Document message requested");

    let media = MediaMessage::document(url, required(request.filename));
    state
        .manager
        .send_media(instance.id, &number, media)
        .await
        .map(sent)
        .map_err(ApiError::send)
}

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}
