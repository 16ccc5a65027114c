// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bearer-token authentication for the message routes.
//!
//! The token identifies the instance: a request carrying a valid token acts
//! on behalf of the instance that owns it.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use wa_gateway_core::store::InstanceRecord;

use crate::error::ApiError;
use crate::server::AppState;

/// The instance resolved from the request's bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedInstance(pub InstanceRecord);

/// Extract the token from an `Authorization` header.
///
/// Accepts `Bearer <token>` as well as a bare token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = match value.strip_prefix("Bearer") {
        Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest.trim(),
        _ => value,
    };
    (!token.is_empty()).then_some(token)
}

/// Middleware resolving the bearer token to its instance record.
pub async fn require_token(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Token not provided"))?
        .to_string();

    let instance = state
        .manager
        .store()
        .find_instance_by_token(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid token"))?;

    request
        .extensions_mut()
        .insert(AuthenticatedInstance(instance));

    Ok(next.run(request).await)
}
