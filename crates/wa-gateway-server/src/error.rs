// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! API error responses.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use wa_gateway_core::GatewayError;
use wa_gateway_core::store::StoreError;

/// Seconds a client should wait before retrying a retryable failure.
const RETRY_AFTER_SECS: u64 = 5;

/// An error response: status code plus the JSON body
/// `{"success": false, "message", "error", "code"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    error: Option<String>,
    code: &'static str,
    retry_after: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error: None,
            code,
            retry_after: None,
        }
    }

    /// 400 for missing or malformed input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 401 for a missing or unknown bearer token.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// 404 with a message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Map a lifecycle error, with `message` describing the failed operation.
    pub fn gateway(err: GatewayError, message: impl Into<String>) -> Self {
        let status = match &err {
            GatewayError::UnknownInstance(_) | GatewayError::NotActive(_) => StatusCode::NOT_FOUND,
            GatewayError::InstanceNotConnected { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::SessionInit { .. } | GatewayError::Send { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Store(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self {
            status,
            message: message.into(),
            error: Some(err.to_string()),
            code: err.error_code(),
            retry_after: err.is_retryable().then_some(RETRY_AFTER_SECS),
        }
    }

    /// Map a send failure; an instance without a session is unavailable
    /// rather than missing.
    pub fn send(err: GatewayError) -> Self {
        let not_active = matches!(err, GatewayError::NotActive(_));
        let message = match &err {
            GatewayError::NotActive(_) | GatewayError::InstanceNotConnected { .. } => {
                "Instance is not connected on this server"
            }
            _ => "Failed to send message",
        };

        let mut api_error = Self::gateway(err, message);
        if not_active {
            api_error.status = StatusCode::SERVICE_UNAVAILABLE;
        }
        api_error
    }

    /// Status code of the response.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::gateway(GatewayError::Store(err), "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, code = self.code, error = ?self.error, "{}", self.message);
        }

        let mut body = json!({
            "success": false,
            "message": self.message,
            "code": self.code,
        });
        if let Some(error) = self.error {
            body["error"] = json!(error);
        }

        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wa_gateway_core::InstanceStatus;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::gateway(GatewayError::NotActive(1), "x").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::send(GatewayError::NotActive(1)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::send(GatewayError::InstanceNotConnected {
                instance_id: 1,
                status: InstanceStatus::QrPending
            })
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(StoreError::Unavailable("down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(StoreError::Database(sqlx::Error::RowNotFound)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_retryable_errors_carry_retry_after() {
        let response = ApiError::from(StoreError::PoolExhausted).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from_static("5"))
        );

        let response = ApiError::bad_request("missing").into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
