// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session store interfaces and backends.
//!
//! The store is the relational mirror shared with the CMS: one row per
//! instance (credentials plus mirrored status) and an append-only message log.
//! While an instance is active the manager's registry is authoritative; the
//! store only ever receives best-effort copies of its transitions.

pub mod memory;
pub mod mysql;

pub use self::memory::MemoryStore;
pub use self::mysql::MySqlStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::instance::{InstanceStatus, MessageKind, UnknownStatus};
use crate::session::{OutboundMessage, SentMessage};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// No pooled connection became available in time.
    #[error("Database connection pool exhausted")]
    PoolExhausted,

    /// The store cannot serve requests right now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Table prefix contains characters outside `[A-Za-z0-9_]`.
    #[error("Invalid table prefix: {0:?}")]
    InvalidTablePrefix(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut => StoreError::PoolExhausted,
            other => StoreError::Database(other),
        }
    }
}

impl StoreError {
    /// Whether the caller may retry the operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::PoolExhausted | StoreError::Unavailable(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Instance row from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct InstanceRecord {
    /// Instance id.
    pub id: i64,
    /// Bearer token of the instance.
    pub token: String,
    /// Mirrored status string (`qr_code` for a pending QR).
    pub status: String,
    /// Last mirrored QR payload.
    pub qr_code: Option<String>,
    /// Session identifier, set once connected.
    pub session_id: Option<String>,
    /// When the last QR was issued.
    pub qr_issued_at: Option<DateTime<Utc>>,
    /// When the instance last connected.
    pub connected_at: Option<DateTime<Utc>>,
}

impl InstanceRecord {
    /// Parse the mirrored status.
    pub fn status(&self) -> Result<InstanceStatus, UnknownStatus> {
        self.status.parse()
    }
}

/// Intent for a nullable column in a [`StatusUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldUpdate<T> {
    /// Leave the column as it is.
    #[default]
    Keep,
    /// Set the column to NULL.
    Clear,
    /// Set the column to a value.
    Set(T),
}

impl<T> FieldUpdate<T> {
    /// Apply the intent to a current value.
    pub fn apply_to(&self, current: &mut Option<T>)
    where
        T: Clone,
    {
        match self {
            FieldUpdate::Keep => {}
            FieldUpdate::Clear => *current = None,
            FieldUpdate::Set(value) => *current = Some(value.clone()),
        }
    }
}

/// A status transition mirrored to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// New status.
    pub status: InstanceStatus,
    /// QR column intent.
    pub qr_code: FieldUpdate<String>,
    /// Session id column intent.
    pub session_id: FieldUpdate<String>,
    /// QR-issued timestamp, written when present.
    pub qr_issued_at: Option<DateTime<Utc>>,
    /// Connection timestamp, written when present.
    pub connected_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    fn status_only(status: InstanceStatus) -> Self {
        Self {
            status,
            qr_code: FieldUpdate::Keep,
            session_id: FieldUpdate::Keep,
            qr_issued_at: None,
            connected_at: None,
        }
    }

    /// A new QR is waiting to be scanned.
    pub fn qr_pending(qr_code: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        Self {
            qr_code: FieldUpdate::Set(qr_code.into()),
            qr_issued_at: Some(issued_at),
            ..Self::status_only(InstanceStatus::QrPending)
        }
    }

    /// The session is ready.
    pub fn connected(session_id: impl Into<String>, connected_at: DateTime<Utc>) -> Self {
        Self {
            qr_code: FieldUpdate::Clear,
            session_id: FieldUpdate::Set(session_id.into()),
            connected_at: Some(connected_at),
            ..Self::status_only(InstanceStatus::Connected)
        }
    }

    /// Authentication was rejected.
    pub fn auth_failed() -> Self {
        Self {
            qr_code: FieldUpdate::Clear,
            ..Self::status_only(InstanceStatus::AuthFailed)
        }
    }

    /// The session went away; its session id is kept for a later restore.
    pub fn disconnected() -> Self {
        Self {
            qr_code: FieldUpdate::Clear,
            ..Self::status_only(InstanceStatus::Disconnected)
        }
    }

    /// Also clear the session id.
    pub fn clear_session(mut self) -> Self {
        self.session_id = FieldUpdate::Clear;
        self
    }
}

/// Outcome of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Delivered to the session.
    Success,
    /// Rejected or failed.
    Error,
}

impl MessageOutcome {
    /// Store string for this outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Append-only audit record of one send attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageLogEntry {
    /// Instance the attempt was made through.
    pub instance_id: i64,
    /// Destination as given by the caller.
    pub address: String,
    /// Message kind.
    pub kind: MessageKind,
    /// Content descriptor.
    pub content: String,
    /// Outcome.
    pub outcome: MessageOutcome,
    /// Provider acknowledgement or error detail.
    pub response: Option<serde_json::Value>,
    /// When the attempt finished.
    pub created_at: DateTime<Utc>,
}

impl MessageLogEntry {
    /// Record a delivered message.
    pub fn success(
        instance_id: i64,
        address: &str,
        message: &OutboundMessage,
        sent: &SentMessage,
    ) -> Self {
        Self::new(
            instance_id,
            address,
            message,
            MessageOutcome::Success,
            serde_json::json!({ "id": sent.id, "timestamp": sent.timestamp }),
        )
    }

    /// Record a failed attempt.
    pub fn failure(
        instance_id: i64,
        address: &str,
        message: &OutboundMessage,
        error: impl std::fmt::Display,
    ) -> Self {
        Self::new(
            instance_id,
            address,
            message,
            MessageOutcome::Error,
            serde_json::json!({ "error": error.to_string() }),
        )
    }

    fn new(
        instance_id: i64,
        address: &str,
        message: &OutboundMessage,
        outcome: MessageOutcome,
        response: serde_json::Value,
    ) -> Self {
        Self {
            instance_id,
            address: address.to_string(),
            kind: message.kind(),
            content: message.descriptor(),
            outcome,
            response: Some(response),
            created_at: Utc::now(),
        }
    }
}

/// Persistence contract consumed by the manager and the API layer.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Find an instance by id and token.
    async fn find_instance(&self, id: i64, token: &str) -> StoreResult<Option<InstanceRecord>>;

    /// Find the instance owning a bearer token.
    async fn find_instance_by_token(&self, token: &str) -> StoreResult<Option<InstanceRecord>>;

    /// Get an instance by id.
    async fn get_instance(&self, id: i64) -> StoreResult<Option<InstanceRecord>>;

    /// Mirror a status transition.
    async fn update_status(&self, id: i64, update: &StatusUpdate) -> StoreResult<()>;

    /// Append a message log entry.
    async fn append_message_log(&self, entry: &MessageLogEntry) -> StoreResult<()>;

    /// Check that the store is reachable.
    async fn health_check(&self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::MediaMessage;

    #[test]
    fn test_pool_timeout_is_retryable() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::PoolExhausted));
        assert!(err.is_retryable());

        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_status_update_constructors() {
        let now = Utc::now();

        let update = StatusUpdate::qr_pending("qr", now);
        assert_eq!(update.status, InstanceStatus::QrPending);
        assert_eq!(update.qr_code, FieldUpdate::Set("qr".into()));
        assert_eq!(update.qr_issued_at, Some(now));

        let update = StatusUpdate::connected("session_4", now);
        assert_eq!(update.qr_code, FieldUpdate::Clear);
        assert_eq!(update.session_id, FieldUpdate::Set("session_4".into()));

        let update = StatusUpdate::disconnected();
        assert_eq!(update.session_id, FieldUpdate::Keep);
        assert_eq!(update.clear_session().session_id, FieldUpdate::Clear);
    }

    #[test]
    fn test_log_entries_carry_descriptor_and_response() {
        let message = OutboundMessage::Media(MediaMessage::image("https://x/a.png", None));
        let sent = SentMessage {
            id: "true_1@c.us_X".into(),
            timestamp: Some(10),
        };

        let entry = MessageLogEntry::success(3, "551199", &message, &sent);
        assert_eq!(entry.kind, MessageKind::Image);
        assert_eq!(entry.content, "Image: https://x/a.png | Caption: N/A");
        assert_eq!(
            entry.response,
            Some(serde_json::json!({"id": "true_1@c.us_X", "timestamp": 10}))
        );

        let entry = MessageLogEntry::failure(3, "551199", &message, "boom");
        assert_eq!(entry.outcome, MessageOutcome::Error);
        assert_eq!(entry.response, Some(serde_json::json!({"error": "boom"})));
    }
}
