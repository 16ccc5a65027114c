// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Messaging session trait definitions.
//!
//! Defines the abstract interface the lifecycle manager consumes from a
//! per-instance WhatsApp session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::instance::{MediaMessage, MessageKind};

/// Errors from session operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The session backend could not be started.
    #[error("Session start failed: {0}")]
    StartFailed(String),

    /// The session is not running (never started, destroyed, or exited).
    #[error("Session closed")]
    Closed,

    /// A request to the session did not complete in time.
    #[error("Session request timed out: {0}")]
    Timeout(String),

    /// The session sent something that does not follow the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The session reported a failure for a request.
    #[error("{0}")]
    Remote(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Lifecycle events emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A QR code awaits scanning: the raw pairing string or a rendered data URL.
    QrIssued(String),
    /// The session is connected and ready to send.
    Ready,
    /// Authentication succeeded.
    Authenticated,
    /// Authentication was rejected.
    AuthFailed(String),
    /// The session lost its connection.
    Disconnected(String),
    /// Start-up progress.
    LoadingProgress {
        /// Percentage reported by the session.
        percent: u8,
        /// Progress message.
        message: String,
    },
    /// Non-fatal error inside the session.
    Error(String),
}

impl SessionEvent {
    /// Event name as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::QrIssued(_) => "qr",
            Self::Ready => "ready",
            Self::Authenticated => "authenticated",
            Self::AuthFailed(_) => "auth_failure",
            Self::Disconnected(_) => "disconnected",
            Self::LoadingProgress { .. } => "loading_progress",
            Self::Error(_) => "error",
        }
    }
}

/// Sending half of an instance's event queue.
///
/// Events pushed here are processed by the manager in emission order.
pub type EventSink = mpsc::UnboundedSender<SessionEvent>;

/// Options for constructing a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Instance ID from the store.
    pub instance_id: i64,
    /// Instance token, verified against the store by the caller.
    pub token: String,
    /// Directory where the session persists its authentication state.
    pub session_dir: PathBuf,
    /// Client id the session uses inside its session directory.
    pub client_id: String,
}

impl SessionOptions {
    /// Options for `instance_id`, with its session directory under `sessions_root`.
    pub fn new(instance_id: i64, token: impl Into<String>, sessions_root: &Path) -> Self {
        Self {
            instance_id,
            token: token.into(),
            session_dir: sessions_root.join(session_name(instance_id)),
            client_id: format!("instance_{}", instance_id),
        }
    }
}

/// Stable session identifier for an instance, mirrored to the store.
pub fn session_name(instance_id: i64) -> String {
    format!("session_{}", instance_id)
}

/// A message to deliver to a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Plain text.
    Text {
        /// Message body.
        body: String,
    },
    /// Media fetched by the session from a URL.
    Media(MediaMessage),
}

impl OutboundMessage {
    /// Kind recorded in the message log.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Media(media) => media.kind.into(),
        }
    }

    /// Content descriptor recorded in the message log.
    pub fn descriptor(&self) -> String {
        match self {
            Self::Text { body } => body.clone(),
            Self::Media(media) => media.descriptor(),
        }
    }
}

/// Provider acknowledgement of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    /// Serialized provider message id.
    pub id: String,
    /// Provider timestamp (seconds since epoch), when reported.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// A live connection to WhatsApp for one instance.
///
/// Sessions do NOT touch the store and never mutate the registry; they only
/// push [`SessionEvent`]s into the sink they were created with.
#[async_trait]
pub trait MessagingSession: Send + Sync {
    /// Instance this session belongs to.
    fn instance_id(&self) -> i64;

    /// Begin the asynchronous connection sequence.
    ///
    /// QR, authentication, and readiness are reported through events, which
    /// may arrive before this returns.
    async fn initialize(&self) -> Result<()>;

    /// Point-in-time connection state (e.g. `CONNECTED`).
    async fn connection_state(&self) -> Result<String>;

    /// Deliver a message to a normalized chat id.
    async fn send_message(&self, chat_id: &str, message: &OutboundMessage) -> Result<SentMessage>;

    /// Gracefully tear the session down, releasing its resources.
    async fn destroy(&self) -> Result<()>;
}

/// Constructs sessions.
///
/// Construction is synchronous and performs no I/O, so the manager can insert
/// the new session into its registry atomically before anything connects.
pub trait SessionFactory: Send + Sync {
    /// Backend identifier (e.g. "bridge", "mock").
    fn backend(&self) -> &'static str;

    /// Construct a session that reports its events to `events`.
    fn create(&self, options: SessionOptions, events: EventSink)
    -> Result<Arc<dyn MessagingSession>>;
}
