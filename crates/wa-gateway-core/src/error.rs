// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for lifecycle operations.

use thiserror::Error;

use crate::instance::InstanceStatus;
use crate::session::SessionError;
use crate::store::StoreError;

/// Errors surfaced by [`InstanceManager`](crate::InstanceManager) operations.
///
/// Event reconciliation never produces these; it only logs.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The id (and token) do not match any store record.
    #[error("Instance {0} not found")]
    UnknownInstance(i64),

    /// No live session is registered for the instance.
    #[error("Instance {0} is not active on this server")]
    NotActive(i64),

    /// A session exists but cannot send yet.
    #[error("Instance {instance_id} is not connected (status: {status})")]
    InstanceNotConnected {
        /// Instance id.
        instance_id: i64,
        /// Status at the time of the request.
        status: InstanceStatus,
    },

    /// The session failed to start.
    #[error("Failed to initialize instance {instance_id}: {source}")]
    SessionInit {
        /// Instance id.
        instance_id: i64,
        /// Underlying session error.
        #[source]
        source: SessionError,
    },

    /// The session failed to deliver a message.
    #[error("Failed to send message via instance {instance_id}: {source}")]
    Send {
        /// Instance id.
        instance_id: i64,
        /// Underlying session error.
        #[source]
        source: SessionError,
    },

    /// A store read failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GatewayError {
    /// Stable error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownInstance(_) => "UNKNOWN_INSTANCE",
            Self::NotActive(_) => "NOT_ACTIVE",
            Self::InstanceNotConnected { .. } => "INSTANCE_NOT_CONNECTED",
            Self::SessionInit { .. } => "SESSION_INIT_FAILED",
            Self::Send { .. } => "SEND_FAILED",
            Self::Store(StoreError::PoolExhausted) => "STORE_POOL_EXHAUSTED",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Whether the caller may retry the operation later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
