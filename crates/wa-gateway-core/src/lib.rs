// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WhatsApp Gateway Core - Instance Lifecycle Management
//!
//! This crate owns the per-tenant WhatsApp sessions ("instances") of the gateway.
//! It creates, tracks, transitions, and tears down one messaging session per
//! instance, reconciles each session's event stream with the shared relational
//! store, and serializes concurrent API calls against an instance's current phase.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    wa-gateway-server (HTTP API layer)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ commands
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      InstanceManager (This Crate)                        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │  Registry   │  │ Event pumps │  │ QR waiters  │  │  Send path  │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │ initialize / send / destroy     ▲ qr, ready, auth_failure, ...
//!           ▼                                  │
//! ┌───────────────────────────────┐            │
//! │  MessagingSession (per id)    │────────────┘
//! │  bridge process / mock        │
//! └───────────────────────────────┘
//!           │
//!           ▼ status mirror, message log
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                    SessionStore (MySQL, shared with CMS)               │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Instance Status State Machine
//!
//! ```text
//!                 ┌──────────────┐
//!                 │ DISCONNECTED │◄──────────────────────────┐
//!                 └──────┬───────┘                           │
//!                        │ initialize                        │
//!                        ▼                                   │
//!                 ┌──────────────┐   ready                   │
//!                 │ INITIALIZING │──────────────┐            │
//!                 └──────┬───────┘              │            │ disconnected
//!                        │ qr                   │            │ (event or request)
//!                        ▼                      ▼            │
//!                 ┌──────────────┐  ready  ┌───────────┐     │
//!         qr ┌───►│  QR_PENDING  │────────►│ CONNECTED │─────┤
//!            └────┴──────┬───────┘         └─────┬─────┘     │
//!                        │ auth_failure          │           │
//!                        ▼                       │           │
//!                 ┌──────────────┐  auth_failure │           │
//!                 │ AUTH_FAILED  │◄──────────────┘           │
//!                 └──────────────┘                           │
//! ```
//!
//! The registry is the runtime source of truth; the store is a best-effort,
//! eventually-consistent mirror of it.
//!
//! # Modules
//!
//! - [`error`]: Error taxonomy for lifecycle operations
//! - [`instance`]: Instance status, state machine, and message types
//! - [`manager`]: The instance lifecycle manager
//! - [`session`]: Messaging session contract and backends
//! - [`store`]: Session store contract and backends

#![deny(missing_docs)]

/// Error types for lifecycle operations.
pub mod error;

/// Instance status, per-instance state machine, and outbound message types.
pub mod instance;

/// The instance lifecycle manager.
pub mod manager;

/// Rendering of QR payloads to PNG data URLs.
pub mod qr;

/// Messaging session contract and backends (bridge process, mock).
pub mod session;

/// Session store contract and backends (MySQL, in-memory).
pub mod store;

pub use error::GatewayError;
pub use instance::{InstanceState, InstanceStatus};
pub use manager::{InstanceHandle, InstanceManager, ManagerConfig, StatusReport};
