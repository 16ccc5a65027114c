// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WhatsApp Gateway Server - HTTP API
//!
//! Thin axum layer over [`wa_gateway_core::InstanceManager`]:
//!
//! | Route | Auth | Purpose |
//! |-------|------|---------|
//! | `GET /health` | - | liveness and active instance count |
//! | `POST /instance/init` | id + token in body | start a session, wait for its QR code |
//! | `GET /instance/qr/{id}` | - | pending QR code (memory, then store) |
//! | `GET /instance/status/{id}` | - | in-memory status and live connection state |
//! | `POST /instance/disconnect` | - | tear a session down |
//! | `POST /message/text` | bearer | send text |
//! | `POST /message/image` | bearer | send an image by URL |
//! | `POST /message/document` | bearer | send a document by URL |
//!
//! The bearer token selects the instance a message is sent through.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod server;

pub use config::{Config, ConfigError};
pub use error::ApiError;
pub use server::{AppState, build_router, serve};
