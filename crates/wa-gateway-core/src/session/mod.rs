// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session module - messaging session backends.

pub mod bridge;
pub mod mock;
mod traits;

pub use bridge::{BridgeConfig, BridgeSessionFactory};
pub use mock::MockSessionFactory;
pub use traits::*;
