// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory session store.
//!
//! Used by tests. Failure switches simulate a store that rejects writes or a
//! pool with no free connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{InstanceRecord, MessageLogEntry, SessionStore, StatusUpdate, StoreError, StoreResult};
use crate::instance::InstanceStatus;

/// In-memory session store.
#[derive(Default)]
pub struct MemoryStore {
    instances: Mutex<HashMap<i64, InstanceRecord>>,
    logs: Mutex<Vec<MessageLogEntry>>,
    updates: Mutex<Vec<(i64, StatusUpdate)>>,
    fail_writes: AtomicBool,
    exhausted: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision an instance record, as the CMS would.
    pub async fn insert_instance(&self, id: i64, token: &str) -> InstanceRecord {
        let record = InstanceRecord {
            id,
            token: token.to_string(),
            status: InstanceStatus::Disconnected.store_str().to_string(),
            qr_code: None,
            session_id: None,
            qr_issued_at: None,
            connected_at: None,
        };
        self.instances.lock().await.insert(id, record.clone());
        record
    }

    /// Make every write fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every operation fail with [`StoreError::PoolExhausted`].
    pub fn set_exhausted(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::SeqCst);
    }

    /// All message log entries, oldest first.
    pub async fn logs(&self) -> Vec<MessageLogEntry> {
        self.logs.lock().await.clone()
    }

    /// Every status update applied so far, oldest first.
    pub async fn status_updates(&self) -> Vec<(i64, StatusUpdate)> {
        self.updates.lock().await.clone()
    }

    /// Current record of an instance.
    pub async fn instance(&self, id: i64) -> Option<InstanceRecord> {
        self.instances.lock().await.get(&id).cloned()
    }

    fn check_pool(&self) -> StoreResult<()> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Err(StoreError::PoolExhausted);
        }
        Ok(())
    }

    fn check_write(&self) -> StoreResult<()> {
        self.check_pool()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find_instance(&self, id: i64, token: &str) -> StoreResult<Option<InstanceRecord>> {
        self.check_pool()?;
        Ok(self
            .instances
            .lock()
            .await
            .get(&id)
            .filter(|r| r.token == token)
            .cloned())
    }

    async fn find_instance_by_token(&self, token: &str) -> StoreResult<Option<InstanceRecord>> {
        self.check_pool()?;
        Ok(self
            .instances
            .lock()
            .await
            .values()
            .find(|r| r.token == token)
            .cloned())
    }

    async fn get_instance(&self, id: i64) -> StoreResult<Option<InstanceRecord>> {
        self.check_pool()?;
        Ok(self.instances.lock().await.get(&id).cloned())
    }

    async fn update_status(&self, id: i64, update: &StatusUpdate) -> StoreResult<()> {
        self.check_write()?;

        if let Some(record) = self.instances.lock().await.get_mut(&id) {
            record.status = update.status.store_str().to_string();
            update.qr_code.apply_to(&mut record.qr_code);
            update.session_id.apply_to(&mut record.session_id);
            if update.qr_issued_at.is_some() {
                record.qr_issued_at = update.qr_issued_at;
            }
            if update.connected_at.is_some() {
                record.connected_at = update.connected_at;
            }
        }
        self.updates.lock().await.push((id, update.clone()));

        Ok(())
    }

    async fn append_message_log(&self, entry: &MessageLogEntry) -> StoreResult<()> {
        self.check_write()?;
        self.logs.lock().await.push(entry.clone());
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.check_pool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_lookup_by_id_and_token() {
        let store = MemoryStore::new();
        store.insert_instance(1, "tok-1").await;
        store.insert_instance(2, "tok-2").await;

        assert!(store.find_instance(1, "tok-1").await.unwrap().is_some());
        assert!(store.find_instance(1, "tok-2").await.unwrap().is_none());
        assert_eq!(
            store
                .find_instance_by_token("tok-2")
                .await
                .unwrap()
                .map(|r| r.id),
            Some(2)
        );
        assert!(store.get_instance(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_update_applies_field_intents() {
        let store = MemoryStore::new();
        store.insert_instance(1, "tok").await;

        store
            .update_status(1, &StatusUpdate::qr_pending("qr", Utc::now()))
            .await
            .unwrap();
        let record = store.instance(1).await.unwrap();
        assert_eq!(record.status, "qr_code");
        assert_eq!(record.status(), Ok(InstanceStatus::QrPending));
        assert_eq!(record.qr_code.as_deref(), Some("qr"));
        assert!(record.qr_issued_at.is_some());

        store
            .update_status(1, &StatusUpdate::connected("session_1", Utc::now()))
            .await
            .unwrap();
        store
            .update_status(1, &StatusUpdate::disconnected())
            .await
            .unwrap();
        let record = store.instance(1).await.unwrap();
        assert_eq!(record.status, "disconnected");
        assert_eq!(record.qr_code, None);
        assert_eq!(record.session_id.as_deref(), Some("session_1"));
        assert!(record.connected_at.is_some());

        store
            .update_status(1, &StatusUpdate::disconnected().clear_session())
            .await
            .unwrap();
        assert_eq!(store.instance(1).await.unwrap().session_id, None);
        assert_eq!(store.status_updates().await.len(), 4);
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let store = MemoryStore::new();
        store.insert_instance(1, "tok").await;

        store.set_fail_writes(true);
        let err = store
            .update_status(1, &StatusUpdate::auth_failed())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.get_instance(1).await.is_ok());

        store.set_fail_writes(false);
        store.set_exhausted(true);
        let err = store.health_check().await.unwrap_err();
        assert!(matches!(err, StoreError::PoolExhausted));
        assert!(err.is_retryable());
    }
}
