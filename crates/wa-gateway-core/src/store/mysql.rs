// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! MySQL-backed session store.
//!
//! Reads and writes the CMS tables `{prefix}whatsapp_instances` and
//! `{prefix}whatsapp_logs`. Every value is parameter-bound; the only
//! interpolated fragment is the table prefix, validated at construction.

use async_trait::async_trait;
use sqlx::MySqlPool;

use super::{
    FieldUpdate, InstanceRecord, MessageLogEntry, SessionStore, StatusUpdate, StoreError,
    StoreResult,
};

/// MySQL session store.
#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
    instances_table: String,
    logs_table: String,
}

impl MySqlStore {
    /// Create a store over `pool` using tables named with `prefix`.
    pub fn new(pool: MySqlPool, prefix: &str) -> StoreResult<Self> {
        if !is_valid_prefix(prefix) {
            return Err(StoreError::InvalidTablePrefix(prefix.to_string()));
        }

        Ok(Self {
            pool,
            instances_table: format!("{}whatsapp_instances", prefix),
            logs_table: format!("{}whatsapp_logs", prefix),
        })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    fn select_instance(&self, filter: &str) -> String {
        format!(
            r#"
            SELECT CAST(id AS SIGNED) AS id, token, status, qr_code, session_id,
                   ultimo_qr AS qr_issued_at, data_conexao AS connected_at
            FROM {}
            WHERE {}
            "#,
            self.instances_table, filter
        )
    }
}

/// Whether `prefix` is safe to splice into a table name.
pub fn is_valid_prefix(prefix: &str) -> bool {
    prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn field_mode<T>(field: &FieldUpdate<T>) -> i8 {
    match field {
        FieldUpdate::Keep => 0,
        FieldUpdate::Clear => 1,
        FieldUpdate::Set(_) => 2,
    }
}

fn field_value<T>(field: &FieldUpdate<T>) -> Option<&T> {
    match field {
        FieldUpdate::Set(value) => Some(value),
        _ => None,
    }
}

#[async_trait]
impl SessionStore for MySqlStore {
    async fn find_instance(&self, id: i64, token: &str) -> StoreResult<Option<InstanceRecord>> {
        let record = sqlx::query_as::<_, InstanceRecord>(&self.select_instance("id = ? AND token = ?"))
            .bind(id)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn find_instance_by_token(&self, token: &str) -> StoreResult<Option<InstanceRecord>> {
        let record = sqlx::query_as::<_, InstanceRecord>(&self.select_instance("token = ?"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn get_instance(&self, id: i64) -> StoreResult<Option<InstanceRecord>> {
        let record = sqlx::query_as::<_, InstanceRecord>(&self.select_instance("id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn update_status(&self, id: i64, update: &StatusUpdate) -> StoreResult<()> {
        let sql = format!(
            r#"
            UPDATE {}
            SET status = ?,
                qr_code = CASE ? WHEN 0 THEN qr_code WHEN 1 THEN NULL ELSE ? END,
                session_id = CASE ? WHEN 0 THEN session_id WHEN 1 THEN NULL ELSE ? END,
                ultimo_qr = COALESCE(?, ultimo_qr),
                data_conexao = COALESCE(?, data_conexao)
            WHERE id = ?
            "#,
            self.instances_table
        );

        sqlx::query(&sql)
            .bind(update.status.store_str())
            .bind(field_mode(&update.qr_code))
            .bind(field_value(&update.qr_code))
            .bind(field_mode(&update.session_id))
            .bind(field_value(&update.session_id))
            .bind(update.qr_issued_at)
            .bind(update.connected_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::debug!(
            instance_id = id,
            status = %update.status,
            "Mirrored instance status"
        );

        Ok(())
    }

    async fn append_message_log(&self, entry: &MessageLogEntry) -> StoreResult<()> {
        let sql = format!(
            r#"
            INSERT INTO {}
                (instance_id, numero, tipo_mensagem, conteudo, status, response, data_envio)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            self.logs_table
        );

        let response = entry.response.as_ref().map(|r| r.to_string());

        sqlx::query(&sql)
            .bind(entry.instance_id)
            .bind(&entry.address)
            .bind(entry.kind.as_str())
            .bind(&entry.content)
            .bind(entry.outcome.as_str())
            .bind(response)
            .bind(entry.created_at)
            .execute(&self.pool)
            .await?;

        tracing::debug!(
            instance_id = entry.instance_id,
            address = %entry.address,
            outcome = entry.outcome.as_str(),
            "Recorded message log entry"
        );

        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_validation() {
        assert!(is_valid_prefix("wp_"));
        assert!(is_valid_prefix(""));
        assert!(is_valid_prefix("site2_wp_"));
        assert!(!is_valid_prefix("wp_; DROP TABLE x"));
        assert!(!is_valid_prefix("wp-"));
        assert!(!is_valid_prefix("`wp`"));
    }

    #[test]
    fn test_field_intents() {
        let keep: FieldUpdate<String> = FieldUpdate::Keep;
        let set = FieldUpdate::Set("x".to_string());
        assert_eq!(field_mode(&keep), 0);
        assert_eq!(field_mode(&FieldUpdate::<String>::Clear), 1);
        assert_eq!(field_mode(&set), 2);
        assert_eq!(field_value(&set).map(String::as_str), Some("x"));
        assert_eq!(field_value(&keep), None);
    }
}
