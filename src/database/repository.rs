use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;
use uuid::Uuid;

use crate::models::Monitor;
use crate::monitoring::{MonitorRegistry, ProbeResult, ResultSink};
use crate::pool::{LibsqlManager, LibsqlPool};

/// libsql-backed monitor registry and probe result sink.
pub struct ProbeStore {
    pool: LibsqlPool,
}

impl ProbeStore {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    /// Insert or update a monitor, keyed by its UUID.
    pub async fn save_monitor(&self, monitor: &Monitor) -> Result<()> {
        let conn = self.get_conn().await?;
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO monitors (uuid, name, url, contact, interval_seconds, enabled, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(uuid) DO UPDATE SET
                name = excluded.name,
                url = excluded.url,
                contact = excluded.contact,
                interval_seconds = excluded.interval_seconds,
                enabled = excluded.enabled",
            params![
                monitor.uuid.to_string(),
                monitor.name.clone(),
                monitor.url.clone(),
                monitor.contact.clone(),
                monitor.interval_seconds as i64,
                if monitor.enabled { 1 } else { 0 },
                now
            ],
        )
        .await?;

        Ok(())
    }

    /// Most recent results for one monitor, newest first.
    pub async fn recent_results(&self, monitor_uuid: Uuid, limit: usize) -> Result<Vec<ProbeResult>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT monitor_uuid, timestamp, status_code, response_time_ms, dns_lookup_ms,
                        tcp_handshake_ms, tls_handshake_ms, success, error_message
                 FROM probe_results
                 WHERE monitor_uuid = ?
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?",
                params![monitor_uuid.to_string(), limit as i64],
            )
            .await?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            let uuid_str: String = row.get(0)?;
            let timestamp_ms: i64 = row.get(1)?;
            let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
                .ok_or_else(|| anyhow!("invalid timestamp {timestamp_ms} in probe_results"))?;

            results.push(ProbeResult {
                monitor_id: Uuid::parse_str(&uuid_str)?,
                timestamp,
                status_code: row.get::<i64>(2)? as u16,
                response_time_ms: row.get::<i64>(3)? as u64,
                dns_lookup_ms: row.get::<i64>(4)? as u64,
                tcp_handshake_ms: row.get::<i64>(5)? as u64,
                tls_handshake_ms: row.get::<i64>(6)? as u64,
                success: row.get::<i64>(7)? != 0,
                error_message: row.get::<Option<String>>(8)?,
            });
        }

        Ok(results)
    }
}

#[async_trait]
impl MonitorRegistry for ProbeStore {
    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT uuid, name, url, contact, interval_seconds, enabled
                 FROM monitors WHERE enabled = 1 ORDER BY created_at, id",
                (),
            )
            .await?;

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            let uuid_str: String = row.get(0)?;

            monitors.push(Monitor {
                uuid: Uuid::parse_str(&uuid_str)?,
                name: row.get(1)?,
                url: row.get(2)?,
                contact: row.get(3)?,
                interval_seconds: row.get::<i64>(4)? as u64,
                enabled: row.get::<i64>(5)? != 0,
            });
        }

        Ok(monitors)
    }
}

#[async_trait]
impl ResultSink for ProbeStore {
    async fn record(&self, result: &ProbeResult) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO probe_results (monitor_uuid, timestamp, status_code, response_time_ms,
                dns_lookup_ms, tcp_handshake_ms, tls_handshake_ms, success, error_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                result.monitor_id.to_string(),
                result.timestamp.timestamp_millis(),
                result.status_code as i64,
                result.response_time_ms as i64,
                result.dns_lookup_ms as i64,
                result.tcp_handshake_ms as i64,
                result.tls_handshake_ms as i64,
                if result.success { 1 } else { 0 },
                result.error_message.clone()
            ],
        )
        .await?;

        Ok(())
    }
}
