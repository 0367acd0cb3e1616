use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use vigil_core::{ActionId, ActionRecord, AlertEvent, AlertId, InvestigationReport};
use vigil_store::repository::effective_limit;
use vigil_store::{Page, Repository, StoreError, StoreStats};

use crate::schema::SCHEMA;

/// PostgreSQL-backed repository.
#[derive(Debug)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Connect and bootstrap the schema. Fails loudly when the database is
    /// unreachable; the pipeline must not start without persistence.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| StoreError::Unavailable(format!("schema bootstrap: {e}")))?;
        }

        info!("postgres repository ready");
        Ok(Self { pool })
    }

    fn encode<T: serde::Serialize>(record: &T) -> Result<serde_json::Value, StoreError> {
        serde_json::to_value(record).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, StoreError> {
        serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn list_table<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Page<T>, StoreError> {
        let limit = effective_limit(limit);
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let rows = sqlx::query(&format!(
            "SELECT record FROM {table} ORDER BY ts DESC LIMIT $1 OFFSET $2"
        ))
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let record: serde_json::Value = row
                .try_get("record")
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            items.push(Self::decode(record)?);
        }

        Ok(Page {
            total: u64::try_from(total).unwrap_or(0),
            limit,
            offset,
            items,
        })
    }

    async fn count_table(&self, table: &str) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn breakdown(&self, table: &str, column: &str) -> Result<Vec<(String, u64)>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {column} AS k, COUNT(*) AS n FROM {table} GROUP BY {column}"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let k: String = row
                    .try_get("k")
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                let n: i64 = row
                    .try_get("n")
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok((k, u64::try_from(n).unwrap_or(0)))
            })
            .collect()
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn save_alert(&self, alert: &AlertEvent) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO alerts (id, ts, severity, record) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(alert.id.as_str())
        .bind(alert.ts)
        .bind(alert.severity.as_str())
        .bind(Self::encode(alert)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_investigation(&self, report: &InvestigationReport) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO investigations (alert_id, ts, verdict, record) VALUES ($1, $2, $3, $4)
             ON CONFLICT (alert_id) DO NOTHING",
        )
        .bind(report.alert_id.as_str())
        .bind(report.ts)
        .bind(report.verdict.as_str())
        .bind(Self::encode(report)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_action(&self, record: &ActionRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO actions (id, alert_id, ts, action_type, record) VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(record.action_id.as_str())
        .bind(record.alert_id.as_str())
        .bind(record.ts)
        .bind(record.action_type.as_str())
        .bind(Self::encode(record)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_alert(&self, id: &AlertId) -> Result<Option<AlertEvent>, StoreError> {
        let row = sqlx::query("SELECT record FROM alerts WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.map(|r| {
            let record: serde_json::Value = r
                .try_get("record")
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Self::decode(record)
        })
        .transpose()
    }

    async fn get_investigation(
        &self,
        alert_id: &AlertId,
    ) -> Result<Option<InvestigationReport>, StoreError> {
        let row = sqlx::query("SELECT record FROM investigations WHERE alert_id = $1")
            .bind(alert_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.map(|r| {
            let record: serde_json::Value = r
                .try_get("record")
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Self::decode(record)
        })
        .transpose()
    }

    async fn get_action(&self, id: &ActionId) -> Result<Option<ActionRecord>, StoreError> {
        let row = sqlx::query("SELECT record FROM actions WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.map(|r| {
            let record: serde_json::Value = r
                .try_get("record")
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Self::decode(record)
        })
        .transpose()
    }

    async fn actions_for_alert(
        &self,
        alert_id: &AlertId,
    ) -> Result<Vec<ActionRecord>, StoreError> {
        let rows = sqlx::query("SELECT record FROM actions WHERE alert_id = $1 ORDER BY ts ASC")
            .bind(alert_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.into_iter()
            .map(|r| {
                let record: serde_json::Value = r
                    .try_get("record")
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                Self::decode(record)
            })
            .collect()
    }

    async fn list_alerts(&self, limit: u32, offset: u32) -> Result<Page<AlertEvent>, StoreError> {
        self.list_table("alerts", limit, offset).await
    }

    async fn list_investigations(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Page<InvestigationReport>, StoreError> {
        self.list_table("investigations", limit, offset).await
    }

    async fn list_actions(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Page<ActionRecord>, StoreError> {
        self.list_table("actions", limit, offset).await
    }

    async fn count_alerts(&self) -> Result<u64, StoreError> {
        self.count_table("alerts").await
    }

    async fn count_investigations(&self) -> Result<u64, StoreError> {
        self.count_table("investigations").await
    }

    async fn count_actions(&self) -> Result<u64, StoreError> {
        self.count_table("actions").await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats {
            alerts: self.count_table("alerts").await?,
            investigations: self.count_table("investigations").await?,
            actions: self.count_table("actions").await?,
            ..StoreStats::default()
        };
        for (k, n) in self.breakdown("alerts", "severity").await? {
            stats.alert_severities.insert(k, n);
        }
        for (k, n) in self.breakdown("actions", "action_type").await? {
            stats.action_types.insert(k, n);
        }
        for (k, n) in self.breakdown("investigations", "verdict").await? {
            stats.verdicts.insert(k, n);
        }
        Ok(stats)
    }
}
