//! Database access layer with SQLx and PostgreSQL

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info};

use crate::codec;
use crate::error::{AppError, Result};
use crate::models::{Granularity, ReportingQuery, StoredRecord};
use crate::store::ReportingStore;

/// Postgres caps bind parameters at 65535 per statement; six per row.
const UPSERT_CHUNK_ROWS: usize = 5_000;

/// Database connection pool and operations
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(connection_string)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {}", e)))?;

        info!(max_connections = max_connections, "Database connection pool established");
        Ok(Self { pool })
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ReportingStore for Database {
    /// Batch upsert inside one transaction; an error rolls the whole batch back.
    async fn upsert_batch(&self, granularity: Granularity, records: &[StoredRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for chunk in records.chunks(UPSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (username, project_id, pin, pintype, ts, value) ",
                granularity.table_name()
            ));
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(&record.owner)
                    .push_bind(record.device_id)
                    .push_bind(i16::from(record.pin))
                    .push_bind(record.pin_type.as_char().to_string())
                    .push_bind(record.ts)
                    .push_bind(record.value);
            });
            builder.push(
                " ON CONFLICT (username, project_id, pin, pintype, ts) \
                 DO UPDATE SET value = EXCLUDED.value",
            );

            written += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(granularity = %granularity, rows = written, "Reporting batch committed");
        Ok(written)
    }

    async fn delete_older_than(&self, granularity: Granularity, cutoff_millis: i64) -> Result<u64> {
        // Table name can't be parameterized
        let query = format!("DELETE FROM {} WHERE ts < $1", granularity.table_name());
        let result = sqlx::query(&query)
            .bind(cutoff_millis)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn select(&self, query: &ReportingQuery) -> Result<Vec<StoredRecord>> {
        let sql = format!(
            r#"
            SELECT username, project_id, pin, pintype, ts, value
            FROM {}
            WHERE username = $1 AND project_id = $2 AND pin = $3 AND pintype = $4
              AND ts >= $5 AND ts < $6
            ORDER BY ts ASC
            LIMIT $7
            "#,
            query.granularity.table_name()
        );

        let rows = sqlx::query(&sql)
            .bind(&query.owner)
            .bind(query.device_id)
            .bind(i16::from(query.pin))
            .bind(query.pin_type.as_char().to_string())
            .bind(query.from)
            .bind(query.to)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(codec::record_from_row).collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}
