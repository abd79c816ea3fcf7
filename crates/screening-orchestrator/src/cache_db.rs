use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

use screener_core::ScreenerError;

use crate::cache::{CacheEntry, ResultCache};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS screening_cache (
    security_id TEXT NOT NULL,
    market_id TEXT NOT NULL,
    result_json TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    PRIMARY KEY (security_id, market_id)
)";

fn db_err(e: impl std::fmt::Display) -> ScreenerError {
    ScreenerError::DatabaseError(e.to_string())
}

/// SQLite persistence for [`ResultCache`] entries, so freshness survives restarts
#[derive(Clone)]
pub struct CacheDb {
    pool: SqlitePool,
}

impl CacheDb {
    pub async fn new(database_url: &str) -> Result<Self, ScreenerError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err)?
            .create_if_missing(true);

        // Each connection to an in-memory database is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        sqlx::query(SCHEMA).execute(&pool).await.map_err(db_err)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upsert entries; returns the number written.
    pub async fn save_entries(&self, entries: &[CacheEntry]) -> Result<usize, ScreenerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for entry in entries {
            let json = serde_json::to_string(&entry.result)
                .map_err(|e| ScreenerError::CacheError(e.to_string()))?;
            sqlx::query(
                "INSERT INTO screening_cache (security_id, market_id, result_json, fetched_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(security_id, market_id)
                 DO UPDATE SET result_json = excluded.result_json,
                               fetched_at = excluded.fetched_at",
            )
            .bind(&entry.security_id)
            .bind(&entry.market_id)
            .bind(json)
            .bind(entry.fetched_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(entries.len())
    }

    pub async fn save_market(
        &self,
        cache: &ResultCache,
        market_id: &str,
    ) -> Result<usize, ScreenerError> {
        let saved = self.save_entries(&cache.entries_for_market(market_id)).await?;
        tracing::info!("Persisted {} cached results for market {}", saved, market_id);
        Ok(saved)
    }

    pub async fn save_all(&self, cache: &ResultCache) -> Result<usize, ScreenerError> {
        self.save_entries(&cache.all_entries()).await
    }

    /// Load every persisted entry into `cache`, keeping original timestamps.
    /// Rows that no longer decode are skipped with a warning.
    pub async fn load_into(&self, cache: &ResultCache) -> Result<usize, ScreenerError> {
        let rows = sqlx::query(
            "SELECT security_id, market_id, result_json, fetched_at FROM screening_cache",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut loaded = 0;
        for row in rows {
            let security_id: String = row.try_get("security_id").map_err(db_err)?;
            let market_id: String = row.try_get("market_id").map_err(db_err)?;
            let json: String = row.try_get("result_json").map_err(db_err)?;
            let fetched_at: String = row.try_get("fetched_at").map_err(db_err)?;

            let fetched_at = match DateTime::parse_from_rfc3339(&fetched_at) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(e) => {
                    tracing::warn!(
                        "Skipping cached {}/{}: bad timestamp: {}",
                        market_id,
                        security_id,
                        e
                    );
                    continue;
                }
            };
            let result = match serde_json::from_str(&json) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!("Skipping cached {}/{}: {}", market_id, security_id, e);
                    continue;
                }
            };

            cache.restore(CacheEntry {
                security_id,
                market_id,
                result,
                fetched_at,
            });
            loaded += 1;
        }

        tracing::info!("Loaded {} cached results from database", loaded);
        Ok(loaded)
    }

    pub async fn delete_market(&self, market_id: &str) -> Result<u64, ScreenerError> {
        let result = sqlx::query("DELETE FROM screening_cache WHERE market_id = ?")
            .bind(market_id.trim().to_uppercase())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
