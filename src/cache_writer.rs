// =============================================================================
// Cache Writer — replaces the current-state cache every tick (C5)
// =============================================================================
//
// Not transactional: if the delete succeeds but an insert batch fails, the
// cache is left temporarily partial. Readers must treat the freshness
// marker as a staleness hint only, never as an integrity guarantee
// (spec §4.5).
// =============================================================================

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::types::{CacheEntry, PlayerRecord};

const BATCH_SIZE: usize = 100;

/// Outcome of one `replace` call — used by the controller to decide whether
/// to surface a `cache_write_partial` condition.
#[derive(Debug, Clone, Default)]
pub struct CacheWriteResult {
    pub inserted: usize,
    pub failed_batches: Vec<String>,
}

#[derive(Clone)]
pub struct CacheWriter {
    pool: PgPool,
}

impl CacheWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replace the entire `leaderboard_cache` table with `records`, then
    /// advance the `leaderboard_cache_metadata` freshness marker.
    pub async fn replace(&self, records: &[PlayerRecord]) -> Result<CacheWriteResult> {
        let entries: Vec<CacheEntry> = records.iter().map(CacheEntry::from).collect();

        sqlx::query("DELETE FROM leaderboard_cache")
            .execute(&self.pool)
            .await
            .context("failed to clear leaderboard_cache")?;

        let mut result = CacheWriteResult::default();

        for chunk in entries.chunks(BATCH_SIZE) {
            match self.insert_batch(chunk).await {
                Ok(n) => result.inserted += n,
                Err(e) => {
                    warn!(error = %e, "cache insert batch failed");
                    result.failed_batches.push(e.to_string());
                }
            }
        }

        self.touch_freshness_marker().await?;

        info!(inserted = result.inserted, failed_batches = result.failed_batches.len(), "cache replaced");
        Ok(result)
    }

    async fn insert_batch(&self, entries: &[CacheEntry]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for e in entries {
            sqlx::query(
                r#"
                INSERT INTO leaderboard_cache (
                    id, ign, display_name, discord_name, eb, se, pe, te,
                    num_prestiges, farmer_role, grade, is_guest, active
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(&e.id)
            .bind(&e.ign)
            .bind(&e.display_name)
            .bind(&e.discord_name)
            .bind(e.eb)
            .bind(e.se)
            .bind(e.pe)
            .bind(e.te)
            .bind(e.num_prestiges)
            .bind(&e.farmer_role)
            .bind(&e.grade)
            .bind(e.is_guest)
            .bind(e.active)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(entries.len())
    }

    async fn touch_freshness_marker(&self) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO leaderboard_cache_metadata (id, last_updated)
            VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE SET last_updated = excluded.last_updated
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .context("failed to advance leaderboard_cache_metadata freshness marker")?;
        Ok(())
    }

    /// `fresh = (now - lastUpdated) < CACHE_DURATION_MINUTES` (spec §4.5).
    pub async fn is_fresh(&self, cache_duration_minutes: i64) -> Result<bool> {
        let last_updated: Option<chrono::DateTime<Utc>> =
            sqlx::query_scalar("SELECT last_updated FROM leaderboard_cache_metadata WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .context("failed to read leaderboard_cache_metadata")?;

        Ok(match last_updated {
            Some(t) => (Utc::now() - t).num_seconds() < cache_duration_minutes * 60,
            None => false,
        })
    }

    pub async fn read_all(&self) -> Result<Vec<CacheEntry>> {
        let rows: Vec<CacheEntry> = sqlx::query_as(
            r#"
            SELECT id, ign, display_name, discord_name, eb, se, pe, te,
                   num_prestiges, farmer_role, grade, is_guest, active
            FROM leaderboard_cache
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to read leaderboard_cache")?;
        Ok(rows)
    }

    pub async fn read_one(&self, id: &str) -> Result<Option<CacheEntry>> {
        let row: Option<CacheEntry> = sqlx::query_as(
            r#"
            SELECT id, ign, display_name, discord_name, eb, se, pe, te,
                   num_prestiges, farmer_role, grade, is_guest, active
            FROM leaderboard_cache
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read leaderboard_cache row")?;
        Ok(row)
    }
}
