// =============================================================================
// Snapshot Writer — persists one historical snapshot (C6)
// =============================================================================
//
// Invoked only when the decision engine returns `should_save = true`.
// Batched upserts, same shape as the cache writer, but append/merge rather
// than delete-then-insert: a snapshot date is unique, a player's yearly
// progression row is unique per `(id, year)`.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::types::{HistoricalSnapshotRow, PlayerRecord, SnapshotMetadataRow, YearlyGainRow};

const BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct SnapshotWriteResult {
    pub snapshot_date: Option<NaiveDate>,
    pub rows_saved: usize,
    pub rows_failed: usize,
    pub yearly_rows_saved: usize,
    pub yearly_rows_failed: usize,
    pub refresh_views_result: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct SnapshotWriter {
    pool: PgPool,
}

impl SnapshotWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Save `records` under today's UTC calendar date, upserting the
    /// `(snapshot_date, id)` historical rows, the `(id, year)` yearly-gain
    /// rows, and the per-date metadata row, then trigger the materialized
    /// view refresh.
    pub async fn save(&self, records: &[PlayerRecord], now: DateTime<Utc>) -> Result<SnapshotWriteResult> {
        let snapshot_date = now.date_naive();
        let mut result = SnapshotWriteResult {
            snapshot_date: Some(snapshot_date),
            ..Default::default()
        };

        let snapshot_rows: Vec<HistoricalSnapshotRow> = records
            .iter()
            .map(|r| HistoricalSnapshotRow::from_record(r, snapshot_date))
            .collect();

        for chunk in snapshot_rows.chunks(BATCH_SIZE) {
            match self.upsert_snapshot_batch(chunk).await {
                Ok(n) => result.rows_saved += n,
                Err(e) => {
                    warn!(error = %e, "snapshot upsert batch failed");
                    result.rows_failed += chunk.len();
                    result.errors.push(e.to_string());
                }
            }
        }

        let yearly_rows: Vec<YearlyGainRow> = records
            .iter()
            .flat_map(|r| r.egg_day.iter().map(move |g| YearlyGainRow::from_gain(&r.id, g)))
            .collect();

        for chunk in yearly_rows.chunks(BATCH_SIZE) {
            match self.upsert_yearly_batch(chunk).await {
                Ok(n) => result.yearly_rows_saved += n,
                Err(e) => {
                    warn!(error = %e, "yearly gain upsert batch failed");
                    result.yearly_rows_failed += chunk.len();
                    result.errors.push(e.to_string());
                }
            }
        }

        if let Err(e) = self
            .upsert_metadata(&SnapshotMetadataRow {
                snapshot_date,
                record_count: result.rows_saved as i64,
                imported_at: now,
            })
            .await
        {
            warn!(error = %e, "snapshot metadata upsert failed");
            result.errors.push(e.to_string());
        }

        result.refresh_views_result = Some(self.refresh_materialized_views().await);

        info!(
            snapshot_date = %snapshot_date,
            rows_saved = result.rows_saved,
            rows_failed = result.rows_failed,
            "snapshot write complete"
        );
        Ok(result)
    }

    async fn upsert_snapshot_batch(&self, rows: &[HistoricalSnapshotRow]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for r in rows {
            sqlx::query(
                r#"
                INSERT INTO player_snapshots (
                    snapshot_date, id, ign, display_name, discord_name, eb, se, pe, te,
                    num_prestiges, farmer_role, grade, is_guest, active, updated_at,
                    gains_saturday, max_mystical_eggs
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT (snapshot_date, id) DO UPDATE SET
                    ign = excluded.ign,
                    display_name = excluded.display_name,
                    discord_name = excluded.discord_name,
                    eb = excluded.eb,
                    se = excluded.se,
                    pe = excluded.pe,
                    te = excluded.te,
                    num_prestiges = excluded.num_prestiges,
                    farmer_role = excluded.farmer_role,
                    grade = excluded.grade,
                    is_guest = excluded.is_guest,
                    active = excluded.active,
                    updated_at = excluded.updated_at,
                    gains_saturday = excluded.gains_saturday,
                    max_mystical_eggs = excluded.max_mystical_eggs
                "#,
            )
            .bind(r.snapshot_date)
            .bind(&r.id)
            .bind(&r.ign)
            .bind(&r.display_name)
            .bind(&r.discord_name)
            .bind(r.eb)
            .bind(r.se)
            .bind(r.pe)
            .bind(r.te)
            .bind(r.num_prestiges)
            .bind(&r.farmer_role)
            .bind(&r.grade)
            .bind(r.is_guest)
            .bind(r.active)
            .bind(r.updated_at)
            .bind(r.gains_saturday)
            .bind(r.max_mystical_eggs)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    async fn upsert_yearly_batch(&self, rows: &[YearlyGainRow]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for r in rows {
            sqlx::query(
                r#"
                INSERT INTO eggday_gains (
                    id, year, start_se, start_pe, start_eb, start_role, start_prestiges,
                    end_se, end_pe, end_eb, end_role, end_prestiges
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (id, year) DO UPDATE SET
                    end_se = excluded.end_se,
                    end_pe = excluded.end_pe,
                    end_eb = excluded.end_eb,
                    end_role = excluded.end_role,
                    end_prestiges = excluded.end_prestiges
                "#,
            )
            .bind(&r.id)
            .bind(r.year)
            .bind(r.start_se)
            .bind(r.start_pe)
            .bind(r.start_eb)
            .bind(&r.start_role)
            .bind(r.start_prestiges)
            .bind(r.end_se)
            .bind(r.end_pe)
            .bind(r.end_eb)
            .bind(&r.end_role)
            .bind(r.end_prestiges)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    async fn upsert_metadata(&self, row: &SnapshotMetadataRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshot_metadata (snapshot_date, record_count, imported_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (snapshot_date) DO UPDATE SET
                record_count = excluded.record_count,
                imported_at = excluded.imported_at
            "#,
        )
        .bind(row.snapshot_date)
        .bind(row.record_count)
        .bind(row.imported_at)
        .execute(&self.pool)
        .await
        .context("failed to upsert snapshot_metadata")?;
        Ok(())
    }

    /// Invoke the refresh-materialized-views stored procedure. Failure here
    /// never fails the overall save; it is recorded and surfaced instead.
    async fn refresh_materialized_views(&self) -> String {
        match sqlx::query("SELECT refresh_leaderboard_views()")
            .execute(&self.pool)
            .await
        {
            Ok(_) => "ok".to_string(),
            Err(e) => {
                warn!(error = %e, "refresh_leaderboard_views failed");
                format!("failed: {e}")
            }
        }
    }

    pub async fn delete(&self, snapshot_date: NaiveDate) -> Result<u64> {
        let result = sqlx::query("DELETE FROM player_snapshots WHERE snapshot_date = $1")
            .bind(snapshot_date)
            .execute(&self.pool)
            .await
            .context("failed to delete snapshot rows")?;

        sqlx::query("DELETE FROM snapshot_metadata WHERE snapshot_date = $1")
            .bind(snapshot_date)
            .execute(&self.pool)
            .await
            .context("failed to delete snapshot_metadata row")?;

        Ok(result.rows_affected())
    }
}
