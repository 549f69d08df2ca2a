// =============================================================================
// Exclusion Registry — persisted set of known-broken player IDs
// =============================================================================
//
// Mutated only out-of-band by operators (direct SQL, an admin tool). The
// core only ever reads it, expecting a single-digit number of rows.
// =============================================================================

use std::collections::HashSet;

use anyhow::{Context, Result};
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
struct ExcludedPlayerRow {
    id: String,
}

/// Read-only view over the `excluded_players` table.
#[derive(Clone)]
pub struct ExclusionRegistry {
    pool: PgPool,
}

impl ExclusionRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The set of player IDs to subtract from the sync-statistic denominator.
    pub async fn list(&self) -> Result<HashSet<String>> {
        let rows: Vec<ExcludedPlayerRow> = sqlx::query_as("SELECT id FROM excluded_players")
            .fetch_all(&self.pool)
            .await
            .context("failed to load excluded_players")?;

        Ok(rows.into_iter().map(|r| r.id).collect())
    }
}
