// =============================================================================
// Controller State Store — single-row persisted state machine (C4)
// =============================================================================
//
// Backed by the `snapshot_save_metadata` table, a single row keyed on
// `id = 1`. No concurrent writers are expected; if two controllers run
// simultaneously, last-write-wins is acceptable — the worst outcome is a
// re-evaluation on the next tick (spec §5).
//
// Expected schema (not a migration — migration execution is out of scope):
//   id smallint primary key default 1,
//   last_saved_at timestamptz,
//   last_decision_at timestamptz,
//   last_decision_result jsonb,
//   last_email_sent_at timestamptz,
//   last_email_type text,
//   pending jsonb,
//   pending_first_attempt timestamptz,
//   pending_attempt_count bigint not null default 0,
//   pending_meta jsonb,
//   updated_at timestamptz not null
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::types::{ControllerState, Decision, EmailKind, PendingParcel};

#[derive(sqlx::FromRow)]
struct ControllerStateRow {
    last_saved_at: Option<DateTime<Utc>>,
    last_decision_at: Option<DateTime<Utc>>,
    last_decision_result: Option<Json<Decision>>,
    last_email_sent_at: Option<DateTime<Utc>>,
    last_email_type: Option<String>,
    pending: Option<Json<PendingParcel>>,
    pending_first_attempt: Option<DateTime<Utc>>,
    pending_attempt_count: i64,
    pending_meta: Option<Json<Value>>,
    updated_at: DateTime<Utc>,
}

impl From<ControllerStateRow> for ControllerState {
    fn from(row: ControllerStateRow) -> Self {
        Self {
            last_saved_at: row.last_saved_at,
            last_decision_at: row.last_decision_at,
            last_decision_result: row.last_decision_result.map(|j| j.0),
            last_email_sent_at: row.last_email_sent_at,
            last_email_type: row.last_email_type.and_then(|s| parse_email_kind(&s)),
            pending: row.pending.map(|j| j.0),
            pending_first_attempt: row.pending_first_attempt,
            pending_attempt_count: row.pending_attempt_count,
            pending_meta: row.pending_meta.map(|j| j.0),
            updated_at: row.updated_at,
        }
    }
}

fn parse_email_kind(s: &str) -> Option<EmailKind> {
    match s {
        "snapshot_saved" => Some(EmailKind::SnapshotSaved),
        "partial_sync" => Some(EmailKind::PartialSync),
        "week_no_update" => Some(EmailKind::WeekNoUpdate),
        "sync_failed" => Some(EmailKind::SyncFailed),
        _ => None,
    }
}

/// A targeted partial update. Fields left `None` are left untouched; fields
/// holding `Some(None)` explicitly clear a nullable column (used to clear
/// the pending parcel on a successful save).
#[derive(Debug, Clone, Default)]
pub struct ControllerStatePatch {
    pub last_saved_at: Option<DateTime<Utc>>,
    pub last_decision_at: Option<DateTime<Utc>>,
    pub last_decision_result: Option<Decision>,
    pub last_email_sent_at: Option<DateTime<Utc>>,
    pub last_email_type: Option<EmailKind>,
    pub pending: Option<Option<PendingParcel>>,
    pub pending_first_attempt: Option<Option<DateTime<Utc>>>,
    pub pending_attempt_count: Option<i64>,
    pub pending_meta: Option<Option<Value>>,
}

impl ControllerStatePatch {
    /// The patch C8 applies right after a successful save: clears every
    /// pending-parcel field (including `pendingMeta`, spec §4.8) and
    /// advances `last_saved_at`.
    pub fn on_save(now: DateTime<Utc>) -> Self {
        Self {
            last_saved_at: Some(now),
            pending: Some(None),
            pending_first_attempt: Some(None),
            pending_attempt_count: Some(0),
            pending_meta: Some(None),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct ControllerStateStore {
    pool: PgPool,
}

impl ControllerStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns `None` on first use; the caller is responsible for
    /// initializing a fresh state from `ControllerState::initial`.
    pub async fn load(&self) -> Result<Option<ControllerState>> {
        let row: Option<ControllerStateRow> = sqlx::query_as(
            r#"
            SELECT last_saved_at, last_decision_at, last_decision_result,
                   last_email_sent_at, last_email_type, pending,
                   pending_first_attempt, pending_attempt_count, pending_meta,
                   updated_at
            FROM snapshot_save_metadata
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("failed to load controller state")?;

        Ok(row.map(ControllerState::from))
    }

    /// Merge `patch` into the current row (or a freshly initialized one if
    /// this is the first tick ever) and write it back. Bumps `updated_at`.
    pub async fn update(&self, patch: ControllerStatePatch) -> Result<ControllerState> {
        let now = Utc::now();
        let mut state = self.load().await?.unwrap_or_else(|| ControllerState::initial(now));

        if let Some(v) = patch.last_saved_at {
            state.last_saved_at = Some(v);
        }
        if let Some(v) = patch.last_decision_at {
            state.last_decision_at = Some(v);
        }
        if let Some(v) = patch.last_decision_result {
            state.last_decision_result = Some(v);
        }
        if let Some(v) = patch.last_email_sent_at {
            state.last_email_sent_at = Some(v);
        }
        if let Some(v) = patch.last_email_type {
            state.last_email_type = Some(v);
        }
        if let Some(v) = patch.pending {
            state.pending = v;
        }
        if let Some(v) = patch.pending_first_attempt {
            state.pending_first_attempt = v;
        }
        if let Some(v) = patch.pending_attempt_count {
            state.pending_attempt_count = v;
        }
        if let Some(v) = patch.pending_meta {
            state.pending_meta = v;
        }
        state.updated_at = now;

        sqlx::query(
            r#"
            INSERT INTO snapshot_save_metadata (
                id, last_saved_at, last_decision_at, last_decision_result,
                last_email_sent_at, last_email_type, pending,
                pending_first_attempt, pending_attempt_count, pending_meta, updated_at
            ) VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                last_saved_at = excluded.last_saved_at,
                last_decision_at = excluded.last_decision_at,
                last_decision_result = excluded.last_decision_result,
                last_email_sent_at = excluded.last_email_sent_at,
                last_email_type = excluded.last_email_type,
                pending = excluded.pending,
                pending_first_attempt = excluded.pending_first_attempt,
                pending_attempt_count = excluded.pending_attempt_count,
                pending_meta = excluded.pending_meta,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(state.last_saved_at)
        .bind(state.last_decision_at)
        .bind(state.last_decision_result.as_ref().map(Json))
        .bind(state.last_email_sent_at)
        .bind(state.last_email_type.map(|k| k.to_string()))
        .bind(state.pending.as_ref().map(Json))
        .bind(state.pending_first_attempt)
        .bind(state.pending_attempt_count)
        .bind(state.pending_meta.clone())
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .context("failed to persist controller state")?;

        Ok(state)
    }
}
