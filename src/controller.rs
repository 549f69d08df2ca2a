// =============================================================================
// Periodic Controller — one tick of the whole pipeline (C8)
// =============================================================================
//
// Wires C1 (upstream) -> C2 (exclusions) -> C5 (cache) -> C3 (decision) ->
// (C6 save | park pending) -> C7 (notify), then persists the updated
// controller state. Mirrors the teacher's tick-driven `AppState` update loop
// in spirit: one function run on a fixed interval, reading live inputs and
// folding them into persisted state.
// =============================================================================

use std::collections::HashSet;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::cache_writer::CacheWriter;
use crate::config::DecisionConstants;
use crate::controller_state::{ControllerStatePatch, ControllerStateStore};
use crate::decision::engine::{decide, should_send_week_no_update_alert};
use crate::exclusions::ExclusionRegistry;
use crate::notifications::NotificationDispatcher;
use crate::snapshot_writer::SnapshotWriter;
use crate::types::{Decision, EmailKind, PendingParcel};
use crate::upstream::client::UpstreamClient;

#[derive(Clone)]
pub struct PeriodicController {
    upstream: UpstreamClient,
    exclusions: ExclusionRegistry,
    cache: CacheWriter,
    snapshots: SnapshotWriter,
    state_store: ControllerStateStore,
    notifications: NotificationDispatcher,
    consts: DecisionConstants,
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub decision: Decision,
    pub saved: bool,
    pub alert_sent: bool,
    /// Number of cache insert batches that failed during this tick's
    /// mandatory `CacheWriter::replace` call (spec §7 `cache_write_partial`).
    /// Non-zero does not abort the tick; the freshness marker still
    /// advances and the next tick self-heals.
    pub cache_write_failed_batches: usize,
}

impl PeriodicController {
    pub fn new(
        upstream: UpstreamClient,
        exclusions: ExclusionRegistry,
        cache: CacheWriter,
        snapshots: SnapshotWriter,
        state_store: ControllerStateStore,
        notifications: NotificationDispatcher,
        consts: DecisionConstants,
    ) -> Self {
        Self {
            upstream,
            exclusions,
            cache,
            snapshots,
            state_store,
            notifications,
            consts,
        }
    }

    /// One full pipeline pass. Errors reaching this point from C1 abort the
    /// tick entirely, leaving cache and state untouched (spec §4.1, §4.8).
    #[instrument(skip(self), name = "controller::tick")]
    pub async fn tick(&self) -> anyhow::Result<TickOutcome> {
        let now = Utc::now();

        let records = match self.upstream.fetch().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "upstream fetch failed, skipping tick");
                return Err(e);
            }
        };

        let exclusions: HashSet<String> = self.exclusions.list().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to load exclusions, treating as empty");
            HashSet::new()
        });

        let cache_write_failed_batches = match self.cache.replace(&records).await {
            Ok(result) => {
                if !result.failed_batches.is_empty() {
                    warn!(
                        failed_batches = result.failed_batches.len(),
                        "cache replace partially failed"
                    );
                }
                result.failed_batches.len()
            }
            Err(e) => {
                warn!(error = %e, "cache replace failed");
                0
            }
        };

        let state = match self.state_store.load().await {
            Ok(Some(s)) => s,
            Ok(None) => crate::types::ControllerState::initial(now),
            Err(e) => {
                warn!(error = %e, "failed to load controller state, using fresh state");
                crate::types::ControllerState::initial(now)
            }
        };

        let decision = decide(&records, &exclusions, &state, now, &self.consts);
        info!(
            should_save = decision.should_save,
            sync_percentage = decision.sync_percentage,
            reason = %decision.reason,
            "decision computed"
        );

        let mut saved = false;

        if decision.should_save {
            match self.snapshots.save(&records, now).await {
                Ok(result) => {
                    saved = true;
                    let patch = ControllerStatePatch {
                        last_decision_at: Some(now),
                        last_decision_result: Some(decision.clone()),
                        ..ControllerStatePatch::on_save(now)
                    };
                    if let Err(e) = self.state_store.update(patch).await {
                        error!(error = %e, "failed to persist state after save");
                    }
                    if let Some(date) = result.snapshot_date {
                        if decision.sync_percentage < 100.0 {
                            self.notifications.notify_partial_sync_saved(&decision, date).await;
                        } else {
                            self.notifications.notify_snapshot_saved(&decision, date).await;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "snapshot save failed");
                }
            }
        } else if decision.is_pending_sync {
            let pending = PendingParcel {
                records: records.clone(),
                captured_at: now,
                sync_percentage: decision.sync_percentage,
                attempt_count: decision.pending_attempt_count,
                missing: decision.missing.clone(),
            };
            let patch = ControllerStatePatch {
                last_decision_at: Some(now),
                last_decision_result: Some(decision.clone()),
                pending: Some(Some(pending)),
                pending_first_attempt: Some(Some(now)),
                pending_attempt_count: Some(decision.pending_attempt_count),
                ..Default::default()
            };
            if let Err(e) = self.state_store.update(patch).await {
                error!(error = %e, "failed to persist pending state");
            }
            // Spec §4.8: parking a pending parcel is silent — no operator
            // email until it either resolves to 100% or is saved with a
            // warning after PARTIAL_SYNC_RETRY_ATTEMPTS (scenario B).
        } else {
            let patch = ControllerStatePatch {
                last_decision_at: Some(now),
                last_decision_result: Some(decision.clone()),
                ..Default::default()
            };
            if let Err(e) = self.state_store.update(patch).await {
                error!(error = %e, "failed to persist decision-only state");
            }
        }

        let alert_sent = self.maybe_send_week_no_update_alert(&state, now).await;

        Ok(TickOutcome {
            decision,
            saved,
            alert_sent,
            cache_write_failed_batches,
        })
    }

    async fn maybe_send_week_no_update_alert(&self, state: &crate::types::ControllerState, now: chrono::DateTime<Utc>) -> bool {
        if !should_send_week_no_update_alert(state, now, &self.consts) {
            return false;
        }

        let hours_since_last_save = state.hours_since_last_save(now);
        self.notifications.notify_week_no_update(hours_since_last_save).await;

        let patch = ControllerStatePatch {
            last_email_sent_at: Some(now),
            last_email_type: Some(EmailKind::WeekNoUpdate),
            ..Default::default()
        };
        if let Err(e) = self.state_store.update(patch).await {
            error!(error = %e, "failed to persist week_no_update alert state");
        }
        true
    }
}
