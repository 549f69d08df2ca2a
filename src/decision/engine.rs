// =============================================================================
// Snapshot Decision Engine — pure function over (records, exclusions, state, now)
// =============================================================================
//
// This is the centerpiece of the service. It never touches I/O: callers
// (the Periodic Controller, C8) read state, call `decide`, and act on the
// returned `Decision`. Two consecutive calls with identical inputs produce
// identical outputs — there is no hidden mutable state here.
//
// The one-hour sync-window cutoff is intentionally distinct from
// `SYNC_WINDOW_HOURS` (≈ 1h5m), which only gates recency. Per the open
// question in spec §9, the two were never confirmed to be the same
// constant; the inner window stays fixed at exactly one hour.
// =============================================================================

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::config::DecisionConstants;
use crate::types::{ControllerState, Decision, MissingPlayer, PlayerRecord};

/// The sync window's inner cutoff: a player is "in sync" with the oldest
/// update if it refreshed strictly less than one hour after it. This is
/// fixed by spec and not configurable (unlike `SYNC_WINDOW_HOURS`).
const SYNC_WINDOW_INNER_HOURS: f64 = 1.0;

fn hours_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 3_600_000.0
}

struct SyncStats {
    lowest_updated_at: Option<DateTime<Utc>>,
    players_in_sync_window: i64,
    sync_percentage: f64,
    missing: Vec<MissingPlayer>,
}

fn compute_sync_stats(filtered: &[&PlayerRecord], total_non_excluded: i64) -> SyncStats {
    let lowest_updated_at = filtered.iter().filter_map(|r| r.updated_at).min();

    let Some(lowest) = lowest_updated_at else {
        // No filtered record carries a parseable timestamp: nothing can be
        // placed "in window" and nothing can be called recent.
        let missing = filtered
            .iter()
            .map(|r| MissingPlayer {
                id: r.id.clone(),
                ign: r.ign.clone(),
                updated_at: r.updated_at,
                time_difference_hours: f64::INFINITY,
            })
            .collect();
        return SyncStats {
            lowest_updated_at: None,
            players_in_sync_window: 0,
            sync_percentage: 0.0,
            missing,
        };
    };

    let mut players_in_sync_window = 0i64;
    let mut missing = Vec::new();

    for r in filtered {
        match r.updated_at {
            Some(t) => {
                let diff_hours = hours_between(t, lowest);
                if diff_hours < SYNC_WINDOW_INNER_HOURS {
                    players_in_sync_window += 1;
                } else {
                    missing.push(MissingPlayer {
                        id: r.id.clone(),
                        ign: r.ign.clone(),
                        updated_at: r.updated_at,
                        time_difference_hours: diff_hours,
                    });
                }
            }
            None => missing.push(MissingPlayer {
                id: r.id.clone(),
                ign: r.ign.clone(),
                updated_at: None,
                time_difference_hours: f64::INFINITY,
            }),
        }
    }

    let sync_percentage = if total_non_excluded > 0 {
        100.0 * players_in_sync_window as f64 / total_non_excluded as f64
    } else {
        0.0
    };

    SyncStats {
        lowest_updated_at: Some(lowest),
        players_in_sync_window,
        sync_percentage,
        missing,
    }
}

/// Decide whether this poll should become a new historical snapshot, be
/// parked as a pending candidate, or be skipped entirely.
pub fn decide(
    records: &[PlayerRecord],
    exclusions: &HashSet<String>,
    state: &ControllerState,
    now: DateTime<Utc>,
    consts: &DecisionConstants,
) -> Decision {
    let total_received = records.len() as i64;

    let filtered: Vec<&PlayerRecord> = records
        .iter()
        .filter(|r| !r.is_guest && !exclusions.contains(&r.id))
        .collect();
    let total_non_excluded = filtered.len() as i64;
    let excluded_count = total_received - total_non_excluded;

    if total_non_excluded == 0 {
        return Decision {
            should_save: false,
            sync_percentage: 0.0,
            players_in_sync_window: 0,
            total_non_excluded: 0,
            total_received,
            excluded_count,
            lowest_updated_at: None,
            hours_since_lowest_update: f64::INFINITY,
            hours_since_last_save: state.hours_since_last_save(now),
            reason: "no valid players".to_string(),
            is_pending_sync: false,
            pending_attempt_count: 0,
            missing: Vec::new(),
        };
    }

    let stats = compute_sync_stats(&filtered, total_non_excluded);
    let hours_since_lowest_update = match stats.lowest_updated_at {
        Some(t) => hours_between(now, t),
        None => f64::INFINITY,
    };
    let update_is_recent = hours_since_lowest_update < consts.sync_window_hours;

    let hours_since_last_save = state.hours_since_last_save(now);
    let cooldown_passed = hours_since_last_save > consts.cooldown_hours;

    let fully_synced = stats.sync_percentage >= 100.0;
    let partially_synced = stats.sync_percentage >= consts.partial_sync_threshold;

    let sync_percentage = stats.sync_percentage;
    let players_in_sync_window = stats.players_in_sync_window;
    let lowest_updated_at = stats.lowest_updated_at;
    let missing = stats.missing;

    // ---- Pending-state handling (checked before the primary rules) -------
    let mut has_pending = false;
    if let Some(pending) = &state.pending {
        let first_attempt = state
            .pending_first_attempt
            .unwrap_or(pending.captured_at);
        let pending_age_hours = hours_between(now, first_attempt);

        if pending_age_hours > consts.pending_sync_stale_hours {
            // Stale: treat as if no pending parcel existed at all.
            has_pending = false;
        } else {
            has_pending = true;

            if sync_percentage >= 100.0 {
                return Decision {
                    should_save: true,
                    sync_percentage,
                    players_in_sync_window,
                    total_non_excluded,
                    total_received,
                    excluded_count,
                    lowest_updated_at,
                    hours_since_lowest_update,
                    hours_since_last_save,
                    reason: "100% sync achieved after pending sync".to_string(),
                    is_pending_sync: false,
                    pending_attempt_count: state.pending_attempt_count + 1,
                    missing,
                };
            }

            if sync_percentage >= consts.partial_sync_threshold
                && state.pending_attempt_count >= consts.partial_sync_retry_attempts - 1
            {
                return Decision {
                    should_save: true,
                    sync_percentage,
                    players_in_sync_window,
                    total_non_excluded,
                    total_received,
                    excluded_count,
                    lowest_updated_at,
                    hours_since_lowest_update,
                    hours_since_last_save,
                    reason: format!(
                        "partial sync after {} attempts, saving with warning",
                        state.pending_attempt_count + 1
                    ),
                    is_pending_sync: false,
                    pending_attempt_count: state.pending_attempt_count + 1,
                    missing,
                };
            }
        }
    }

    // ---- Primary rules (fall-through, first match wins) -------------------
    if fully_synced && update_is_recent && cooldown_passed {
        return Decision {
            should_save: true,
            sync_percentage,
            players_in_sync_window,
            total_non_excluded,
            total_received,
            excluded_count,
            lowest_updated_at,
            hours_since_lowest_update,
            hours_since_last_save,
            reason: "all conditions met".to_string(),
            is_pending_sync: false,
            pending_attempt_count: 0,
            missing,
        };
    }

    if partially_synced && update_is_recent && cooldown_passed && !has_pending {
        return Decision {
            should_save: false,
            sync_percentage,
            players_in_sync_window,
            total_non_excluded,
            total_received,
            excluded_count,
            lowest_updated_at,
            hours_since_lowest_update,
            hours_since_last_save,
            reason: "partial sync detected, storing for retry".to_string(),
            is_pending_sync: true,
            pending_attempt_count: 1,
            missing,
        };
    }

    let reason = if !update_is_recent {
        format!(
            "Data not recent enough ({:.2}h since oldest update, window is {:.2}h)",
            hours_since_lowest_update, consts.sync_window_hours
        )
    } else if !cooldown_passed {
        format!(
            "Cooldown not passed ({:.2}h since last save, cooldown is {:.2}h)",
            hours_since_last_save, consts.cooldown_hours
        )
    } else {
        format!(
            "Insufficient sync percentage ({:.2}% of {} players)",
            sync_percentage, total_non_excluded
        )
    };

    Decision {
        should_save: false,
        sync_percentage,
        players_in_sync_window,
        total_non_excluded,
        total_received,
        excluded_count,
        lowest_updated_at,
        hours_since_lowest_update,
        hours_since_last_save,
        reason,
        is_pending_sync: false,
        pending_attempt_count: state.pending_attempt_count,
        missing,
    }
}

/// Spec §4.7: `week_no_update` alert gating, evaluated after the main
/// decision every tick regardless of its outcome.
pub fn should_send_week_no_update_alert(
    state: &ControllerState,
    now: DateTime<Utc>,
    consts: &DecisionConstants,
) -> bool {
    let hours_since_last_save = state.hours_since_last_save(now);
    let threshold_hours = consts.alert_threshold_days * 24.0 + 1.0;
    if hours_since_last_save < threshold_hours {
        return false;
    }

    match state.last_email_sent_at {
        None => true,
        Some(last) => hours_between(now, last) > consts.alert_cooldown_hours,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PendingParcel;
    use chrono::Duration;

    fn mk_record(id: &str, updated_at: Option<DateTime<Utc>>) -> PlayerRecord {
        PlayerRecord {
            id: id.to_string(),
            ign: format!("ign-{id}"),
            display_name: None,
            discord_name: format!("discord-{id}"),
            farmer_role: None,
            grade: "aaa".to_string(),
            active: true,
            is_guest: false,
            eb: 1.0,
            se: 1.0,
            pe: 1,
            te: None,
            num_prestiges: None,
            updated_at,
            gains_saturday: None,
            max_mystical_eggs: None,
            egg_day: Vec::new(),
        }
    }

    fn empty_state() -> ControllerState {
        ControllerState {
            last_saved_at: None,
            last_decision_at: None,
            last_decision_result: None,
            last_email_sent_at: None,
            last_email_type: None,
            pending: None,
            pending_first_attempt: None,
            pending_attempt_count: 0,
            pending_meta: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn scenario_a_clean_save() {
        let t = Utc::now() - Duration::hours(3);
        let now = t + Duration::minutes(30);
        let records: Vec<PlayerRecord> = (0..100).map(|i| mk_record(&i.to_string(), Some(t))).collect();
        let mut state = empty_state();
        state.last_saved_at = Some(t - Duration::hours(2));

        let decision = decide(&records, &HashSet::new(), &state, now, &DecisionConstants::default());

        assert_eq!(decision.sync_percentage, 100.0);
        assert!(decision.should_save);
        assert_eq!(decision.reason, "all conditions met");
    }

    #[test]
    fn scenario_b_first_detection_of_partial_sync() {
        let t = Utc::now() - Duration::hours(3);
        let now = t + Duration::minutes(40);
        let mut records: Vec<PlayerRecord> =
            (0..99).map(|i| mk_record(&i.to_string(), Some(t))).collect();
        records.push(mk_record("straggler", Some(t + Duration::minutes(75))));

        let mut state = empty_state();
        state.last_saved_at = Some(t - Duration::hours(2));

        let decision = decide(&records, &HashSet::new(), &state, now, &DecisionConstants::default());

        assert_eq!(decision.players_in_sync_window, 99);
        assert!((decision.sync_percentage - 99.0).abs() < 1e-9);
        assert!(!decision.should_save);
        assert!(decision.is_pending_sync);
        assert_eq!(decision.pending_attempt_count, 1);
    }

    #[test]
    fn scenario_c_pending_reevaluation_same_laggard() {
        let t = Utc::now() - Duration::hours(3);
        let now = t + Duration::minutes(55);
        let mut records: Vec<PlayerRecord> =
            (0..99).map(|i| mk_record(&i.to_string(), Some(t))).collect();
        records.push(mk_record("straggler", Some(t + Duration::minutes(75))));

        let mut state = empty_state();
        state.last_saved_at = Some(t - Duration::hours(2));
        state.pending_attempt_count = 1;
        state.pending_first_attempt = Some(t + Duration::minutes(40));
        state.pending = Some(PendingParcel {
            records: records.clone(),
            captured_at: t + Duration::minutes(40),
            sync_percentage: 99.0,
            attempt_count: 1,
            missing: Vec::new(),
        });

        let decision = decide(&records, &HashSet::new(), &state, now, &DecisionConstants::default());

        assert!(decision.should_save);
        assert!(decision.reason.contains("partial sync after"));
        assert!(!decision.is_pending_sync);
    }

    #[test]
    fn scenario_d_pending_resolves_at_100_percent() {
        let t = Utc::now() - Duration::hours(3);
        let now = t + Duration::minutes(50);
        let records: Vec<PlayerRecord> = (0..100).map(|i| mk_record(&i.to_string(), Some(t))).collect();

        let mut state = empty_state();
        state.last_saved_at = Some(t - Duration::hours(2));
        state.pending_attempt_count = 1;
        state.pending_first_attempt = Some(t + Duration::minutes(40));
        state.pending = Some(PendingParcel {
            records: records.clone(),
            captured_at: t + Duration::minutes(40),
            sync_percentage: 99.0,
            attempt_count: 1,
            missing: Vec::new(),
        });

        let decision = decide(&records, &HashSet::new(), &state, now, &DecisionConstants::default());

        assert!(decision.should_save);
        assert!(decision.reason.contains("100% sync achieved after pending sync"));
    }

    #[test]
    fn scenario_e_cooldown_blocks() {
        let t = Utc::now() - Duration::minutes(40);
        let now = t;
        let records: Vec<PlayerRecord> = (0..50).map(|i| mk_record(&i.to_string(), Some(t))).collect();

        let mut state = empty_state();
        state.last_saved_at = Some(t - Duration::minutes(30));

        let decision = decide(&records, &HashSet::new(), &state, now, &DecisionConstants::default());

        assert!(!decision.should_save);
        assert!(decision.reason.contains("Cooldown not passed"));
    }

    #[test]
    fn scenario_f_week_no_update_alert_fires_then_suppressed() {
        let now = Utc::now();
        let mut state = empty_state();
        state.last_saved_at = Some(now - Duration::days(8));
        state.last_email_type = None;

        assert!(should_send_week_no_update_alert(&state, now, &DecisionConstants::default()));

        state.last_email_sent_at = Some(now);
        let now2 = now + Duration::minutes(30);
        assert!(!should_send_week_no_update_alert(&state, now2, &DecisionConstants::default()));
    }

    #[test]
    fn no_valid_players_when_all_guests_or_excluded() {
        let mut r = mk_record("a", Some(Utc::now()));
        r.is_guest = true;
        let state = empty_state();
        let decision = decide(&[r], &HashSet::new(), &state, Utc::now(), &DecisionConstants::default());
        assert!(!decision.should_save);
        assert_eq!(decision.reason, "no valid players");
    }

    #[test]
    fn invariant_counts_are_consistent() {
        let t = Utc::now();
        let mut excluded = HashSet::new();
        excluded.insert("excluded-1".to_string());
        let mut records: Vec<PlayerRecord> =
            (0..10).map(|i| mk_record(&i.to_string(), Some(t))).collect();
        records.push(mk_record("excluded-1", Some(t)));

        let state = empty_state();
        let decision = decide(&records, &excluded, &state, t, &DecisionConstants::default());

        assert_eq!(decision.total_received, 11);
        assert_eq!(decision.total_non_excluded, 10);
        assert_eq!(decision.excluded_count, 1);
        assert!(decision.players_in_sync_window <= decision.total_non_excluded);
        assert!(decision.total_non_excluded <= decision.total_received);
    }
}
