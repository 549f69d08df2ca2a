// =============================================================================
// Notification Dispatcher — operator email alerts (C7)
// =============================================================================
//
// Sends through Resend's plain HTTP API with `reqwest`, the same
// build-once-reuse client shape as the upstream and Discord clients. No
// corpus example wires up an SMTP crate for transactional mail; Resend's
// API is a JSON POST like any other upstream call, so it gets the same
// treatment rather than a bespoke mail stack.
//
// A send failure is logged and swallowed: the controller tick must never
// fail because an email didn't go out (spec §4.7).
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{instrument, warn};

use crate::types::{Decision, EmailKind, MissingPlayer};

#[derive(Clone)]
pub struct NotificationDispatcher {
    client: reqwest::Client,
    pool: PgPool,
    api_key: String,
    from_address: String,
    to_addresses: Vec<String>,
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

struct ComposedEmail {
    subject: String,
    html: String,
    text: String,
}

impl NotificationDispatcher {
    pub fn new(api_key: String, from_address: String, to_addresses: Vec<String>, pool: PgPool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            pool,
            api_key,
            from_address,
            to_addresses,
        }
    }

    pub async fn notify_snapshot_saved(&self, decision: &Decision, snapshot_date: NaiveDate) {
        let email = compose_snapshot_saved(decision, snapshot_date);
        let _ = self.send(EmailKind::SnapshotSaved, email, Some(snapshot_date)).await;
    }

    /// Dispatched when a snapshot is saved despite sub-100% sync, after
    /// `PARTIAL_SYNC_RETRY_ATTEMPTS` pending re-evaluations (spec §4.3,
    /// scenario C). Unlike the pending-detection path, this save already
    /// happened — the email is a warning, not a status update.
    pub async fn notify_partial_sync_saved(&self, decision: &Decision, snapshot_date: NaiveDate) {
        let email = compose_partial_sync_saved(decision, snapshot_date);
        let _ = self.send(EmailKind::PartialSync, email, Some(snapshot_date)).await;
    }

    /// Dispatched from the `update-player-data` operator endpoint when the
    /// caller explicitly asks for a confirmation email outside the normal
    /// controller tick (spec §6, `sendEmail`/`emailContext`).
    pub async fn notify_manual_save(
        &self,
        snapshot_date: NaiveDate,
        player_count: usize,
        context: Option<&str>,
    ) -> std::result::Result<(), String> {
        let email = compose_manual_save(snapshot_date, player_count, context);
        self.send(EmailKind::SnapshotSaved, email, Some(snapshot_date)).await
    }

    pub async fn notify_week_no_update(&self, hours_since_last_save: f64) {
        let email = compose_week_no_update(hours_since_last_save);
        let _ = self.send(EmailKind::WeekNoUpdate, email, None).await;
    }

    #[instrument(skip(self, email), fields(kind = %kind))]
    async fn send(
        &self,
        kind: EmailKind,
        email: ComposedEmail,
        related_snapshot_date: Option<NaiveDate>,
    ) -> std::result::Result<(), String> {
        let sent_at = Utc::now();
        let mut success = false;
        let mut error_message: Option<String> = None;
        let mut response_data: Option<Value> = None;

        let payload = ResendRequest {
            from: &self.from_address,
            to: &self.to_addresses,
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        };

        match self
            .client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) => {
                let status = resp.status();
                let body: Value = resp.json().await.unwrap_or(Value::Null);
                if status.is_success() {
                    success = true;
                } else {
                    error_message = Some(format!("resend returned status {status}"));
                }
                response_data = Some(body);
            }
            Err(e) => {
                warn!(error = %e, "resend request failed");
                error_message = Some(e.to_string());
            }
        }

        if let Err(e) = self
            .log_attempt(
                sent_at,
                kind,
                &email.subject,
                success,
                error_message.as_deref(),
                response_data.as_ref(),
                related_snapshot_date,
            )
            .await
        {
            warn!(error = %e, "failed to write email_log row");
        }

        if success {
            Ok(())
        } else {
            Err(error_message.unwrap_or_else(|| "email send failed".to_string()))
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_attempt(
        &self,
        sent_at: DateTime<Utc>,
        kind: EmailKind,
        subject: &str,
        success: bool,
        error_message: Option<&str>,
        response_data: Option<&Value>,
        related_snapshot_date: Option<NaiveDate>,
    ) -> Result<()> {
        let recipients = self.to_addresses.join(",");
        sqlx::query(
            r#"
            INSERT INTO email_log (
                sent_at, kind, recipient, subject, success,
                error_message, response_data, related_snapshot_date
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(sent_at)
        .bind(kind.to_string())
        .bind(recipients)
        .bind(subject)
        .bind(success)
        .bind(error_message)
        .bind(response_data.cloned())
        .bind(related_snapshot_date)
        .execute(&self.pool)
        .await
        .context("failed to insert email_log row")?;
        Ok(())
    }
}

fn compose_snapshot_saved(decision: &Decision, snapshot_date: NaiveDate) -> ComposedEmail {
    let subject = format!("Snapshot saved for {snapshot_date}");
    let text = format!(
        "A new historical snapshot was saved for {snapshot_date}.\n\n\
         Sync: {:.1}% ({}/{})\nReason: {}",
        decision.sync_percentage, decision.players_in_sync_window, decision.total_non_excluded, decision.reason
    );
    let html = format!(
        "<p>A new historical snapshot was saved for <b>{snapshot_date}</b>.</p>\
         <p>Sync: {:.1}% ({}/{})<br>Reason: {}</p>",
        decision.sync_percentage, decision.players_in_sync_window, decision.total_non_excluded, decision.reason
    );
    ComposedEmail { subject, html, text }
}

fn compose_partial_sync_saved(decision: &Decision, snapshot_date: NaiveDate) -> ComposedEmail {
    let subject = format!("Snapshot saved with partial sync for {snapshot_date}");
    let missing_lines: String = decision
        .missing
        .iter()
        .take(20)
        .map(format_missing_line)
        .collect::<Vec<_>>()
        .join("\n");

    let text = format!(
        "A snapshot was saved for {snapshot_date} at {:.1}% sync ({}/{}) after {} attempt(s).\n\
         Reason: {}\n\nPlayers outside the sync window:\n{}",
        decision.sync_percentage,
        decision.players_in_sync_window,
        decision.total_non_excluded,
        decision.pending_attempt_count,
        decision.reason,
        missing_lines
    );
    let html = format!(
        "<p>A snapshot was saved for <b>{snapshot_date}</b> at {:.1}% sync ({}/{}) after {} attempt(s).</p>\
         <p>Reason: {}</p>",
        decision.sync_percentage, decision.players_in_sync_window, decision.total_non_excluded, decision.pending_attempt_count, decision.reason
    );
    ComposedEmail { subject, html, text }
}

fn compose_manual_save(snapshot_date: NaiveDate, player_count: usize, context: Option<&str>) -> ComposedEmail {
    let subject = format!("Manual snapshot save for {snapshot_date}");
    let context_line = context.unwrap_or("(no context provided)");
    let text = format!(
        "An operator-triggered snapshot save recorded {player_count} players for {snapshot_date}.\n\
         Context: {context_line}"
    );
    let html = format!(
        "<p>An operator-triggered snapshot save recorded <b>{player_count}</b> players for \
         <b>{snapshot_date}</b>.</p><p>Context: {context_line}</p>"
    );
    ComposedEmail { subject, html, text }
}

fn compose_week_no_update(hours_since_last_save: f64) -> ComposedEmail {
    let days = hours_since_last_save / 24.0;
    let subject = "No snapshot saved in over a week".to_string();
    let text = format!("The last successful snapshot was {days:.1} days ago. Investigate the upstream feed.");
    let html = format!("<p>The last successful snapshot was <b>{days:.1} days</b> ago. Investigate the upstream feed.</p>");
    ComposedEmail { subject, html, text }
}

fn format_missing_line(m: &MissingPlayer) -> String {
    match m.updated_at {
        Some(t) => format!("- {} ({}): last update {t}, {:.1}h ago", m.ign, m.id, m.time_difference_hours),
        None => format!("- {} ({}): no parseable update timestamp", m.ign, m.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_missing_line_handles_absent_timestamp() {
        let m = MissingPlayer {
            id: "1".into(),
            ign: "abc".into(),
            updated_at: None,
            time_difference_hours: f64::INFINITY,
        };
        assert!(format_missing_line(&m).contains("no parseable"));
    }

    #[test]
    fn compose_week_no_update_converts_hours_to_days() {
        let email = compose_week_no_update(240.0);
        assert!(email.text.contains("10.0 days"));
    }

    #[test]
    fn compose_snapshot_saved_includes_date() {
        let decision = Decision {
            should_save: true,
            sync_percentage: 95.0,
            players_in_sync_window: 95,
            total_non_excluded: 100,
            total_received: 101,
            excluded_count: 1,
            lowest_updated_at: None,
            hours_since_lowest_update: 0.0,
            hours_since_last_save: 0.0,
            reason: "primary rule".into(),
            is_pending_sync: false,
            pending_attempt_count: 0,
            missing: Vec::new(),
        };
        let date = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap().date_naive();
        let email = compose_snapshot_saved(&decision, date);
        assert!(email.subject.contains("2026-01-01"));
    }

    #[test]
    fn compose_partial_sync_saved_reflects_a_completed_save() {
        let decision = Decision {
            should_save: true,
            sync_percentage: 99.0,
            players_in_sync_window: 99,
            total_non_excluded: 100,
            total_received: 100,
            excluded_count: 0,
            lowest_updated_at: None,
            hours_since_lowest_update: 0.5,
            hours_since_last_save: 3.0,
            reason: "partial sync after 2 attempts, saving with warning".into(),
            is_pending_sync: false,
            pending_attempt_count: 2,
            missing: Vec::new(),
        };
        let date = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap().date_naive();
        let email = compose_partial_sync_saved(&decision, date);
        assert!(email.subject.contains("2026-02-01"));
        assert!(email.text.contains("was saved"));
        assert!(!email.text.contains("below the save threshold"));
    }

    #[test]
    fn compose_manual_save_includes_context() {
        let date = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap().date_naive();
        let email = compose_manual_save(date, 42, Some("backfill from operator tooling"));
        assert!(email.text.contains("42 players"));
        assert!(email.text.contains("backfill from operator tooling"));
    }
}
