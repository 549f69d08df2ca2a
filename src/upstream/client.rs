// =============================================================================
// Upstream Telemetry Client — one HTTPS GET per poll
// =============================================================================
//
// Mirrors the request-building shape of `binance/client.rs`: a single
// `reqwest::Client` built once with a bounded timeout, reused across polls.
// Unlike the Binance client there is nothing to sign — the upstream endpoint
// is a plain unauthenticated (or bearer-authenticated) GET.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::types::{PlayerRecord, RawPlayerRecord};

/// Client for the external game-data provider's player-list endpoint.
#[derive(Clone)]
pub struct UpstreamClient {
    url: String,
    client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");

        Self {
            url: url.into(),
            client,
        }
    }

    /// Fetch the current player set. A non-2xx response, empty array, or
    /// non-array payload is a retryable failure: the caller (the Periodic
    /// Controller) treats it as "no data" and does not touch the cache or
    /// state (spec §4.1).
    #[instrument(skip(self), name = "upstream::fetch")]
    pub async fn fetch(&self) -> Result<Vec<PlayerRecord>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("upstream request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("upstream returned non-2xx status {status}");
        }

        let raw: Vec<RawPlayerRecord> = resp
            .json()
            .await
            .context("upstream response was not a JSON array of player records")?;

        if raw.is_empty() {
            anyhow::bail!("upstream returned an empty player list");
        }

        let records = raw.into_iter().map(parse_record).collect::<Vec<_>>();
        debug!(count = records.len(), "upstream fetch succeeded");
        Ok(records)
    }
}

fn parse_record(raw: RawPlayerRecord) -> PlayerRecord {
    let updated_at = parse_instant(&raw.updated_at);
    if updated_at.is_none() {
        warn!(id = %raw.id, raw = %raw.updated_at, "unparseable updatedAt, excluding from sync-window math");
    }

    PlayerRecord {
        id: raw.id,
        ign: raw.ign,
        display_name: raw.display_name,
        discord_name: raw.discord_name,
        farmer_role: raw.farmer_role,
        grade: raw.grade,
        active: raw.active,
        is_guest: raw.is_guest,
        eb: raw.eb,
        se: raw.se,
        pe: raw.pe,
        te: raw.te,
        num_prestiges: raw.num_prestiges,
        updated_at,
        gains_saturday: raw.gains_saturday,
        max_mystical_eggs: raw.max_mystical_eggs,
        egg_day: raw.egg_day,
    }
}

/// Parse an ISO-8601 instant. Unparseable timestamps become `None` rather
/// than aborting the whole fetch.
fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_record_keeps_valid_timestamp() {
        let raw = RawPlayerRecord {
            id: "1".into(),
            ign: "abc".into(),
            display_name: None,
            discord_name: "abc#0".into(),
            farmer_role: None,
            grade: "aaa".into(),
            active: true,
            is_guest: false,
            eb: 1.0,
            se: 1.0,
            pe: 1,
            te: None,
            num_prestiges: None,
            updated_at: "2026-01-01T00:00:00Z".into(),
            gains_saturday: None,
            max_mystical_eggs: None,
            egg_day: Vec::new(),
        };
        let parsed = parse_record(raw);
        assert!(parsed.updated_at.is_some());
        assert_eq!(parsed.grade, "aaa");
    }

    #[test]
    fn parse_record_nulls_unparseable_timestamp() {
        let mut raw = RawPlayerRecord {
            id: "1".into(),
            ign: "abc".into(),
            display_name: None,
            discord_name: "abc#0".into(),
            farmer_role: None,
            grade: "aaa".into(),
            active: true,
            is_guest: false,
            eb: 1.0,
            se: 1.0,
            pe: 1,
            te: None,
            num_prestiges: None,
            updated_at: "not-a-timestamp".into(),
            gains_saturday: None,
            max_mystical_eggs: None,
            egg_day: Vec::new(),
        };
        raw.updated_at = "garbage".into();
        let parsed = parse_record(raw);
        assert!(parsed.updated_at.is_none());
    }
}
