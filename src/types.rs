// =============================================================================
// Shared data model — player telemetry, cache rows, snapshot rows, decisions
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One year's start/end progression snapshot within a player's egg-day log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearEndpoint {
    #[serde(rename = "SE")]
    pub se: f64,
    #[serde(rename = "PE")]
    pub pe: i64,
    #[serde(rename = "EB")]
    pub eb: f64,
    #[serde(rename = "Role")]
    pub role: Option<String>,
    #[serde(rename = "Prestiges")]
    pub prestiges: Option<i64>,
}

/// A single year's worth of gains, as reported by the upstream's `eggDay` series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearlyGain {
    pub year: i32,
    pub start: YearEndpoint,
    pub end: YearEndpoint,
}

/// One player's telemetry as reported by a single upstream poll.
///
/// Lives only for the duration of one controller tick: it is copied into a
/// [`CacheEntry`] unconditionally, and optionally persisted as a
/// [`HistoricalSnapshotRow`] + [`YearlyGainRow`] set when the tick decides to save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: String,
    pub ign: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "discordName")]
    pub discord_name: String,
    #[serde(rename = "farmerRole")]
    pub farmer_role: Option<String>,
    pub grade: String,
    pub active: bool,
    #[serde(rename = "isGuest")]
    pub is_guest: bool,
    #[serde(rename = "EB")]
    pub eb: f64,
    #[serde(rename = "SE")]
    pub se: f64,
    #[serde(rename = "PE")]
    pub pe: i64,
    #[serde(rename = "TE")]
    pub te: Option<i64>,
    #[serde(rename = "numPrestiges")]
    pub num_prestiges: Option<i64>,
    /// The upstream's own "last refreshed this player" instant. Central to
    /// the decision engine's sync-window math. `None` when the upstream sent
    /// a timestamp that failed to parse — such a record is excluded from
    /// sync-window math (spec §4.1) even though it is still cached.
    #[serde(rename = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "gainsSaturday")]
    pub gains_saturday: Option<f64>,
    #[serde(rename = "maxMysticalEggs")]
    pub max_mystical_eggs: Option<i64>,
    #[serde(rename = "eggDay", default)]
    pub egg_day: Vec<YearlyGain>,
}

impl PlayerRecord {
    /// Upper-case the upstream `grade` spelling for cache-layer emission.
    /// Per spec §9 Open Questions: the authoritative spelling is not
    /// documented; the cache layer's emission is treated as canonical.
    pub fn normalized_grade(&self) -> String {
        self.grade.to_uppercase()
    }
}

/// Raw payload shape returned by the upstream HTTP endpoint (before
/// timestamp parsing). Deserialized first, then converted into
/// [`PlayerRecord`] by [`crate::upstream::client`] so that unparseable
/// `updatedAt` values become `None` rather than a hard failure.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPlayerRecord {
    pub id: String,
    pub ign: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "discordName")]
    pub discord_name: String,
    #[serde(rename = "farmerRole")]
    pub farmer_role: Option<String>,
    pub grade: String,
    pub active: bool,
    #[serde(rename = "isGuest")]
    pub is_guest: bool,
    #[serde(rename = "EB")]
    pub eb: f64,
    #[serde(rename = "SE")]
    pub se: f64,
    #[serde(rename = "PE")]
    pub pe: i64,
    #[serde(rename = "TE")]
    pub te: Option<i64>,
    #[serde(rename = "numPrestiges")]
    pub num_prestiges: Option<i64>,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
    #[serde(rename = "gainsSaturday")]
    pub gains_saturday: Option<f64>,
    #[serde(rename = "maxMysticalEggs")]
    pub max_mystical_eggs: Option<i64>,
    #[serde(rename = "eggDay", default)]
    pub egg_day: Vec<YearlyGain>,
}

/// Mutable current-state cache row. An exact image of the last successful
/// poll, minus the fields the cache intentionally drops
/// (`updatedAt`, `gainsSaturday`, `maxMysticalEggs`, `eggDay`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CacheEntry {
    pub id: String,
    pub ign: String,
    pub display_name: Option<String>,
    pub discord_name: String,
    pub eb: f64,
    pub se: f64,
    pub pe: i64,
    pub te: Option<i64>,
    pub num_prestiges: Option<i64>,
    pub farmer_role: Option<String>,
    pub grade: String,
    pub is_guest: bool,
    pub active: bool,
}

impl From<&PlayerRecord> for CacheEntry {
    fn from(p: &PlayerRecord) -> Self {
        Self {
            id: p.id.clone(),
            ign: p.ign.clone(),
            display_name: p.display_name.clone(),
            discord_name: p.discord_name.clone(),
            eb: p.eb,
            se: p.se,
            pe: p.pe,
            te: p.te,
            num_prestiges: p.num_prestiges,
            farmer_role: p.farmer_role.clone(),
            grade: p.normalized_grade(),
            is_guest: p.is_guest,
            active: p.active,
        }
    }
}

/// Append-only historical row. Key `(snapshot_date, id)` is unique; writes
/// are upserts on that key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoricalSnapshotRow {
    pub snapshot_date: chrono::NaiveDate,
    pub id: String,
    pub ign: String,
    pub display_name: Option<String>,
    pub discord_name: String,
    pub eb: f64,
    pub se: f64,
    pub pe: i64,
    pub te: Option<i64>,
    pub num_prestiges: Option<i64>,
    pub farmer_role: Option<String>,
    pub grade: String,
    pub is_guest: bool,
    pub active: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub gains_saturday: Option<f64>,
    pub max_mystical_eggs: Option<i64>,
}

impl HistoricalSnapshotRow {
    pub fn from_record(p: &PlayerRecord, snapshot_date: chrono::NaiveDate) -> Self {
        Self {
            snapshot_date,
            id: p.id.clone(),
            ign: p.ign.clone(),
            display_name: p.display_name.clone(),
            discord_name: p.discord_name.clone(),
            eb: p.eb,
            se: p.se,
            pe: p.pe,
            te: p.te,
            num_prestiges: p.num_prestiges,
            farmer_role: p.farmer_role.clone(),
            grade: p.normalized_grade(),
            is_guest: p.is_guest,
            active: p.active,
            updated_at: p.updated_at,
            gains_saturday: p.gains_saturday,
            max_mystical_eggs: p.max_mystical_eggs,
        }
    }
}

/// Per-`snapshot_date` metadata row, upserted alongside the snapshot rows.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SnapshotMetadataRow {
    pub snapshot_date: chrono::NaiveDate,
    pub record_count: i64,
    pub imported_at: DateTime<Utc>,
}

/// One `(id, year)` progression row, upserted on that key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct YearlyGainRow {
    pub id: String,
    pub year: i32,
    pub start_se: f64,
    pub start_pe: i64,
    pub start_eb: f64,
    pub start_role: Option<String>,
    pub start_prestiges: Option<i64>,
    pub end_se: f64,
    pub end_pe: i64,
    pub end_eb: f64,
    pub end_role: Option<String>,
    pub end_prestiges: Option<i64>,
}

impl YearlyGainRow {
    pub fn from_gain(player_id: &str, gain: &YearlyGain) -> Self {
        Self {
            id: player_id.to_string(),
            year: gain.year,
            start_se: gain.start.se,
            start_pe: gain.start.pe,
            start_eb: gain.start.eb,
            start_role: gain.start.role.clone(),
            start_prestiges: gain.start.prestiges,
            end_se: gain.end.se,
            end_pe: gain.end.pe,
            end_eb: gain.end.eb,
            end_role: gain.end.role.clone(),
            end_prestiges: gain.end.prestiges,
        }
    }
}

/// A record that fell outside the sync window, annotated with how far it lagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingPlayer {
    pub id: String,
    pub ign: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub time_difference_hours: f64,
}

/// Pure output of the Snapshot Decision Engine (C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub should_save: bool,
    pub sync_percentage: f64,
    pub players_in_sync_window: i64,
    pub total_non_excluded: i64,
    pub total_received: i64,
    pub excluded_count: i64,
    pub lowest_updated_at: Option<DateTime<Utc>>,
    pub hours_since_lowest_update: f64,
    /// `f64::INFINITY` when no save has ever happened.
    pub hours_since_last_save: f64,
    pub reason: String,
    pub is_pending_sync: bool,
    pub pending_attempt_count: i64,
    pub missing: Vec<MissingPlayer>,
}

/// A cached partial-sync attempt awaiting one more controller tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingParcel {
    pub records: Vec<PlayerRecord>,
    pub captured_at: DateTime<Utc>,
    pub sync_percentage: f64,
    pub attempt_count: i64,
    pub missing: Vec<MissingPlayer>,
}

/// Kind of operator notification most recently sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    SnapshotSaved,
    PartialSync,
    WeekNoUpdate,
    /// Reserved; never emitted (spec §9 Open Questions).
    SyncFailed,
}

impl std::fmt::Display for EmailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SnapshotSaved => "snapshot_saved",
            Self::PartialSync => "partial_sync",
            Self::WeekNoUpdate => "week_no_update",
            Self::SyncFailed => "sync_failed",
        };
        write!(f, "{s}")
    }
}

/// Single-row persisted state machine for the decision engine (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerState {
    pub last_saved_at: Option<DateTime<Utc>>,
    pub last_decision_at: Option<DateTime<Utc>>,
    pub last_decision_result: Option<Decision>,
    pub last_email_sent_at: Option<DateTime<Utc>>,
    pub last_email_type: Option<EmailKind>,
    pub pending: Option<PendingParcel>,
    pub pending_first_attempt: Option<DateTime<Utc>>,
    pub pending_attempt_count: i64,
    /// Free-form operator annotation on the pending parcel. Never populated
    /// by the controller itself (spec §3); cleared alongside the rest of
    /// the pending fields on a successful save.
    pub pending_meta: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl ControllerState {
    /// A fresh singleton row for first use (spec §4.4: `load()` returns
    /// `None` on first use; the caller initializes).
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            last_saved_at: None,
            last_decision_at: None,
            last_decision_result: None,
            last_email_sent_at: None,
            last_email_type: None,
            pending: None,
            pending_first_attempt: None,
            pending_attempt_count: 0,
            pending_meta: None,
            updated_at: now,
        }
    }

    pub fn hours_since_last_save(&self, now: DateTime<Utc>) -> f64 {
        match self.last_saved_at {
            Some(t) => (now - t).num_milliseconds() as f64 / 3_600_000.0,
            None => f64::INFINITY,
        }
    }
}

/// Access level carried by a verified session token, used for column masking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    User,
    Admin,
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// The authenticated subject derived from a verified session token (C10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub subject_id: String,
    pub access_level: AccessLevel,
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        matches!(self.access_level, AccessLevel::Admin)
    }
}
