// =============================================================================
// Environment Configuration — loaded once at startup
// =============================================================================
//
// Every tunable this service needs lives here, sourced from the environment
// variables spec'd in the controller endpoint contracts. All fields carry a
// sensible default so a developer can run the binary against a half-filled
// `.env` and get a working (if unauthenticated) read path. Secrets are never
// logged.
// =============================================================================

use anyhow::{Context, Result};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f64_or(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32_or(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Tunables for the Snapshot Decision Engine (spec §4.3). Configurable so
/// tests can exercise edge cases without waiting on real clocks.
#[derive(Debug, Clone)]
pub struct DecisionConstants {
    pub sync_window_hours: f64,
    pub cooldown_hours: f64,
    pub partial_sync_threshold: f64,
    pub partial_sync_retry_attempts: i64,
    pub cron_interval_minutes: u32,
    pub pending_sync_stale_hours: f64,
    pub alert_threshold_days: f64,
    pub alert_cooldown_hours: f64,
    pub cache_duration_minutes: i64,
}

impl Default for DecisionConstants {
    fn default() -> Self {
        Self {
            sync_window_hours: 65.0 / 60.0,
            cooldown_hours: 1.5,
            partial_sync_threshold: 99.0,
            partial_sync_retry_attempts: 2,
            cron_interval_minutes: 15,
            pending_sync_stale_hours: 2.0,
            alert_threshold_days: 7.0,
            alert_cooldown_hours: 2.0,
            cache_duration_minutes: 15,
        }
    }
}

/// Top-level service configuration, sourced from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub supabase_url: String,
    pub supabase_service_role_key: String,
    pub jwt_secret: String,
    pub discord_client_id: String,
    pub discord_client_secret: String,
    pub eggjnc_guild: String,
    pub eggjnc_maj_role: String,
    pub eggjnc_yc_role: String,
    pub eggjnc_wonky_leader_role: String,
    pub wonky_endpoint_url: String,
    pub secret_token: String,
    pub resend_api_key: String,
    pub notification_email: String,
    pub upstream_url: String,
    pub bind_addr: String,
    pub decision: DecisionConstants,
}

impl Config {
    /// Load configuration from the process environment. Missing non-secret
    /// values fall back to a development-friendly default; missing secrets
    /// are left empty (downstream calls relying on them fail loudly at the
    /// point of use rather than at startup, matching the teacher's
    /// `AURORA_ADMIN_TOKEN` pattern in `api/auth.rs`).
    pub fn from_env() -> Result<Self> {
        let supabase_url = std::env::var("SUPABASE_URL")
            .context("SUPABASE_URL must be set (Postgres connection target)")?;

        Ok(Self {
            supabase_url,
            supabase_service_role_key: env_or("SUPABASE_SERVICE_ROLE_KEY", ""),
            jwt_secret: env_or("JWT_SECRET", ""),
            discord_client_id: env_or("DISCORD_CLIENT_ID", ""),
            discord_client_secret: env_or("DISCORD_CLIENT_SECRET", ""),
            eggjnc_guild: env_or("EGGINC_GUILD", ""),
            eggjnc_maj_role: env_or("EGGINC_MAJ_ROLE", ""),
            eggjnc_yc_role: env_or("EGGINC_YC_ROLE", ""),
            eggjnc_wonky_leader_role: env_or("EGGINC_WONKY_LEADER_ROLE", ""),
            wonky_endpoint_url: env_or("WONKY_ENDPOINT_URL", ""),
            secret_token: env_or("SECRET_TOKEN", ""),
            resend_api_key: env_or("RESEND_API_KEY", ""),
            notification_email: env_or("NOTIFICATION_EMAIL", ""),
            upstream_url: env_or("UPSTREAM_URL", "https://example.invalid/players"),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:3000"),
            decision: DecisionConstants {
                sync_window_hours: env_f64_or("SYNC_WINDOW_HOURS", DecisionConstants::default().sync_window_hours),
                cooldown_hours: env_f64_or("COOLDOWN_HOURS", DecisionConstants::default().cooldown_hours),
                partial_sync_threshold: env_f64_or(
                    "PARTIAL_SYNC_THRESHOLD",
                    DecisionConstants::default().partial_sync_threshold,
                ),
                partial_sync_retry_attempts: env_u32_or(
                    "PARTIAL_SYNC_RETRY_ATTEMPTS",
                    DecisionConstants::default().partial_sync_retry_attempts as u32,
                ) as i64,
                cron_interval_minutes: env_u32_or(
                    "CRON_INTERVAL_MINUTES",
                    DecisionConstants::default().cron_interval_minutes,
                ),
                pending_sync_stale_hours: env_f64_or(
                    "PENDING_SYNC_STALE_HOURS",
                    DecisionConstants::default().pending_sync_stale_hours,
                ),
                alert_threshold_days: env_f64_or(
                    "ALERT_THRESHOLD_DAYS",
                    DecisionConstants::default().alert_threshold_days,
                ),
                alert_cooldown_hours: env_f64_or(
                    "ALERT_COOLDOWN_HOURS",
                    DecisionConstants::default().alert_cooldown_hours,
                ),
                cache_duration_minutes: env_u32_or("CACHE_DURATION_MINUTES", 15) as i64,
            },
        })
    }
}
