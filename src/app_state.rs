// =============================================================================
// Central Application State — Snapshot Decision & Ingestion Subsystem
// =============================================================================
//
// The single source of truth wired at startup and shared across the axum
// router and the periodic controller task via `Arc<AppState>`. Unlike the
// teacher's purely in-memory engine, most of this system's state lives in
// Postgres; `AppState` mainly holds the collaborator handles (C1-C10) the
// controller and the read endpoints both need, plus the small amount of
// in-process bookkeeping (a version counter, in the teacher's idiom) that
// has no natural home in a database row.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::PgPool;

use crate::cache_writer::CacheWriter;
use crate::config::Config;
use crate::controller::PeriodicController;
use crate::controller_state::ControllerStateStore;
use crate::discord::client::DiscordClient;
use crate::discord::identity::IdentityExchange;
use crate::exclusions::ExclusionRegistry;
use crate::notifications::NotificationDispatcher;
use crate::session::SessionVerifier;
use crate::snapshot_writer::SnapshotWriter;
use crate::upstream::client::UpstreamClient;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, bumped on every controller
    /// tick, in the teacher's `state_version` idiom.
    pub state_version: AtomicU64,

    pub config: Config,
    pub pool: PgPool,

    pub upstream: UpstreamClient,
    pub cache: CacheWriter,
    pub snapshots: SnapshotWriter,
    pub exclusions: ExclusionRegistry,
    pub controller_state: ControllerStateStore,
    pub controller: PeriodicController,

    pub session_verifier: SessionVerifier,
    pub identity: IdentityExchange,
    pub notifications: NotificationDispatcher,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool) -> Self {
        let upstream = UpstreamClient::new(config.upstream_url.clone());
        let exclusions = ExclusionRegistry::new(pool.clone());
        let cache = CacheWriter::new(pool.clone());
        let snapshots = SnapshotWriter::new(pool.clone());
        let controller_state = ControllerStateStore::new(pool.clone());
        let notifications = NotificationDispatcher::new(
            config.resend_api_key.clone(),
            config.notification_email.clone(),
            vec![config.notification_email.clone()],
            pool.clone(),
        );

        let controller = PeriodicController::new(
            upstream.clone(),
            exclusions.clone(),
            cache.clone(),
            snapshots.clone(),
            controller_state.clone(),
            notifications.clone(),
            config.decision.clone(),
        );

        let discord = DiscordClient::new(config.discord_client_id.clone(), config.discord_client_secret.clone());
        let identity = IdentityExchange::new(
            discord,
            config.supabase_url.clone(),
            config.jwt_secret.clone(),
            config.eggjnc_guild.clone(),
            config.eggjnc_maj_role.clone(),
            config.eggjnc_yc_role.clone(),
            config.eggjnc_wonky_leader_role.clone(),
        );

        let session_verifier = SessionVerifier::new(config.jwt_secret.clone());

        Self {
            state_version: AtomicU64::new(1),
            config,
            pool,
            upstream,
            cache,
            snapshots,
            exclusions,
            controller_state,
            controller,
            session_verifier,
            identity,
            notifications,
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }
}
