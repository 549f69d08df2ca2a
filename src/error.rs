// =============================================================================
// Error taxonomy — every handler terminates in a single JSON envelope
// =============================================================================
//
// Generalizes the rejection pattern `api/auth.rs` uses for bearer-token
// failures into the full taxonomy of spec §7. A handler either returns
// `Ok(Json<T>)` or `Err(AppError)`; `AppError` knows how to render itself as
// `{ "success": false, "error": ..., "details": ... }` with the right status
// code. `AppError::Internal` is the catch-all: any unhandled `anyhow::Error`
// becomes a 500 carrying the error's message string, never a stack trace.
//
// `cache_write_partial` (spec §7) has no variant here: per spec it never
// aborts a request, it's reported in-band on the tick response
// (`controller::TickOutcome::cache_write_failed_batches`), so it never
// reaches the `Err(AppError)` path a handler returns.
// =============================================================================

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// C1 fetch failed or returned empty/non-array. The tick aborts before
    /// touching any state; this variant is returned to the cron endpoint's
    /// caller, not raised mid-tick.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Some `(snapshot_date, id)` rows failed to upsert during a save.
    #[error("snapshot write partial: {0}")]
    SnapshotWritePartial(String),

    /// The IdP token/user/member exchange failed outright (network error,
    /// non-2xx from the token endpoint, etc).
    #[error("identity provider exchange failed: {0}")]
    IdpExchangeFailed(String),

    /// Authenticated, but the caller is not a member of the required guild
    /// or holds none of the required roles.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Bearer token missing, malformed, invalid signature, or expired.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Verified principal lacks the role/level the endpoint requires.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Caller-supplied request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Catch-all: any unexpected failure. Carries the originating error's
    /// message string only — never a stack trace.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::SnapshotWritePartial(_) => StatusCode::OK,
            AppError::IdpExchangeFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: String,
    details: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(error = %self, status = %status, "request failed");
        let body = ErrorEnvelope {
            success: false,
            error: error_kind(&self).to_string(),
            details: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn error_kind(err: &AppError) -> &'static str {
    match err {
        AppError::UpstreamUnavailable(_) => "upstream_unavailable",
        AppError::SnapshotWritePartial(_) => "snapshot_write_partial",
        AppError::IdpExchangeFailed(_) => "idp_exchange_failed",
        AppError::AccessDenied(_) => "access_denied",
        AppError::Unauthorized(_) => "unauthorized",
        AppError::Forbidden(_) => "forbidden",
        AppError::BadRequest(_) => "bad_request",
        AppError::Internal(_) => "internal_error",
    }
}

pub type AppResult<T> = Result<T, AppError>;
