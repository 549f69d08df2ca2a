// =============================================================================
// Bearer Token Authentication — Axum Extractors
// =============================================================================
//
// Two extractors drawn from the teacher's `FromRequestParts` pattern:
// - `AuthPrincipal` verifies an HS256 session token and yields the resulting
//   `Principal` (subject, access level, expiry) for C11's read endpoints.
// - `AuthAdmin` layers an access-level check on top.
// - `OperatorOrAdmin` accepts either an admin `Principal` or the preshared
//   `x-secret-token` header, for endpoints like delete-snapshot that accept
//   either credential (spec §4.11).
//
// Comparison against the preshared secret stays constant-time, carried over
// from the token-auth precedent this module generalizes.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::app_state::AppState;
use crate::types::Principal;

pub struct AuthRejection {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.message,
        });
        (self.status, axum::Json(body)).into_response()
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Extractor yielding the verified `Principal` for any valid session token.
pub struct AuthPrincipal(pub Principal);

impl FromRequestParts<Arc<AppState>> for AuthPrincipal {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| {
            warn!("missing or malformed Authorization header");
            AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                message: "missing or invalid authorization token".to_string(),
            }
        })?;

        let principal = state.session_verifier.verify(token).map_err(|e| {
            warn!(error = %e, "session token verification failed");
            AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                message: "invalid or expired session token".to_string(),
            }
        })?;

        Ok(AuthPrincipal(principal))
    }
}

/// Extractor admitting only a `Principal` with `accessLevel = admin`.
pub struct AuthAdmin(pub Principal);

impl FromRequestParts<Arc<AppState>> for AuthAdmin {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let AuthPrincipal(principal) = AuthPrincipal::from_request_parts(parts, state).await?;
        if !principal.is_admin() {
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "admin access level required".to_string(),
            });
        }
        Ok(AuthAdmin(principal))
    }
}

/// Accepts either an admin `Principal` or the operator's preshared secret
/// token via `x-secret-token`. Used by `delete-snapshot` (spec §4.11, §8 #8).
pub enum OperatorOrAdmin {
    Admin(Principal),
    Operator,
}

impl FromRequestParts<Arc<AppState>> for OperatorOrAdmin {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        if let Some(header) = parts.headers.get("x-secret-token").and_then(|v| v.to_str().ok()) {
            if !state.config.secret_token.is_empty()
                && constant_time_eq(header.as_bytes(), state.config.secret_token.as_bytes())
            {
                return Ok(OperatorOrAdmin::Operator);
            }
        }

        let AuthAdmin(principal) = AuthAdmin::from_request_parts(parts, state).await?;
        Ok(OperatorOrAdmin::Admin(principal))
    }
}

/// Validates the header pair accepted by `update-player-data` (spec §6):
/// either the external operator secret, or an internal call bearing the
/// service-role key plus `x-internal-call: true`.
pub fn validate_update_player_data_auth(parts: &Parts, state: &AppState) -> bool {
    if let Some(header) = parts.headers.get("x-secret-token").and_then(|v| v.to_str().ok()) {
        if !state.config.secret_token.is_empty()
            && constant_time_eq(header.as_bytes(), state.config.secret_token.as_bytes())
        {
            return true;
        }
    }

    let is_internal = parts
        .headers
        .get("x-internal-call")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "true")
        .unwrap_or(false);

    if !is_internal {
        return false;
    }

    match bearer_token(parts) {
        Some(token) => {
            !state.config.supabase_service_role_key.is_empty()
                && constant_time_eq(token.as_bytes(), state.config.supabase_service_role_key.as_bytes())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_identical() {
        assert!(constant_time_eq(b"hello", b"hello"));
    }

    #[test]
    fn constant_time_eq_different() {
        assert!(!constant_time_eq(b"hello", b"world"));
    }

    #[test]
    fn constant_time_eq_different_lengths() {
        assert!(!constant_time_eq(b"short", b"longer_string"));
    }

    #[test]
    fn constant_time_eq_empty() {
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn constant_time_eq_single_bit_diff() {
        assert!(!constant_time_eq(b"\x00", b"\x01"));
    }
}
