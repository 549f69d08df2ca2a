// =============================================================================
// Identity Exchange — authorization code to signed session token (C9)
// =============================================================================
//
// Orchestrates the three Discord calls in `client.rs` into the single
// `exchange` operation, then mints an HS256 session JWT whose secret is
// shared with the database's policy engine. The secret never leaves this
// process boundary.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::discord::client::DiscordClient;
use crate::types::AccessLevel;

const SESSION_TTL_DAYS: i64 = 7;

#[derive(Debug, Serialize)]
struct AppMetadata {
    provider: &'static str,
    providers: [&'static str; 1],
}

#[derive(Debug, Serialize)]
struct UserMetadata {
    username: String,
    global_name: Option<String>,
    avatar: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    pub email: String,
    pub phone: String,
    pub discord_id: String,
    pub access_level: String,
    pub app_metadata: AppMetadata,
    pub user_metadata: UserMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangedIdentity {
    pub jwt: String,
    pub discord_id: String,
    pub username: String,
    pub global_name: Option<String>,
    pub avatar: Option<String>,
    pub access_level: AccessLevel,
    pub expires_at: chrono::DateTime<Utc>,
}

/// Membership requirement: thrown away as an access-denied error rather than
/// unwound as a panic, since a non-member is an expected outcome of OAuth.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("discord exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("not a member of the required guild")]
    NotAMember,
    #[error("missing required role")]
    MissingRole,
}

pub struct IdentityExchange {
    discord: DiscordClient,
    supabase_url: String,
    jwt_secret: String,
    guild_id: String,
    maj_role: String,
    yc_role: String,
    admin_role: String,
}

impl IdentityExchange {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        discord: DiscordClient,
        supabase_url: String,
        jwt_secret: String,
        guild_id: String,
        maj_role: String,
        yc_role: String,
        admin_role: String,
    ) -> Self {
        Self {
            discord,
            supabase_url,
            jwt_secret,
            guild_id,
            maj_role,
            yc_role,
            admin_role,
        }
    }

    #[instrument(skip(self, code))]
    pub async fn exchange(&self, code: &str, redirect_uri: &str) -> Result<ExchangedIdentity, IdentityError> {
        let token = self
            .discord
            .exchange_code(code, redirect_uri)
            .await
            .map_err(|e| IdentityError::ExchangeFailed(e.to_string()))?;

        let user = self
            .discord
            .current_user(&token.access_token)
            .await
            .map_err(|e| IdentityError::ExchangeFailed(e.to_string()))?;

        let member = self
            .discord
            .guild_member(&token.access_token, &self.guild_id)
            .await
            .map_err(|e| IdentityError::ExchangeFailed(e.to_string()))?
            .ok_or(IdentityError::NotAMember)?;

        let has_role = |role: &str| !role.is_empty() && member.roles.iter().any(|r| r == role);

        let is_member = has_role(&self.maj_role) || has_role(&self.yc_role);
        if !is_member {
            return Err(IdentityError::MissingRole);
        }

        let is_admin = has_role(&self.yc_role) || has_role(&self.admin_role);
        let access_level = if is_admin { AccessLevel::Admin } else { AccessLevel::User };

        let now = Utc::now();
        let expires_at = now + Duration::days(SESSION_TTL_DAYS);

        let claims = SessionClaims {
            iss: format!("{}/auth/v1", self.supabase_url),
            sub: user.id.clone(),
            aud: "authenticated".to_string(),
            role: "authenticated".to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            email: String::new(),
            phone: String::new(),
            discord_id: user.id.clone(),
            access_level: access_level.to_string(),
            app_metadata: AppMetadata {
                provider: "discord",
                providers: ["discord"],
            },
            user_metadata: UserMetadata {
                username: user.username.clone(),
                global_name: user.global_name.clone(),
                avatar: user.avatar.clone(),
            },
        };

        let jwt = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .context("failed to sign session token")
        .map_err(|e| IdentityError::ExchangeFailed(e.to_string()))?;

        if self.jwt_secret.is_empty() {
            warn!("JWT_SECRET is empty; minted tokens cannot be verified by any downstream policy engine");
        }

        Ok(ExchangedIdentity {
            jwt,
            discord_id: user.id,
            username: user.username,
            global_name: user.global_name,
            avatar: user.avatar,
            access_level,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_level_display_matches_claim_spelling() {
        assert_eq!(AccessLevel::Admin.to_string(), "admin");
        assert_eq!(AccessLevel::User.to_string(), "user");
    }
}
