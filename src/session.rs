// =============================================================================
// Session Verification — HS256 bearer token to Principal (C10)
// =============================================================================
//
// Verifies the same claim set `discord/identity.rs` mints. Used by the
// `AuthBearer`-style extractor in `api/auth.rs` and directly by any
// administrative handler that accepts an operator secret as an alternative.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::types::{AccessLevel, Principal};

#[derive(Debug, Deserialize)]
struct VerifiedClaims {
    sub: String,
    exp: i64,
    discord_id: String,
    access_level: String,
}

pub struct SessionVerifier {
    jwt_secret: String,
}

impl SessionVerifier {
    pub fn new(jwt_secret: String) -> Self {
        Self { jwt_secret }
    }

    pub fn verify(&self, bearer_token: &str) -> Result<Principal> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["authenticated"]);

        let data = decode::<VerifiedClaims>(
            bearer_token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .context("session token signature or claims invalid")?;

        let expires_at = expiry_from_timestamp(data.claims.exp)?;
        if expires_at < Utc::now() {
            anyhow::bail!("session token expired");
        }

        let access_level = match data.claims.access_level.as_str() {
            "admin" => AccessLevel::Admin,
            _ => AccessLevel::User,
        };

        Ok(Principal {
            subject_id: if data.claims.discord_id.is_empty() {
                data.claims.sub
            } else {
                data.claims.discord_id
            },
            access_level,
            expires_at,
        })
    }
}

fn expiry_from_timestamp(exp: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(exp, 0)
        .single()
        .context("session token carried an unrepresentable exp claim")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        iss: String,
        sub: String,
        aud: String,
        iat: i64,
        exp: i64,
        discord_id: String,
        access_level: String,
    }

    fn mk_token(secret: &str, access_level: &str, exp_offset: Duration) -> String {
        let now = Utc::now();
        let claims = TestClaims {
            iss: "https://example.supabase.co/auth/v1".into(),
            sub: "123".into(),
            aud: "authenticated".into(),
            iat: now.timestamp(),
            exp: (now + exp_offset).timestamp(),
            discord_id: "123".into(),
            access_level: access_level.into(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn verify_accepts_valid_token() {
        let token = mk_token("topsecret", "admin", Duration::days(1));
        let verifier = SessionVerifier::new("topsecret".into());
        let principal = verifier.verify(&token).unwrap();
        assert!(principal.is_admin());
        assert_eq!(principal.subject_id, "123");
    }

    #[test]
    fn verify_rejects_expired_token() {
        let token = mk_token("topsecret", "user", Duration::days(-1));
        let verifier = SessionVerifier::new("topsecret".into());
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let token = mk_token("topsecret", "user", Duration::days(1));
        let verifier = SessionVerifier::new("othersecret".into());
        assert!(verifier.verify(&token).is_err());
    }
}
