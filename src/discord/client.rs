// =============================================================================
// Discord IdP HTTP Client — token exchange, current user, guild membership
// =============================================================================
//
// Same build-once-reuse `reqwest::Client` shape as `upstream/client.rs`. Three
// calls, all straight HTTP against Discord's documented REST surface; nothing
// here is signed or streamed, unlike the Binance client it's descended from.
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::instrument;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Clone)]
pub struct DiscordClient {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: Option<String>,
    pub scope: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    pub discriminator: Option<String>,
    pub global_name: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildMember {
    #[serde(default)]
    pub roles: Vec<String>,
    pub nick: Option<String>,
}

#[derive(Serialize)]
struct TokenExchangeForm<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

impl DiscordClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            client_id,
            client_secret,
        }
    }

    #[instrument(skip(self, code, redirect_uri))]
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
        let form = TokenExchangeForm {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            grant_type: "authorization_code",
            code,
            redirect_uri,
        };

        let resp = self
            .client
            .post(format!("{DISCORD_API_BASE}/oauth2/token"))
            .form(&form)
            .send()
            .await
            .context("token exchange request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("token exchange returned non-2xx status {status}");
        }

        resp.json().await.context("token exchange response was not valid JSON")
    }

    #[instrument(skip(self, access_token))]
    pub async fn current_user(&self, access_token: &str) -> Result<DiscordUser> {
        let resp = self
            .client
            .get(format!("{DISCORD_API_BASE}/users/@me"))
            .bearer_auth(access_token)
            .send()
            .await
            .context("current-user request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("current-user returned non-2xx status {status}");
        }

        resp.json().await.context("current-user response was not valid JSON")
    }

    /// Returns `None` when Discord reports the caller is not a member of the
    /// guild (404), which is a well-formed outcome, not a failure.
    #[instrument(skip(self, access_token))]
    pub async fn guild_member(&self, access_token: &str, guild_id: &str) -> Result<Option<GuildMember>> {
        let resp = self
            .client
            .get(format!("{DISCORD_API_BASE}/users/@me/guilds/{guild_id}/member"))
            .bearer_auth(access_token)
            .send()
            .await
            .context("guild-member request failed")?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("guild-member returned non-2xx status {status}");
        }

        let member: GuildMember = resp.json().await.context("guild-member response was not valid JSON")?;
        Ok(Some(member))
    }
}
