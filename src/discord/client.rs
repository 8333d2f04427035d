use poise::serenity_prelude::{GuildId, RoleId, UserId};
use reqwest::{Response, StatusCode};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::types::{ApiErrorBody, DiscordUser, GuildChannel, GuildMember, GuildRole, Invite};
use crate::config::{parse_snowflake, AppConfig};
use crate::error::{BotError, Result};

/// Discord JSON error code for missing permissions
const MISSING_PERMISSIONS: u64 = 50013;

/// Result of PUT /guilds/{guild}/members/{user}
#[derive(Debug)]
pub enum AddMemberOutcome {
    /// 201: the user was added (with any roles in the request)
    Added(GuildMember),
    /// 204: the user was already a member; roles in the request were ignored
    AlreadyMember,
}

/// REST client authorized with the bot token
#[derive(Clone)]
pub struct DiscordClient {
    pub(super) http: reqwest::Client,
    pub(super) api_base: String,
    bot_token: String,
    bot_user_id: Arc<OnceCell<UserId>>,
}

impl DiscordClient {
    pub fn new(api_base: impl Into<String>, bot_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            bot_user_id: Arc::new(OnceCell::new()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.api_base.clone(), config.bot_token.clone())
    }

    pub(super) fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn bot_auth(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    /// The bot's own user ID, fetched once per process
    pub async fn bot_user_id(&self) -> Result<UserId> {
        let id = self
            .bot_user_id
            .get_or_try_init(|| async {
                let response = self
                    .http
                    .get(self.url("/users/@me"))
                    .header("Authorization", self.bot_auth())
                    .send()
                    .await?;
                let user: DiscordUser = ensure_success(response).await?.json().await?;
                let id = parse_snowflake(&user.id).ok_or(BotError::InvalidSnowflake {
                    value: user.id.clone(),
                })?;
                debug!("Bot user is {} ({})", user.username, id);
                Ok::<_, BotError>(UserId::new(id))
            })
            .await?;
        Ok(*id)
    }

    /// Fetch a guild member, `None` if the user is not in the guild
    pub async fn get_member(&self, guild_id: GuildId, user_id: UserId) -> Result<Option<GuildMember>> {
        let response = self
            .http
            .get(self.url(&format!("/guilds/{}/members/{}", guild_id, user_id)))
            .header("Authorization", self.bot_auth())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("User {} is not a member of guild {}", user_id, guild_id);
            return Ok(None);
        }

        let member = ensure_success(response).await?.json().await?;
        Ok(Some(member))
    }

    /// Add a user to a guild with their OAuth access token (requires `guilds.join`)
    pub async fn add_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        access_token: &str,
        roles: &[RoleId],
    ) -> Result<AddMemberOutcome> {
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        let response = self
            .http
            .put(self.url(&format!("/guilds/{}/members/{}", guild_id, user_id)))
            .header("Authorization", self.bot_auth())
            .json(&serde_json::json!({
                "access_token": access_token,
                "roles": roles,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(AddMemberOutcome::AlreadyMember);
        }

        let member = ensure_success(response).await?.json().await?;
        Ok(AddMemberOutcome::Added(member))
    }

    /// Grant a role to an existing member (no-op on Discord's side if already held)
    pub async fn add_member_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<()> {
        let response = self
            .http
            .put(self.url(&format!(
                "/guilds/{}/members/{}/roles/{}",
                guild_id, user_id, role_id
            )))
            .header("Authorization", self.bot_auth())
            .header("X-Audit-Log-Reason", "Verified via OAuth")
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    pub async fn guild_roles(&self, guild_id: GuildId) -> Result<Vec<GuildRole>> {
        let response = self
            .http
            .get(self.url(&format!("/guilds/{}/roles", guild_id)))
            .header("Authorization", self.bot_auth())
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    pub async fn guild_channels(&self, guild_id: GuildId) -> Result<Vec<GuildChannel>> {
        let response = self
            .http
            .get(self.url(&format!("/guilds/{}/channels", guild_id)))
            .header("Authorization", self.bot_auth())
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    /// Create a multi-use invite on a channel
    pub async fn create_invite(&self, channel_id: &str, max_age_secs: u32) -> Result<Invite> {
        let response = self
            .http
            .post(self.url(&format!("/channels/{}/invites", channel_id)))
            .header("Authorization", self.bot_auth())
            .json(&serde_json::json!({
                "max_age": max_age_secs,
                "max_uses": 0,
                "unique": true,
            }))
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}

/// Pass successful responses through, turn everything else into a typed error
pub(super) async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!("Discord API returned {}: {}", status, body);
    Err(api_error(status.as_u16(), &body))
}

pub(crate) fn api_error(status: u16, body: &str) -> BotError {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        429 => BotError::RateLimited {
            retry_after: parsed.retry_after.unwrap_or(1.0),
        },
        403 if parsed.code == Some(MISSING_PERMISSIONS) || parsed.code.is_none() => {
            BotError::PermissionDenied {
                message: format!(
                    "{}. The bot needs Manage Roles and Create Instant Invite in the guild.",
                    message
                ),
            }
        }
        _ => BotError::Discord {
            status,
            code: parsed.code,
            message,
        },
    }
}
