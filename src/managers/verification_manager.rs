use poise::serenity_prelude::UserId;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::guild_joiner::{GuildJoiner, JoinOutcome};
use crate::config::{parse_snowflake, AppConfig};
use crate::discord::DiscordClient;
use crate::error::BotError;
use crate::state::{SharedLedger, VerifiedUser};

/// Query parameters Discord sends to the OAuth callback
#[derive(Deserialize, Debug, Default, Clone)]
pub struct CallbackRequest {
    #[serde(default)]
    pub code: Option<String>,
    /// Round-trips the Discord user ID the verify link was issued for
    #[serde(default)]
    pub state: Option<String>,
    /// Set instead of `code` when the user cancels on Discord's consent screen
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Progress of one verification attempt. Failure at any stage is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStage {
    AwaitingCode,
    TokenExchanged,
    IdentityFetched,
    GuildJoined,
    Recorded,
}

impl std::fmt::Display for VerificationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VerificationStage::AwaitingCode => "awaiting code",
            VerificationStage::TokenExchanged => "token exchanged",
            VerificationStage::IdentityFetched => "identity fetched",
            VerificationStage::GuildJoined => "guild joined",
            VerificationStage::Recorded => "recorded",
        };
        f.write_str(name)
    }
}

/// Terminal failure of an attempt, with the last stage it reached
#[derive(Debug, Error)]
#[error("verification failed at stage '{stage}': {error}")]
pub struct VerificationFailure {
    pub stage: VerificationStage,
    #[source]
    pub error: BotError,
}

#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub user: VerifiedUser,
    pub join: JoinOutcome,
}

struct Attempt {
    stage: VerificationStage,
}

impl Attempt {
    fn new() -> Self {
        Self {
            stage: VerificationStage::AwaitingCode,
        }
    }

    fn advance(&mut self, next: VerificationStage) {
        debug!("Verification stage: {} -> {}", self.stage, next);
        self.stage = next;
    }

    fn fail(&self, error: BotError) -> VerificationFailure {
        warn!("Verification failed at stage '{}': {}", self.stage, error);
        VerificationFailure {
            stage: self.stage,
            error,
        }
    }
}

/// Drives the callback: code -> token -> identity -> guild join -> ledger
pub struct VerificationManager {
    config: Arc<AppConfig>,
    discord: DiscordClient,
    joiner: GuildJoiner,
    ledger: SharedLedger,
}

impl VerificationManager {
    pub fn new(config: Arc<AppConfig>, discord: DiscordClient, ledger: SharedLedger) -> Self {
        let joiner = GuildJoiner::new(discord.clone());
        Self {
            config,
            discord,
            joiner,
            ledger,
        }
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    /// Run one verification attempt to completion or terminal failure. Nothing is retried.
    pub async fn complete(
        &self,
        request: &CallbackRequest,
    ) -> Result<VerificationOutcome, VerificationFailure> {
        let mut attempt = Attempt::new();

        if let Some(error) = request.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(attempt.fail(BotError::AuthorizationDenied {
                error: error.to_string(),
                description: request.error_description.clone(),
            }));
        }

        let code = match request.code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => code,
            None => return Err(attempt.fail(BotError::MissingCode)),
        };

        let token = self
            .discord
            .exchange_code(
                code,
                &self.config.client_id,
                &self.config.client_secret,
                &self.config.redirect_uri,
                &self.config.oauth_scope,
            )
            .await
            .map_err(|e| attempt.fail(e))?;
        attempt.advance(VerificationStage::TokenExchanged);

        let user = self
            .discord
            .fetch_identity(&token)
            .await
            .map_err(|e| attempt.fail(e))?;
        let user_id = parse_snowflake(&user.id).map(UserId::new).ok_or_else(|| {
            attempt.fail(BotError::Identity {
                message: format!("Discord returned an invalid user ID '{}'", user.id),
            })
        })?;
        attempt.advance(VerificationStage::IdentityFetched);

        if let Some(expected) = request.state.as_deref().and_then(parse_snowflake) {
            if expected != user_id.get() {
                return Err(attempt.fail(BotError::StateMismatch {
                    expected: expected.to_string(),
                    actual: user.id.clone(),
                }));
            }
        }

        // Without guilds.join the token cannot add the user, only an existing member can verify
        let join_token = if token.scope.is_none() || token.has_scope("guilds.join") {
            Some(token.access_token.as_str())
        } else {
            None
        };

        let join = self
            .joiner
            .join(
                self.config.guild_id,
                user_id,
                Some(self.config.role_id),
                join_token,
            )
            .await
            .map_err(|e| attempt.fail(e))?;
        attempt.advance(VerificationStage::GuildJoined);

        let verified = VerifiedUser::new(
            user.id.clone(),
            user.display_name(),
            Some(token.access_token.clone()),
        );
        self.ledger
            .upsert(verified.clone())
            .await
            .map_err(|e| attempt.fail(e))?;
        attempt.advance(VerificationStage::Recorded);

        info!(
            "User {} verified as '{}' ({})",
            verified.discord_id,
            verified.display_name,
            join.describe()
        );

        Ok(VerificationOutcome {
            user: verified,
            join,
        })
    }
}
