//! Replays verification into the backup guild

use poise::serenity_prelude::{GuildId, RoleId, UserId};
use tracing::{info, warn};

use super::guild_joiner::{GuildJoiner, JoinOutcome};
use crate::config::parse_snowflake;
use crate::discord::{DiscordClient, Invite};
use crate::error::{BotError, Result};
use crate::state::SharedLedger;

/// Invites handed out by the admin panel expire after a day
const INVITE_MAX_AGE_SECS: u32 = 86_400;

/// Outcome of replaying the whole ledger into one guild
#[derive(Debug, Clone)]
pub struct ReplicationReport {
    pub guild_id: GuildId,
    pub succeeded: Vec<String>,
    /// (user ID, reason)
    pub failed: Vec<(String, String)>,
}

impl ReplicationReport {
    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

pub struct BackupManager {
    discord: DiscordClient,
    joiner: GuildJoiner,
    ledger: SharedLedger,
    backup_role: Option<RoleId>,
}

impl BackupManager {
    pub fn new(discord: DiscordClient, ledger: SharedLedger, backup_role: Option<RoleId>) -> Self {
        Self {
            joiner: GuildJoiner::new(discord.clone()),
            discord,
            ledger,
            backup_role,
        }
    }

    /// An explicit guild ID from the admin form, else the stored backup guild
    pub async fn resolve_guild(&self, requested: Option<&str>) -> Result<GuildId> {
        match requested.map(str::trim).filter(|g| !g.is_empty()) {
            Some(raw) => parse_snowflake(raw)
                .map(GuildId::new)
                .ok_or_else(|| BotError::InvalidSnowflake {
                    value: raw.to_string(),
                }),
            None => self
                .ledger
                .backup_guild()
                .await
                .ok_or_else(|| BotError::ConfigValidation {
                    message: "No backup guild set. Save one on the dashboard first.".to_string(),
                }),
        }
    }

    /// Add one verified user to `guild_id` with their stored token
    pub async fn replicate_user(&self, guild_id: GuildId, user_id: &str) -> Result<JoinOutcome> {
        let user = self
            .ledger
            .get(user_id.trim())
            .await
            .ok_or_else(|| BotError::UnknownUser {
                user_id: user_id.trim().to_string(),
            })?;
        let id = parse_snowflake(&user.discord_id).ok_or_else(|| BotError::InvalidSnowflake {
            value: user.discord_id.clone(),
        })?;

        self.joiner
            .join(
                guild_id,
                UserId::new(id),
                self.backup_role,
                user.access_token.as_deref(),
            )
            .await
    }

    /// Add every verified user to `guild_id`. Individual failures are collected, not raised.
    pub async fn replicate_all(&self, guild_id: GuildId) -> Result<ReplicationReport> {
        // A hierarchy problem would fail every user the same way, so check once
        if let Some(role_id) = self.backup_role {
            self.joiner.check_role_hierarchy(guild_id, role_id).await?;
        }

        let users = self.ledger.list_all().await;
        info!("Replicating {} verified users to guild {}", users.len(), guild_id);

        let mut report = ReplicationReport {
            guild_id,
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        for user in users {
            let Some(id) = parse_snowflake(&user.discord_id) else {
                report
                    .failed
                    .push((user.discord_id.clone(), "invalid Discord ID".to_string()));
                continue;
            };

            match self
                .joiner
                .join_prechecked(
                    guild_id,
                    UserId::new(id),
                    self.backup_role,
                    user.access_token.as_deref(),
                )
                .await
            {
                Ok(outcome) => {
                    info!("{} -> guild {}: {}", user.discord_id, guild_id, outcome.describe());
                    report.succeeded.push(user.discord_id);
                }
                Err(e) => {
                    warn!("Failed to add {} to guild {}: {}", user.discord_id, guild_id, e);
                    report.failed.push((user.discord_id, e.to_string()));
                }
            }
        }

        info!(
            "Backup replication to {} finished: {} succeeded, {} failed",
            guild_id,
            report.succeeded_count(),
            report.failed_count()
        );
        Ok(report)
    }

    /// Create an invite on the first text channel of `guild_id`, for users whose token expired
    pub async fn create_invite(&self, guild_id: GuildId) -> Result<Invite> {
        let mut channels = self.discord.guild_channels(guild_id).await?;
        channels.retain(|c| c.is_text());
        channels.sort_by_key(|c| c.position.unwrap_or(i64::MAX));

        let channel = channels.first().ok_or_else(|| BotError::ConfigValidation {
            message: format!("Guild {} has no text channel to create an invite on", guild_id),
        })?;

        let invite = self
            .discord
            .create_invite(&channel.id, INVITE_MAX_AGE_SECS)
            .await?;
        info!(
            "Created invite {} for guild {} on channel {}",
            invite.code, guild_id, channel.id
        );
        Ok(invite)
    }
}
