use poise::serenity_prelude::{GuildId, RoleId, UserId};
use tracing::{debug, info, warn};

use crate::discord::{AddMemberOutcome, DiscordClient};
use crate::error::{BotError, Result};

/// What a join attempt changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The user was added to the guild (with the role, if one was requested)
    Joined,
    /// The user was already a member and received the role
    RoleGranted,
    /// Nothing to do: already a member holding the role
    AlreadyComplete,
}

impl JoinOutcome {
    pub fn describe(&self) -> &'static str {
        match self {
            JoinOutcome::Joined => "Added to server",
            JoinOutcome::RoleGranted => "Role assigned",
            JoinOutcome::AlreadyComplete => "Already a member with the role",
        }
    }
}

/// Result of comparing the bot's highest role with a role it should grant
#[derive(Debug, Clone)]
pub struct HierarchyCheck {
    pub role_name: String,
    pub role_position: i64,
    pub bot_position: i64,
    pub bot_role_name: Option<String>,
}

/// Adds users to guilds and grants roles with the bot credential
#[derive(Clone)]
pub struct GuildJoiner {
    discord: DiscordClient,
}

impl GuildJoiner {
    pub fn new(discord: DiscordClient) -> Self {
        Self { discord }
    }

    /// Make sure the bot's highest role sits above `role_id`, otherwise Discord rejects the grant
    pub async fn check_role_hierarchy(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
    ) -> Result<HierarchyCheck> {
        let roles = self.discord.guild_roles(guild_id).await?;
        let wanted = role_id.to_string();
        let target = roles
            .iter()
            .find(|r| r.id == wanted)
            .ok_or_else(|| BotError::RoleNotFound {
                guild_id: guild_id.to_string(),
                role_id: wanted.clone(),
            })?;

        let bot_id = self.discord.bot_user_id().await?;
        let bot_member = self
            .discord
            .get_member(guild_id, bot_id)
            .await?
            .ok_or_else(|| BotError::PermissionDenied {
                message: format!("The bot is not a member of guild {}", guild_id),
            })?;

        // @everyone sits at position 0 and is implicit for every member
        let mut bot_position = 0;
        let mut bot_role_name = None;
        for role in roles.iter().filter(|r| bot_member.roles.contains(&r.id)) {
            if role.position > bot_position {
                bot_position = role.position;
                bot_role_name = Some(role.name.clone());
            }
        }

        let check = HierarchyCheck {
            role_name: target.name.clone(),
            role_position: target.position,
            bot_position,
            bot_role_name,
        };

        if check.bot_position <= check.role_position {
            warn!(
                "Bot role {:?} (position {}) is not above '{}' (position {}) in guild {}",
                check.bot_role_name, check.bot_position, check.role_name, check.role_position, guild_id
            );
            return Err(BotError::RoleHierarchy {
                role_name: check.role_name,
                bot_position: check.bot_position,
                role_position: check.role_position,
            });
        }

        debug!(
            "Role hierarchy ok in guild {}: bot {} > '{}' {}",
            guild_id, check.bot_position, check.role_name, check.role_position
        );
        Ok(check)
    }

    /// Ensure `user_id` is in `guild_id` and holds `role_id`.
    ///
    /// Safe to repeat: a member that already holds the role yields `AlreadyComplete`.
    pub async fn join(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: Option<RoleId>,
        access_token: Option<&str>,
    ) -> Result<JoinOutcome> {
        if let Some(role_id) = role_id {
            self.check_role_hierarchy(guild_id, role_id).await?;
        }
        self.join_prechecked(guild_id, user_id, role_id, access_token)
            .await
    }

    /// [`GuildJoiner::join`] without the hierarchy check, for callers that ran it once up front
    pub async fn join_prechecked(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: Option<RoleId>,
        access_token: Option<&str>,
    ) -> Result<JoinOutcome> {
        match self.discord.get_member(guild_id, user_id).await? {
            Some(member) => match role_id {
                Some(role_id) if !member.has_role(role_id) => {
                    self.discord
                        .add_member_role(guild_id, user_id, role_id)
                        .await?;
                    info!("Granted role {} to {} in guild {}", role_id, user_id, guild_id);
                    Ok(JoinOutcome::RoleGranted)
                }
                _ => {
                    debug!("{} already complete in guild {}", user_id, guild_id);
                    Ok(JoinOutcome::AlreadyComplete)
                }
            },
            None => {
                let access_token = access_token.ok_or_else(|| BotError::NotAMember {
                    guild_id: guild_id.to_string(),
                    user_id: user_id.to_string(),
                })?;
                let roles: Vec<RoleId> = role_id.into_iter().collect();

                match self
                    .discord
                    .add_member(guild_id, user_id, access_token, &roles)
                    .await?
                {
                    AddMemberOutcome::Added(_) => {
                        info!("Added {} to guild {}", user_id, guild_id);
                        Ok(JoinOutcome::Joined)
                    }
                    // Joined between our lookup and the PUT; roles in the PUT were ignored
                    AddMemberOutcome::AlreadyMember => match role_id {
                        Some(role_id) => {
                            self.discord
                                .add_member_role(guild_id, user_id, role_id)
                                .await?;
                            Ok(JoinOutcome::RoleGranted)
                        }
                        None => Ok(JoinOutcome::AlreadyComplete),
                    },
                }
            }
        }
    }
}
