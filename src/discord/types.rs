use poise::serenity_prelude::RoleId;
use serde::Deserialize;

/// Discord user info from /users/@me
#[derive(Deserialize, Debug, Clone)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
}

impl DiscordUser {
    /// Get the display name (global_name, then username#discriminator, then username)
    pub fn display_name(&self) -> String {
        if let Some(name) = self.global_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        match self.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct MemberUser {
    pub id: String,
}

/// A guild member as returned by GET /guilds/{guild}/members/{user}
#[derive(Deserialize, Debug, Clone)]
pub struct GuildMember {
    #[serde(default)]
    pub user: Option<MemberUser>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub nick: Option<String>,
}

impl GuildMember {
    pub fn has_role(&self, role_id: RoleId) -> bool {
        let wanted = role_id.to_string();
        self.roles.iter().any(|r| *r == wanted)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct GuildRole {
    pub id: String,
    pub name: String,
    pub position: i64,
    #[serde(default)]
    pub managed: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GuildChannel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
}

impl GuildChannel {
    pub const GUILD_TEXT: u8 = 0;

    pub fn is_text(&self) -> bool {
        self.kind == Self::GUILD_TEXT
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Invite {
    pub code: String,
}

impl Invite {
    pub fn url(&self) -> String {
        format!("https://discord.gg/{}", self.code)
    }
}

/// Error body Discord sends with non-success responses
#[derive(Deserialize, Debug, Default)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<u64>,
    #[serde(default)]
    pub retry_after: Option<f64>,
}
