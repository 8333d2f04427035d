//! Environment-driven configuration
//!
//! Everything the bot and the web server need is read once at startup into
//! [`AppConfig`]. Missing required values are collected and reported together
//! so a misconfigured deployment fails with one clear diagnostic.

use base64::Engine;
use poise::serenity_prelude::{GuildId, RoleId};
use std::path::PathBuf;

use crate::error::{BotError, Result};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
pub const DEFAULT_AUTHORIZE_URL: &str = "https://discord.com/oauth2/authorize";
pub const DEFAULT_SCOPE: &str = "identify guilds.join";
pub const DEFAULT_PORT: u16 = 10000;

/// TLS certificate pair for serving HTTPS directly
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Clone)]
pub struct AppConfig {
    pub bot_token: String,
    pub client_id: String,
    pub client_secret: String,
    /// Must match a redirect registered in the Developer Portal exactly
    pub redirect_uri: String,
    /// Public base URL used to build links posted by the bot
    pub base_url: String,
    pub guild_id: GuildId,
    pub role_id: RoleId,
    pub admin_password: String,
    pub port: u16,
    pub backup_guild_id: Option<GuildId>,
    pub backup_role_id: Option<RoleId>,
    pub oauth_scope: String,
    pub api_base: String,
    pub authorize_url: String,
    pub ledger_path: Option<PathBuf>,
    pub tls: Option<TlsPaths>,
}

// Secrets stay out of debug output and therefore out of the logs.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("base_url", &self.base_url)
            .field("guild_id", &self.guild_id)
            .field("role_id", &self.role_id)
            .field("port", &self.port)
            .field("backup_guild_id", &self.backup_guild_id)
            .field("backup_role_id", &self.backup_role_id)
            .field("oauth_scope", &self.oauth_scope)
            .field("api_base", &self.api_base)
            .field("ledger_path", &self.ledger_path)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut missing = Vec::new();

        let bot_token = get("DISCORD_TOKEN").or_else(|| get("DISCORD_BOT_TOKEN"));
        if bot_token.is_none() {
            missing.push("DISCORD_TOKEN".to_string());
        }

        let mut require = |key: &str| {
            let value = get(key);
            if value.is_none() {
                missing.push(key.to_string());
            }
            value
        };

        let client_id = require("DISCORD_CLIENT_ID");
        let client_secret = require("DISCORD_CLIENT_SECRET");
        let guild_id = require("DISCORD_GUILD_ID");
        let role_id = require("VERIFIED_ROLE_ID");
        let admin_password = require("ADMIN_PASSWORD");

        let base_url = get("WEB_BASE_URL").map(|u| u.trim_end_matches('/').to_string());
        let redirect_uri = get("OAUTH_REDIRECT_URI")
            .or_else(|| base_url.as_ref().map(|b| format!("{}/oauth/callback", b)));
        if redirect_uri.is_none() {
            missing.push("OAUTH_REDIRECT_URI or WEB_BASE_URL".to_string());
        }

        if !missing.is_empty() {
            return Err(BotError::ConfigMissing { names: missing });
        }

        // All required values are present past this point.
        let (
            Some(bot_token),
            Some(client_id),
            Some(client_secret),
            Some(guild_id),
            Some(role_id),
            Some(admin_password),
            Some(redirect_uri),
        ) = (
            bot_token,
            client_id,
            client_secret,
            guild_id,
            role_id,
            admin_password,
            redirect_uri,
        )
        else {
            return Err(BotError::Internal {
                message: "config validation out of sync".to_string(),
            });
        };

        let base_url = match base_url {
            Some(url) => url,
            None => origin_of(&redirect_uri),
        };

        let port = match get("PORT") {
            Some(p) => p.parse::<u16>().map_err(|_| BotError::ConfigValidation {
                message: format!("PORT must be a port number, got '{}'", p),
            })?,
            None => DEFAULT_PORT,
        };

        let tls = match (get("TLS_CERT_PATH"), get("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => {
                return Err(BotError::ConfigValidation {
                    message: "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
                })
            }
        };

        Ok(Self {
            bot_token,
            client_id,
            client_secret,
            redirect_uri,
            base_url,
            guild_id: GuildId::new(snowflake_setting("DISCORD_GUILD_ID", &guild_id)?),
            role_id: RoleId::new(snowflake_setting("VERIFIED_ROLE_ID", &role_id)?),
            admin_password,
            port,
            backup_guild_id: get("BACKUP_GUILD_ID")
                .map(|v| snowflake_setting("BACKUP_GUILD_ID", &v).map(GuildId::new))
                .transpose()?,
            backup_role_id: get("BACKUP_ROLE_ID")
                .map(|v| snowflake_setting("BACKUP_ROLE_ID", &v).map(RoleId::new))
                .transpose()?,
            oauth_scope: get("OAUTH_SCOPE").unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
            api_base: get("DISCORD_API_BASE")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            authorize_url: get("DISCORD_AUTHORIZE_URL")
                .unwrap_or_else(|| DEFAULT_AUTHORIZE_URL.to_string()),
            ledger_path: get("LEDGER_PATH").map(PathBuf::from),
            tls,
        })
    }

    /// Whether the configured scope lets the bot add users to guilds
    pub fn can_join_guilds(&self) -> bool {
        self.oauth_scope.split_whitespace().any(|s| s == "guilds.join")
    }

    /// Link the bot hands out for a given Discord user
    pub fn verify_link(&self, user_id: Option<&str>) -> String {
        match user_id {
            Some(id) => format!("{}/verify?user_id={}", self.base_url, urlencoding::encode(id)),
            None => format!("{}/verify", self.base_url),
        }
    }
}

/// Parse a Discord snowflake. Zero is rejected because Discord never issues it.
pub fn parse_snowflake(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().filter(|v| *v != 0)
}

fn snowflake_setting(name: &str, value: &str) -> Result<u64> {
    parse_snowflake(value).ok_or_else(|| BotError::ConfigValidation {
        message: format!("{} must be a Discord ID, got '{}'", name, value),
    })
}

/// `https://host:port/path` -> `https://host:port`
fn origin_of(url: &str) -> String {
    match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            match rest.find('/') {
                Some(path_start) => url[..scheme_end + 3 + path_start].to_string(),
                None => url.to_string(),
            }
        }
        None => url.trim_end_matches('/').to_string(),
    }
}

/// Recover the application ID embedded in a bot token (first segment, base64)
pub fn application_id_from_token(token: &str) -> Option<String> {
    let segment = token.split('.').next()?;
    let decoded = base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(segment)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(segment))
        .ok()?;
    let id = String::from_utf8(decoded).ok()?;
    parse_snowflake(&id).map(|_| id)
}
