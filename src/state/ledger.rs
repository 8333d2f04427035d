//! Verification ledger: who has completed verification, plus the backup guild
//!
//! Handlers only see [`LedgerStore`], so the in-memory store can be swapped for
//! the JSON-file store (or anything else) without touching call sites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use poise::serenity_prelude::GuildId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::parse_snowflake;
use crate::error::{BotError, Result};

/// A user who completed the OAuth callback at least once
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifiedUser {
    /// Discord user ID (snowflake as string)
    pub discord_id: String,

    pub display_name: String,

    /// Short-lived OAuth token, kept for backup-guild replay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    pub verified_at: DateTime<Utc>,
}

impl VerifiedUser {
    pub fn new(discord_id: String, display_name: String, access_token: Option<String>) -> Self {
        Self {
            discord_id,
            display_name,
            access_token,
            verified_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for VerifiedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifiedUser")
            .field("discord_id", &self.discord_id)
            .field("display_name", &self.display_name)
            .field("has_token", &self.access_token.is_some())
            .field("verified_at", &self.verified_at)
            .finish()
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert or replace the entry for `user.discord_id` (last write wins)
    async fn upsert(&self, user: VerifiedUser) -> Result<()>;

    async fn get(&self, discord_id: &str) -> Option<VerifiedUser>;

    /// Every entry, ordered by display name
    async fn list_all(&self) -> Vec<VerifiedUser>;

    async fn len(&self) -> usize;

    async fn set_backup_guild(&self, guild_id: &str) -> Result<GuildId>;

    async fn backup_guild(&self) -> Option<GuildId>;
}

pub type SharedLedger = Arc<dyn LedgerStore>;

/// Process-lifetime ledger
#[derive(Default)]
pub struct MemoryLedger {
    users: DashMap<String, VerifiedUser>,
    backup_guild: RwLock<Option<GuildId>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backup_guild(backup_guild: Option<GuildId>) -> Self {
        Self {
            users: DashMap::new(),
            backup_guild: RwLock::new(backup_guild),
        }
    }

    /// File contents as they would be with `pending` upserted and the backup guild set to `backup_guild`
    fn snapshot_with(
        &self,
        pending: Option<&VerifiedUser>,
        backup_guild: Option<GuildId>,
    ) -> LedgerFile {
        let mut users: Vec<VerifiedUser> = self
            .users
            .iter()
            .filter(|e| pending.map_or(true, |p| p.discord_id != *e.key()))
            .map(|e| e.value().clone())
            .collect();
        users.extend(pending.cloned());
        sort_users(&mut users);
        LedgerFile {
            version: LEDGER_VERSION,
            backup_guild_id: backup_guild.map(|g| g.to_string()),
            users,
        }
    }

    fn sorted_users(&self) -> Vec<VerifiedUser> {
        let mut users: Vec<VerifiedUser> = self.users.iter().map(|e| e.value().clone()).collect();
        sort_users(&mut users);
        users
    }
}

fn sort_users(users: &mut [VerifiedUser]) {
    users.sort_by(|a, b| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
            .then_with(|| a.discord_id.cmp(&b.discord_id))
    });
}

fn parse_guild_id(guild_id: &str) -> Result<GuildId> {
    let trimmed = guild_id.trim();
    parse_snowflake(trimmed)
        .map(GuildId::new)
        .ok_or_else(|| BotError::InvalidSnowflake {
            value: trimmed.to_string(),
        })
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn upsert(&self, user: VerifiedUser) -> Result<()> {
        debug!("Recording {} as '{}'", user.discord_id, user.display_name);
        self.users.insert(user.discord_id.clone(), user);
        Ok(())
    }

    async fn get(&self, discord_id: &str) -> Option<VerifiedUser> {
        self.users.get(discord_id).map(|e| e.value().clone())
    }

    async fn list_all(&self) -> Vec<VerifiedUser> {
        self.sorted_users()
    }

    async fn len(&self) -> usize {
        self.users.len()
    }

    async fn set_backup_guild(&self, guild_id: &str) -> Result<GuildId> {
        let guild = parse_guild_id(guild_id)?;
        *self.backup_guild.write() = Some(guild);
        info!("Backup guild set to {}", guild);
        Ok(guild)
    }

    async fn backup_guild(&self) -> Option<GuildId> {
        *self.backup_guild.read()
    }
}

const LEDGER_VERSION: u32 = 1;

/// On-disk layout of [`JsonFileLedger`]
#[derive(Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    backup_guild_id: Option<String>,
    #[serde(default)]
    users: Vec<VerifiedUser>,
}

/// [`MemoryLedger`] that rewrites a JSON file after every change
pub struct JsonFileLedger {
    inner: MemoryLedger,
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileLedger {
    /// Load from `path`, or start empty if the file does not exist yet
    pub async fn load(path: impl AsRef<Path>, default_backup: Option<GuildId>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let path_str = path.display().to_string();

        let inner = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let file: LedgerFile =
                    serde_json::from_str(&content).map_err(|e| BotError::StateParse {
                        path: path_str.clone(),
                        source: e,
                    })?;
                let backup = file
                    .backup_guild_id
                    .as_deref()
                    .and_then(parse_snowflake)
                    .map(GuildId::new)
                    .or(default_backup);
                let ledger = MemoryLedger::with_backup_guild(backup);
                for user in file.users {
                    ledger.users.insert(user.discord_id.clone(), user);
                }
                info!("Loaded {} verified users from {}", ledger.users.len(), path_str);
                ledger
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No ledger at {}, starting empty", path_str);
                MemoryLedger::with_backup_guild(default_backup)
            }
            Err(e) => {
                return Err(BotError::StateLoad {
                    path: path_str,
                    source: e,
                })
            }
        };

        Ok(Self {
            inner,
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Write to a temp file first, then rename for atomicity. Callers hold `write_lock`.
    async fn save(&self, file: &LedgerFile) -> Result<()> {
        let content = serde_json::to_string_pretty(file)?;
        let path_str = self.path.display().to_string();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BotError::StateSave {
                    path: path_str.clone(),
                    source: e,
                })?;
        }

        let temp_path = format!("{}.tmp", path_str);
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| BotError::StateSave {
                path: path_str.clone(),
                source: e,
            })?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| BotError::StateSave {
                path: path_str,
                source: e,
            })?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for JsonFileLedger {
    async fn upsert(&self, user: VerifiedUser) -> Result<()> {
        // Persist first so a failed write leaves memory untouched
        let _guard = self.write_lock.lock().await;
        let file = self
            .inner
            .snapshot_with(Some(&user), self.inner.backup_guild().await);
        self.save(&file).await?;
        self.inner.upsert(user).await
    }

    async fn get(&self, discord_id: &str) -> Option<VerifiedUser> {
        self.inner.get(discord_id).await
    }

    async fn list_all(&self) -> Vec<VerifiedUser> {
        self.inner.list_all().await
    }

    async fn len(&self) -> usize {
        self.inner.len().await
    }

    async fn set_backup_guild(&self, guild_id: &str) -> Result<GuildId> {
        let guild = parse_guild_id(guild_id)?;
        let _guard = self.write_lock.lock().await;
        self.save(&self.inner.snapshot_with(None, Some(guild))).await?;
        self.inner.set_backup_guild(guild_id).await
    }

    async fn backup_guild(&self) -> Option<GuildId> {
        self.inner.backup_guild().await
    }
}

pub fn create_memory_ledger(backup_guild: Option<GuildId>) -> SharedLedger {
    Arc::new(MemoryLedger::with_backup_guild(backup_guild))
}
