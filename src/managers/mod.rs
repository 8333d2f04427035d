pub mod backup_manager;
pub mod guild_joiner;
pub mod verification_manager;

pub use backup_manager::{BackupManager, ReplicationReport};
pub use guild_joiner::GuildJoiner;
pub use verification_manager::{CallbackRequest, VerificationManager};
