//! Web server for OAuth verification and the admin panel
//!
//! Runs alongside the Discord bot: `/verify` starts the OAuth flow, the callback
//! completes it, and `/admin` manages the ledger and the backup guild.

mod admin;
mod auth;
mod pages;
mod server;

pub use auth::{create_session_store, spawn_session_cleanup};
pub use server::{start_web_server, AppState};
