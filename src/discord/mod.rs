//! Discord REST API collaborator
//!
//! A small typed wrapper around the handful of endpoints the verification flow
//! touches. The gateway side of the bot goes through serenity; everything the
//! web server does goes through this client so its base URL can be pointed at a
//! local fake in tests.

mod client;
mod oauth;
mod types;

pub use client::{AddMemberOutcome, DiscordClient};
pub use oauth::authorize_url;
pub use types::Invite;
