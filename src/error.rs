use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    // Configuration errors
    #[error("Missing required environment variables: {}", .names.join(", "))]
    ConfigMissing { names: Vec<String> },

    #[error("Invalid config: {message}")]
    ConfigValidation { message: String },

    // Ledger persistence errors
    #[error("Failed to save ledger to '{path}': {source}")]
    StateSave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load ledger from '{path}': {source}")]
    StateLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse ledger file '{path}': {source}")]
    StateParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    // OAuth flow errors
    #[error("No authorization code provided")]
    MissingCode,

    #[error("Authorization was not granted: {}", describe(.error, .description))]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("Token exchange failed: {}", describe(.error, .description))]
    TokenExchange {
        error: String,
        description: Option<String>,
    },

    #[error("Failed to fetch user identity: {message}")]
    Identity { message: String },

    #[error("This verification link was issued for a different Discord account")]
    StateMismatch { expected: String, actual: String },

    // Guild join errors
    #[error("User {user_id} is not a member of guild {guild_id} and no access token is available to add them")]
    NotAMember { guild_id: String, user_id: String },

    #[error("User {user_id} has not completed verification")]
    UnknownUser { user_id: String },

    #[error("Role {role_id} not found in guild {guild_id}")]
    RoleNotFound { guild_id: String, role_id: String },

    #[error(
        "Role hierarchy prevents granting '{role_name}': the bot's highest role (position {bot_position}) must be above it (position {role_position}). Move the bot's role higher in Server Settings > Roles."
    )]
    RoleHierarchy {
        role_name: String,
        bot_position: i64,
        role_position: i64,
    },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Rate limited by Discord, retry after {retry_after:.1}s")]
    RateLimited { retry_after: f64 },

    // Discord errors
    #[error("Discord API error ({status}): {message}")]
    Discord {
        status: u16,
        code: Option<u64>,
        message: String,
    },

    #[error("Failed to reach Discord: {message}")]
    Transport { message: String },

    #[error("Invalid Discord ID: '{value}'")]
    InvalidSnowflake { value: String },

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BotError {
    /// HTTP status used when this error ends a browser-facing request
    pub fn status_code(&self) -> StatusCode {
        match self {
            BotError::MissingCode
            | BotError::AuthorizationDenied { .. }
            | BotError::TokenExchange { .. }
            | BotError::StateMismatch { .. }
            | BotError::InvalidSnowflake { .. }
            | BotError::ConfigValidation { .. } => StatusCode::BAD_REQUEST,
            BotError::NotAMember { .. } | BotError::PermissionDenied { .. } => {
                StatusCode::FORBIDDEN
            }
            BotError::UnknownUser { .. } => StatusCode::NOT_FOUND,
            BotError::Identity { .. } | BotError::Discord { .. } => StatusCode::BAD_GATEWAY,
            BotError::RateLimited { .. } => StatusCode::SERVICE_UNAVAILABLE,
            BotError::RoleNotFound { .. }
            | BotError::RoleHierarchy { .. }
            | BotError::Transport { .. }
            | BotError::ConfigMissing { .. }
            | BotError::StateSave { .. }
            | BotError::StateLoad { .. }
            | BotError::StateParse { .. }
            | BotError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to show in the browser. Transport and storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            BotError::Transport { .. } => {
                "Could not reach Discord. Please try again in a moment.".to_string()
            }
            BotError::StateSave { .. }
            | BotError::StateLoad { .. }
            | BotError::StateParse { .. }
            | BotError::Internal { .. } => "Internal Server Error".to_string(),
            other => other.to_string(),
        }
    }
}

fn describe(error: &str, description: &Option<String>) -> String {
    match description {
        Some(d) if !d.is_empty() => format!("{} ({})", error, d),
        _ => error.to_string(),
    }
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        BotError::Transport {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for BotError {
    fn from(err: std::io::Error) -> Self {
        BotError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_is_verbatim() {
        let err = BotError::TokenExchange {
            error: "invalid_grant".to_string(),
            description: Some("Invalid \"code\" in request.".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Token exchange failed: invalid_grant (Invalid \"code\" in request.)"
        );
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_missing_config_lists_all_names() {
        let err = BotError::ConfigMissing {
            names: vec!["DISCORD_TOKEN".to_string(), "ADMIN_PASSWORD".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Missing required environment variables: DISCORD_TOKEN, ADMIN_PASSWORD"
        );
    }

    #[test]
    fn test_transport_details_hidden_from_browser() {
        let err = BotError::Transport {
            message: "dns error: no such host".to_string(),
        };
        assert!(!err.public_message().contains("dns"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_hierarchy_error_names_positions() {
        let err = BotError::RoleHierarchy {
            role_name: "Verified".to_string(),
            bot_position: 2,
            role_position: 5,
        };
        let text = err.public_message();
        assert!(text.contains("Role hierarchy"));
        assert!(text.contains("position 2"));
        assert!(text.contains("position 5"));
    }
}
