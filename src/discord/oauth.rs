//! OAuth2 authorization-code exchange and identity lookup

use serde::Deserialize;
use tracing::{debug, error};

use super::client::{api_error, DiscordClient};
use super::types::DiscordUser;
use crate::config::AppConfig;
use crate::error::{BotError, Result};

/// Discord OAuth token response. Error responses share the shape, so every field is optional.
#[derive(Deserialize, Default)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// A user access token obtained from the authorization code
#[derive(Clone)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub scope: Option<String>,
}

impl AccessToken {
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    pub fn has_scope(&self, wanted: &str) -> bool {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().any(|scope| scope == wanted))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl DiscordClient {
    /// Exchange an authorization code for an access token.
    ///
    /// A provider `error` field or a missing token always fails; the provider's
    /// error code and description are carried through unchanged.
    pub async fn exchange_code(
        &self,
        code: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        scope: &str,
    ) -> Result<AccessToken> {
        let response = self
            .http
            .post(self.url("/oauth2/token"))
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("scope", scope),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let token: TokenResponse = serde_json::from_str(&body).unwrap_or_default();

        if let Some(error) = token.error {
            error!("Token exchange rejected: {} {:?}", error, token.error_description);
            return Err(BotError::TokenExchange {
                error,
                description: token.error_description,
            });
        }

        if !status.is_success() {
            error!("Token exchange failed with {}: {}", status, body);
            return Err(BotError::TokenExchange {
                error: format!("http_{}", status.as_u16()),
                description: Some(body.trim().to_string()).filter(|b| !b.is_empty()),
            });
        }

        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BotError::TokenExchange {
                error: "missing_access_token".to_string(),
                description: Some("Discord did not return an access token".to_string()),
            })?;

        debug!("Token exchange succeeded (scope: {:?})", token.scope);

        Ok(AccessToken {
            access_token,
            token_type: token.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: token.scope,
        })
    }

    /// Fetch the user the access token belongs to
    pub async fn fetch_identity(&self, token: &AccessToken) -> Result<DiscordUser> {
        let response = self
            .http
            .get(self.url("/users/@me"))
            .header("Authorization", token.authorization_header())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("User info request failed with {}: {}", status, body);
            return Err(BotError::Identity {
                message: api_error(status.as_u16(), &body).to_string(),
            });
        }

        response.json().await.map_err(|e| BotError::Identity {
            message: format!("unreadable user info: {}", e),
        })
    }
}

/// Build the authorize URL the user is redirected to. `state` round-trips the initiating user ID.
pub fn authorize_url(config: &AppConfig, state: Option<&str>) -> String {
    let mut url = format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}",
        config.authorize_url,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(&config.redirect_uri),
        urlencoding::encode(&config.oauth_scope),
    );
    if let Some(state) = state {
        url.push_str("&state=");
        url.push_str(&urlencoding::encode(state));
    }
    url
}
