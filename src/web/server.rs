//! HTTP server: verification entry point, OAuth callback and the admin panel

use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::admin::admin_router;
use super::auth::SharedSessionStore;
use super::pages;
use crate::config::{parse_snowflake, AppConfig};
use crate::discord::{authorize_url, DiscordClient};
use crate::logging::SharedLogBuffer;
use crate::managers::{BackupManager, CallbackRequest, VerificationManager};
use crate::state::SharedLedger;

/// Shared state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub verification: Arc<VerificationManager>,
    pub backup: Arc<BackupManager>,
    pub ledger: SharedLedger,
    pub sessions: SharedSessionStore,
    pub log_buffer: SharedLogBuffer,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        discord: DiscordClient,
        ledger: SharedLedger,
        sessions: SharedSessionStore,
        log_buffer: SharedLogBuffer,
    ) -> Self {
        let verification = Arc::new(VerificationManager::new(
            config.clone(),
            discord.clone(),
            ledger.clone(),
        ));
        let backup = Arc::new(BackupManager::new(
            discord,
            ledger.clone(),
            config.backup_role_id,
        ));
        Self {
            config,
            verification,
            backup,
            ledger,
            sessions,
            log_buffer,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/verify", get(verify_redirect))
        .route("/oauth/callback", get(oauth_callback))
        .with_state(state.clone())
        .nest("/admin", admin_router(state))
        .layer(TraceLayer::new_for_http())
}

/// Serve until the listener fails. HTTPS when a certificate pair is configured.
pub async fn start_web_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let config = state.config.clone();
    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("=== Discord OAuth Configuration ===");
    info!("Add this Redirect URI in the Discord Developer Portal:");
    info!("  {}", config.redirect_uri);
    info!("Portal: https://discord.com/developers/applications -> OAuth2 -> Redirects");

    match &config.tls {
        Some(tls) => {
            info!("Loading TLS certificates:");
            info!("  Certificate: {}", tls.cert_path.display());
            info!("  Private key: {}", tls.key_path.display());

            let tls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to load TLS certificates: {}\n  Certificate: {}\n  Private key: {}",
                        e,
                        tls.cert_path.display(),
                        tls.key_path.display()
                    )
                })?;

            info!("Web server listening on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!("Web server listening on http://{}", listener.local_addr()?);
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

/// Health check endpoint
async fn health() -> &'static str {
    "guildgate verification server running"
}

#[derive(Deserialize)]
struct VerifyParams {
    #[serde(default)]
    user_id: Option<String>,
}

/// GET /verify - send the user to Discord's consent screen
async fn verify_redirect(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Redirect {
    // Only a well-formed user ID round-trips through `state`
    let user_id = params
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| parse_snowflake(id).is_some());
    Redirect::to(&authorize_url(&state.config, user_id))
}

/// GET /oauth/callback - finish verification
async fn oauth_callback(
    State(state): State<AppState>,
    Query(request): Query<CallbackRequest>,
) -> Response {
    match state.verification.complete(&request).await {
        Ok(outcome) => Html(pages::success_page(
            &outcome.user.display_name,
            &outcome.user.discord_id,
            outcome.join.describe(),
        ))
        .into_response(),
        Err(failure) => {
            let status = failure.error.status_code();
            if status.is_server_error() {
                error!("OAuth callback failed: {}", failure);
            }
            (status, Html(pages::error_page(&failure.error))).into_response()
        }
    }
}
