//! Admin panel routes and handlers
//!
//! Provides a password-protected interface for:
//! - Viewing the verification ledger
//! - Setting the backup guild and replaying verified users into it
//! - Creating a fallback invite to the backup guild
//! - Viewing live logs

use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Redirect, Response,
    },
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use super::auth::{
    create_logout_cookie, create_session_cookie, get_session_token, password_matches,
    AdminSession,
};
use super::pages::{self, DashboardView, Flash};
use super::server::AppState;
use crate::error::Result;
use crate::managers::ReplicationReport;

pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route("/dashboard", get(dashboard))
        .route("/backup-guild", post(set_backup_guild))
        .route("/add-to-guild", post(add_to_guild))
        .route("/add-all-to-backup", post(add_all_to_backup))
        .route("/invite", post(create_invite))
        .route("/logs", get(logs_page))
        .route("/logs/stream", get(logs_stream))
        .with_state(state)
}

/// Check authentication and return session or redirect to the login form
async fn require_auth(headers: &HeaderMap, state: &AppState) -> std::result::Result<AdminSession, Response> {
    let token = get_session_token(headers).ok_or_else(|| Redirect::to("/admin").into_response())?;

    state
        .sessions
        .get_session(&token)
        .await
        .ok_or_else(|| Redirect::to("/admin").into_response())
}

/// GET /admin - login form, or the dashboard when already signed in
async fn index(headers: HeaderMap, State(state): State<AppState>) -> Response {
    if require_auth(&headers, &state).await.is_ok() {
        return Redirect::to("/admin/dashboard").into_response();
    }
    Html(pages::login_page(None)).into_response()
}

#[derive(Deserialize)]
struct LoginForm {
    #[serde(default)]
    password: String,
}

/// POST /admin/login
async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    if !password_matches(&state.config.admin_password, &form.password) {
        warn!("Rejected admin login with a wrong password");
        return (
            StatusCode::UNAUTHORIZED,
            Html(pages::login_page(Some("Wrong password"))),
        )
            .into_response();
    }

    let token = state.sessions.create_session(AdminSession::new()).await;
    info!("Admin signed in");
    let secure = state.config.base_url.starts_with("https://");

    (
        [(SET_COOKIE, create_session_cookie(&token, secure))],
        Redirect::to("/admin/dashboard"),
    )
        .into_response()
}

/// GET /admin/logout - Clear session and redirect to login
async fn logout(headers: HeaderMap, State(state): State<AppState>) -> impl IntoResponse {
    if let Some(token) = get_session_token(&headers) {
        if let Some(session) = state.sessions.get_session(&token).await {
            info!("Admin signed out (session started {})", session.created_at);
        }
        state.sessions.remove_session(&token).await;
    }

    ([(SET_COOKIE, create_logout_cookie())], Redirect::to("/admin"))
}

async fn render_dashboard(
    state: &AppState,
    flash: Option<Flash>,
    report: Option<&ReplicationReport>,
) -> Html<String> {
    let users = state.ledger.list_all().await;
    let backup_guild = state.ledger.backup_guild().await.map(|g| g.to_string());

    Html(pages::dashboard_page(&DashboardView {
        users: &users,
        backup_guild,
        guild_id: state.config.guild_id.to_string(),
        role_id: state.config.role_id.to_string(),
        scope: &state.config.oauth_scope,
        redirect_uri: &state.config.redirect_uri,
        flash,
        report,
    }))
}

/// Dashboard with a success banner, or with an error banner and the error's status
async fn action_response(state: &AppState, result: Result<String>) -> Response {
    match result {
        Ok(message) => render_dashboard(state, Some(Flash::Success(message)), None)
            .await
            .into_response(),
        Err(e) => {
            warn!("Admin action failed: {}", e);
            (
                e.status_code(),
                render_dashboard(state, Some(Flash::Error(e.public_message())), None).await,
            )
                .into_response()
        }
    }
}

/// GET /admin/dashboard
async fn dashboard(headers: HeaderMap, State(state): State<AppState>) -> Response {
    if let Err(redirect) = require_auth(&headers, &state).await {
        return redirect;
    }
    render_dashboard(&state, None, None).await.into_response()
}

#[derive(Deserialize)]
struct BackupGuildForm {
    #[serde(default)]
    guild_id: String,
}

/// POST /admin/backup-guild
async fn set_backup_guild(
    headers: HeaderMap,
    State(state): State<AppState>,
    Form(form): Form<BackupGuildForm>,
) -> Response {
    if let Err(redirect) = require_auth(&headers, &state).await {
        return redirect;
    }
    let result = state
        .ledger
        .set_backup_guild(&form.guild_id)
        .await
        .map(|guild| format!("Backup guild set to {}", guild));
    action_response(&state, result).await
}

#[derive(Deserialize)]
struct AddToGuildForm {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    guild_id: Option<String>,
}

async fn add_one(state: &AppState, form: &AddToGuildForm) -> Result<String> {
    let guild = state.backup.resolve_guild(form.guild_id.as_deref()).await?;
    let outcome = state.backup.replicate_user(guild, &form.user_id).await?;
    Ok(format!(
        "{}: {} (guild {})",
        form.user_id.trim(),
        outcome.describe(),
        guild
    ))
}

/// POST /admin/add-to-guild
async fn add_to_guild(
    headers: HeaderMap,
    State(state): State<AppState>,
    Form(form): Form<AddToGuildForm>,
) -> Response {
    if let Err(redirect) = require_auth(&headers, &state).await {
        return redirect;
    }
    let result = add_one(&state, &form).await;
    action_response(&state, result).await
}

#[derive(Deserialize, Default)]
struct GuildForm {
    #[serde(default)]
    guild_id: Option<String>,
}

async fn add_all(state: &AppState, form: &GuildForm) -> Result<ReplicationReport> {
    let guild = state.backup.resolve_guild(form.guild_id.as_deref()).await?;
    state.backup.replicate_all(guild).await
}

/// POST /admin/add-all-to-backup
async fn add_all_to_backup(
    headers: HeaderMap,
    State(state): State<AppState>,
    Form(form): Form<GuildForm>,
) -> Response {
    if let Err(redirect) = require_auth(&headers, &state).await {
        return redirect;
    }

    match add_all(&state, &form).await {
        Ok(report) => {
            let summary = format!(
                "Added {} of {} verified users to guild {}",
                report.succeeded_count(),
                report.succeeded_count() + report.failed_count(),
                report.guild_id
            );
            let flash = if report.failed_count() == 0 {
                Flash::Success(summary)
            } else {
                Flash::Error(summary)
            };
            render_dashboard(&state, Some(flash), Some(&report))
                .await
                .into_response()
        }
        Err(e) => action_response(&state, Err(e)).await,
    }
}

async fn invite(state: &AppState, form: &GuildForm) -> Result<String> {
    let guild = state.backup.resolve_guild(form.guild_id.as_deref()).await?;
    let invite = state.backup.create_invite(guild).await?;
    Ok(format!(
        "Invite for guild {}: {} (expires in 24 hours)",
        guild,
        invite.url()
    ))
}

/// POST /admin/invite
async fn create_invite(
    headers: HeaderMap,
    State(state): State<AppState>,
    Form(form): Form<GuildForm>,
) -> Response {
    if let Err(redirect) = require_auth(&headers, &state).await {
        return redirect;
    }
    let result = invite(&state, &form).await;
    action_response(&state, result).await
}

/// GET /admin/logs - Log viewer page
async fn logs_page(headers: HeaderMap, State(state): State<AppState>) -> Response {
    if let Err(redirect) = require_auth(&headers, &state).await {
        return redirect;
    }
    Html(pages::logs_page(&state.log_buffer.get_recent(200))).into_response()
}

/// GET /admin/logs/stream - SSE endpoint for live logs
async fn logs_stream(headers: HeaderMap, State(state): State<AppState>) -> Response {
    if require_auth(&headers, &state).await.is_err() {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let rx = state.log_buffer.subscribe();
    // Lagged receivers skip what they missed
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        result
            .ok()
            .map(|entry| Ok::<_, Infallible>(Event::default().data(entry.to_json())))
    });

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("ping"),
        )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::VerifiedUser;
    use crate::test_utils::FakeDiscord;
    use crate::web::server::tests::{app_state, body_text};
    use crate::web::server::build_router;
    use axum::body::Body;
    use axum::http::{header, Request};
    use poise::serenity_prelude::GuildId;
    use tower::ServiceExt;

    async fn signed_in(state: &AppState) -> String {
        let token = state.sessions.create_session(AdminSession::new()).await;
        format!("admin_session={}", token)
    }

    async fn send(state: &AppState, request: Request<Body>) -> Response {
        build_router(state.clone()).oneshot(request).await.unwrap()
    }

    fn get_with(uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    fn post_form(uri: &str, cookie: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn seed(state: &AppState, fake: &FakeDiscord) {
        for (id, name) in [("42", "nova"), ("44", "vega")] {
            let token = format!("T{}", id);
            fake.add_user_token(&token, id, name);
            state
                .ledger
                .upsert(VerifiedUser::new(id.to_string(), name.to_string(), Some(token)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_routes_require_session() {
        let fake = FakeDiscord::start().await;
        let state = app_state(&fake);

        for uri in ["/admin/dashboard", "/admin/logs"] {
            let response = send(&state, get_with(uri, "admin_session=forged")).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(response.headers()[header::LOCATION], "/admin");
        }

        let response = send(&state, post_form("/admin/backup-guild", "", "guild_id=4444")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(state.ledger.backup_guild().await.is_none());

        let response = send(&state, get_with("/admin/logs/stream", "")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_flow() {
        let fake = FakeDiscord::start().await;
        let state = app_state(&fake);

        let response = send(&state, post_form("/admin/login", "", "password=wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(&state, post_form("/admin/login", "", "password=hunter2")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.contains("HttpOnly"));
        let session = cookie.split(';').next().unwrap().to_string();

        let response = send(&state, get_with("/admin", &session)).await;
        assert_eq!(response.headers()[header::LOCATION], "/admin/dashboard");

        let response = send(&state, get_with("/admin/dashboard", &session)).await;
        assert_eq!(response.status(), StatusCode::OK);

        send(&state, get_with("/admin/logout", &session)).await;
        let response = send(&state, get_with("/admin/dashboard", &session)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn test_dashboard_lists_ledger() {
        let fake = FakeDiscord::start().await;
        let state = app_state(&fake);
        seed(&state, &fake).await;
        let cookie = signed_in(&state).await;

        let body = body_text(send(&state, get_with("/admin/dashboard", &cookie)).await).await;

        assert!(body.contains("nova"));
        assert!(body.contains("<code>44</code>"));
        // Tokens are never rendered
        assert!(!body.contains("T42"));
    }

    #[tokio::test]
    async fn test_set_backup_guild() {
        let fake = FakeDiscord::start().await;
        let state = app_state(&fake);
        let cookie = signed_in(&state).await;

        let response = send(&state, post_form("/admin/backup-guild", &cookie, "guild_id=oops")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.ledger.backup_guild().await.is_none());

        let response = send(&state, post_form("/admin/backup-guild", &cookie, "guild_id=4444")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.ledger.backup_guild().await, Some(GuildId::new(4444)));
    }

    #[tokio::test]
    async fn test_add_all_without_backup_guild() {
        let fake = FakeDiscord::start().await;
        let state = app_state(&fake);
        let cookie = signed_in(&state).await;

        let response = send(&state, post_form("/admin/add-all-to-backup", &cookie, "")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("No backup guild set"));
    }

    #[tokio::test]
    async fn test_add_all_to_backup() {
        let fake = FakeDiscord::start().await;
        let state = app_state(&fake);
        seed(&state, &fake).await;
        state.ledger.set_backup_guild("4444").await.unwrap();
        let cookie = signed_in(&state).await;

        let response = send(&state, post_form("/admin/add-all-to-backup", &cookie, "")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Added 2 of 2 verified users"));
        assert!(fake.member_roles(FakeDiscord::BACKUP_GUILD, "42").is_some());
        assert!(fake.member_roles(FakeDiscord::BACKUP_GUILD, "44").is_some());
    }

    #[tokio::test]
    async fn test_add_single_user_with_explicit_guild() {
        let fake = FakeDiscord::start().await;
        let state = app_state(&fake);
        seed(&state, &fake).await;
        let cookie = signed_in(&state).await;

        let response = send(
            &state,
            post_form("/admin/add-to-guild", &cookie, "user_id=42&guild_id=4444"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(fake.member_roles(FakeDiscord::BACKUP_GUILD, "42").is_some());

        let response = send(
            &state,
            post_form("/admin/add-to-guild", &cookie, "user_id=99&guild_id=4444"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_invite() {
        let fake = FakeDiscord::start().await;
        let state = app_state(&fake);
        state.ledger.set_backup_guild("4444").await.unwrap();
        let cookie = signed_in(&state).await;

        let response = send(&state, post_form("/admin/invite", &cookie, "")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("https://discord.gg/inv802"));
    }
}
