//! Test helpers: an in-process fake of the Discord REST API
//!
//! The fake keeps guild, member and token state so flows can be exercised end to
//! end through the real reqwest client, and it records every request it receives.

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Form, Json, Router,
};
use parking_lot::Mutex;
use poise::serenity_prelude::{GuildId, RoleId};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::{AppConfig, DEFAULT_AUTHORIZE_URL, DEFAULT_SCOPE};
use crate::discord::DiscordClient;

pub const TEST_REDIRECT_URI: &str = "https://verify.example.com/oauth/callback";
pub const TEST_BOT_TOKEN: &str = "bot-token";

/// Config pointing at the given API base, matching the fake's seeded IDs
pub fn test_config(api_base: &str) -> AppConfig {
    AppConfig {
        bot_token: TEST_BOT_TOKEN.to_string(),
        client_id: "1111".to_string(),
        client_secret: "secret".to_string(),
        redirect_uri: TEST_REDIRECT_URI.to_string(),
        base_url: "https://verify.example.com".to_string(),
        guild_id: GuildId::new(FakeDiscord::GUILD),
        role_id: RoleId::new(FakeDiscord::VERIFIED_ROLE),
        admin_password: "hunter2".to_string(),
        port: 0,
        backup_guild_id: None,
        backup_role_id: Some(RoleId::new(FakeDiscord::BACKUP_ROLE)),
        oauth_scope: DEFAULT_SCOPE.to_string(),
        api_base: api_base.to_string(),
        authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
        ledger_path: None,
        tls: None,
    }
}

struct FakeRole {
    id: String,
    name: String,
    position: i64,
}

struct FakeGuild {
    roles: Vec<FakeRole>,
    members: HashMap<String, Vec<String>>,
    channels: Vec<(String, u8, String)>,
}

impl FakeGuild {
    fn new(guild_id: u64, bot_role: u64, grantable: &[(u64, &str, i64)]) -> Self {
        let mut roles = vec![
            FakeRole {
                id: guild_id.to_string(),
                name: "@everyone".to_string(),
                position: 0,
            },
            FakeRole {
                id: bot_role.to_string(),
                name: "guildgate".to_string(),
                position: 10,
            },
        ];
        roles.extend(grantable.iter().map(|(id, name, position)| FakeRole {
            id: id.to_string(),
            name: name.to_string(),
            position: *position,
        }));

        let mut members = HashMap::new();
        members.insert(FakeDiscord::BOT_USER.to_string(), vec![bot_role.to_string()]);

        Self {
            roles,
            members,
            channels: vec![
                ("801".to_string(), 4, "Info".to_string()),
                ("802".to_string(), 0, "welcome".to_string()),
            ],
        }
    }

    fn position_of(&self, role_id: &str) -> Option<i64> {
        self.roles.iter().find(|r| r.id == role_id).map(|r| r.position)
    }

    fn bot_top(&self) -> i64 {
        self.members
            .get(&FakeDiscord::BOT_USER.to_string())
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(|r| self.position_of(r))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }
}

#[derive(Default)]
struct FakeState {
    /// Authorization code -> access token (codes are single-use)
    codes: HashMap<String, String>,
    /// Access token -> (user ID, username)
    tokens: HashMap<String, (String, String)>,
    guilds: HashMap<String, FakeGuild>,
    requests: Vec<String>,
}

type SharedFake = Arc<Mutex<FakeState>>;

pub struct FakeDiscord {
    base_url: String,
    state: SharedFake,
}

impl FakeDiscord {
    pub const GUILD: u64 = 2222;
    pub const VERIFIED_ROLE: u64 = 3333;
    pub const BACKUP_GUILD: u64 = 4444;
    pub const BACKUP_ROLE: u64 = 5555;
    pub const BOT_ROLE: u64 = 7777;
    pub const BOT_USER: u64 = 9999;

    /// Start the fake on an ephemeral localhost port
    pub async fn start() -> Self {
        let mut state = FakeState::default();
        state.guilds.insert(
            Self::GUILD.to_string(),
            FakeGuild::new(Self::GUILD, Self::BOT_ROLE, &[(Self::VERIFIED_ROLE, "Verified", 1)]),
        );
        state.guilds.insert(
            Self::BACKUP_GUILD.to_string(),
            FakeGuild::new(
                Self::BACKUP_GUILD,
                Self::BOT_ROLE,
                &[(Self::BACKUP_ROLE, "Verified", 1)],
            ),
        );
        let state = Arc::new(Mutex::new(state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake discord");
        let addr = listener.local_addr().expect("fake discord address");
        let app = router(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn client(&self) -> DiscordClient {
        DiscordClient::new(self.base_url.clone(), TEST_BOT_TOKEN)
    }

    pub fn config(&self) -> AppConfig {
        test_config(&self.base_url)
    }

    /// Make `code` exchangeable for `token`
    pub fn add_code(&self, code: &str, token: &str) {
        self.state
            .lock()
            .codes
            .insert(code.to_string(), token.to_string());
    }

    /// Make `token` resolve to the given user on /users/@me
    pub fn add_user_token(&self, token: &str, user_id: &str, username: &str) {
        self.state
            .lock()
            .tokens
            .insert(token.to_string(), (user_id.to_string(), username.to_string()));
    }

    pub fn add_member(&self, guild_id: u64, user_id: &str, roles: &[u64]) {
        let mut state = self.state.lock();
        if let Some(guild) = state.guilds.get_mut(&guild_id.to_string()) {
            guild.members.insert(
                user_id.to_string(),
                roles.iter().map(|r| r.to_string()).collect(),
            );
        }
    }

    pub fn set_role_position(&self, guild_id: u64, role_id: u64, position: i64) {
        let mut state = self.state.lock();
        if let Some(guild) = state.guilds.get_mut(&guild_id.to_string()) {
            if let Some(role) = guild.roles.iter_mut().find(|r| r.id == role_id.to_string()) {
                role.position = position;
            }
        }
    }

    pub fn member_roles(&self, guild_id: u64, user_id: &str) -> Option<Vec<String>> {
        let state = self.state.lock();
        state
            .guilds
            .get(&guild_id.to_string())
            .and_then(|g| g.members.get(user_id).cloned())
    }

    /// Requests whose "METHOD /path" starts with `prefix`
    pub fn count_requests(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.starts_with(prefix))
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.state.lock().requests.len()
    }
}

fn router(state: SharedFake) -> Router {
    Router::new()
        .route("/oauth2/token", post(token))
        .route("/users/@me", get(current_user))
        .route("/guilds/:guild/members/:user", get(get_member).put(put_member))
        .route("/guilds/:guild/members/:user/roles/:role", put(put_member_role))
        .route("/guilds/:guild/roles", get(guild_roles))
        .route("/guilds/:guild/channels", get(guild_channels))
        .route("/channels/:channel/invites", post(create_invite))
        .layer(middleware::from_fn_with_state(state.clone(), record))
        .with_state(state)
}

async fn record(State(state): State<SharedFake>, request: Request, next: Next) -> Response {
    let line = format!("{} {}", request.method(), request.uri().path());
    state.lock().requests.push(line);
    next.run(request).await
}

fn discord_error(status: StatusCode, message: &str, code: u64) -> Response {
    (status, Json(json!({ "message": message, "code": code }))).into_response()
}

fn is_bot(headers: &HeaderMap) -> bool {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bot {}", TEST_BOT_TOKEN))
        .unwrap_or(false)
}

async fn token(State(state): State<SharedFake>, Form(form): Form<HashMap<String, String>>) -> Response {
    let field = |k: &str| form.get(k).map(String::as_str).unwrap_or_default();
    if field("client_id") != "1111" || field("client_secret") != "secret" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid_client" })),
        )
            .into_response();
    }

    let mut state = state.lock();
    let valid = field("grant_type") == "authorization_code"
        && field("redirect_uri") == TEST_REDIRECT_URI
        && state.codes.contains_key(field("code"));
    if !valid {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid \"code\" in request."
            })),
        )
            .into_response();
    }

    let access_token = state.codes.remove(field("code")).unwrap_or_default();
    Json(json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 604800,
        "refresh_token": "refresh",
        "scope": field("scope"),
    }))
    .into_response()
}

async fn current_user(State(state): State<SharedFake>, headers: HeaderMap) -> Response {
    if is_bot(&headers) {
        return Json(json!({
            "id": FakeDiscord::BOT_USER.to_string(),
            "username": "guildgate",
            "discriminator": "0",
            "bot": true,
        }))
        .into_response();
    }

    let bearer = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();

    match state.lock().tokens.get(&bearer) {
        Some((id, username)) => Json(json!({
            "id": id,
            "username": username,
            "discriminator": "0",
            "global_name": null,
        }))
        .into_response(),
        None => discord_error(StatusCode::UNAUTHORIZED, "401: Unauthorized", 0),
    }
}

async fn get_member(
    State(state): State<SharedFake>,
    headers: HeaderMap,
    Path((guild_id, user_id)): Path<(String, String)>,
) -> Response {
    if !is_bot(&headers) {
        return discord_error(StatusCode::UNAUTHORIZED, "401: Unauthorized", 0);
    }
    let state = state.lock();
    let Some(guild) = state.guilds.get(&guild_id) else {
        return discord_error(StatusCode::NOT_FOUND, "Unknown Guild", 10004);
    };
    match guild.members.get(&user_id) {
        Some(roles) => Json(json!({ "user": { "id": user_id }, "roles": roles })).into_response(),
        None => discord_error(StatusCode::NOT_FOUND, "Unknown Member", 10007),
    }
}

#[derive(Deserialize)]
struct PutMemberBody {
    access_token: String,
    #[serde(default)]
    roles: Vec<String>,
}

async fn put_member(
    State(state): State<SharedFake>,
    headers: HeaderMap,
    Path((guild_id, user_id)): Path<(String, String)>,
    Json(body): Json<PutMemberBody>,
) -> Response {
    if !is_bot(&headers) {
        return discord_error(StatusCode::UNAUTHORIZED, "401: Unauthorized", 0);
    }
    let mut state = state.lock();
    let token_owner = state.tokens.get(&body.access_token).map(|(id, _)| id.clone());
    let Some(guild) = state.guilds.get_mut(&guild_id) else {
        return discord_error(StatusCode::NOT_FOUND, "Unknown Guild", 10004);
    };
    if guild.members.contains_key(&user_id) {
        return StatusCode::NO_CONTENT.into_response();
    }
    if token_owner.as_deref() != Some(user_id.as_str()) {
        return discord_error(StatusCode::FORBIDDEN, "Invalid OAuth2 access token", 50025);
    }
    let bot_top = guild.bot_top();
    for role in &body.roles {
        match guild.position_of(role) {
            None => return discord_error(StatusCode::BAD_REQUEST, "Invalid Form Body", 50035),
            Some(pos) if pos >= bot_top => {
                return discord_error(StatusCode::FORBIDDEN, "Missing Permissions", 50013)
            }
            Some(_) => {}
        }
    }
    guild.members.insert(user_id.clone(), body.roles.clone());
    (
        StatusCode::CREATED,
        Json(json!({ "user": { "id": user_id }, "roles": body.roles })),
    )
        .into_response()
}

async fn put_member_role(
    State(state): State<SharedFake>,
    headers: HeaderMap,
    Path((guild_id, user_id, role_id)): Path<(String, String, String)>,
) -> Response {
    if !is_bot(&headers) {
        return discord_error(StatusCode::UNAUTHORIZED, "401: Unauthorized", 0);
    }
    let mut state = state.lock();
    let Some(guild) = state.guilds.get_mut(&guild_id) else {
        return discord_error(StatusCode::NOT_FOUND, "Unknown Guild", 10004);
    };
    let Some(position) = guild.position_of(&role_id) else {
        return discord_error(StatusCode::NOT_FOUND, "Unknown Role", 10011);
    };
    if position >= guild.bot_top() {
        return discord_error(StatusCode::FORBIDDEN, "Missing Permissions", 50013);
    }
    match guild.members.get_mut(&user_id) {
        Some(roles) => {
            if !roles.contains(&role_id) {
                roles.push(role_id);
            }
            StatusCode::NO_CONTENT.into_response()
        }
        None => discord_error(StatusCode::NOT_FOUND, "Unknown Member", 10007),
    }
}

async fn guild_roles(
    State(state): State<SharedFake>,
    headers: HeaderMap,
    Path(guild_id): Path<String>,
) -> Response {
    if !is_bot(&headers) {
        return discord_error(StatusCode::UNAUTHORIZED, "401: Unauthorized", 0);
    }
    let state = state.lock();
    match state.guilds.get(&guild_id) {
        Some(guild) => Json(
            guild
                .roles
                .iter()
                .map(|r| json!({ "id": r.id, "name": r.name, "position": r.position, "managed": false }))
                .collect::<Vec<_>>(),
        )
        .into_response(),
        None => discord_error(StatusCode::NOT_FOUND, "Unknown Guild", 10004),
    }
}

async fn guild_channels(
    State(state): State<SharedFake>,
    headers: HeaderMap,
    Path(guild_id): Path<String>,
) -> Response {
    if !is_bot(&headers) {
        return discord_error(StatusCode::UNAUTHORIZED, "401: Unauthorized", 0);
    }
    let state = state.lock();
    match state.guilds.get(&guild_id) {
        Some(guild) => Json(
            guild
                .channels
                .iter()
                .enumerate()
                .map(|(i, (id, kind, name))| json!({ "id": id, "type": kind, "name": name, "position": i }))
                .collect::<Vec<_>>(),
        )
        .into_response(),
        None => discord_error(StatusCode::NOT_FOUND, "Unknown Guild", 10004),
    }
}

async fn create_invite(headers: HeaderMap, Path(channel_id): Path<String>) -> Response {
    if !is_bot(&headers) {
        return discord_error(StatusCode::UNAUTHORIZED, "401: Unauthorized", 0);
    }
    Json(json!({ "code": format!("inv{}", channel_id) })).into_response()
}
