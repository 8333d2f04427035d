use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Discord bot that verifies members through OAuth and mirrors them into a backup server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serve the verification site and admin panel without connecting the bot to the gateway
    #[arg(long)]
    web_only: bool,

    /// Register slash commands globally instead of on DISCORD_GUILD_ID (takes up to 1 hour to propagate)
    #[arg(long)]
    global_commands: bool,

    /// Port for the web server, overriding PORT
    #[arg(long)]
    port: Option<u16>,
}

mod commands;
mod config;
mod discord;
mod error;
mod events;
mod logging;
mod managers;
mod state;
mod web;

#[cfg(test)]
mod test_utils;

use commands::{help, ping, verify, verify_panel};
use config::AppConfig;
use discord::DiscordClient;
use managers::GuildJoiner;
use state::{create_memory_ledger, JsonFileLedger, SharedLedger};

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared application state
pub struct Data {
    pub config: Arc<AppConfig>,
    pub ledger: SharedLedger,
}

async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::InteractionCreate {
        interaction: serenity::Interaction::Component(component),
    } = event
    {
        if let Err(e) = events::handle_component(ctx, component, data).await {
            error!("Failed to handle component interaction: {}", e);
        }
    }
    Ok(())
}

async fn load_ledger(config: &AppConfig) -> Result<SharedLedger> {
    match &config.ledger_path {
        Some(path) => {
            info!("Loading ledger from {}...", path.display());
            let ledger = JsonFileLedger::load(path, config.backup_guild_id).await?;
            Ok(Arc::new(ledger))
        }
        None => {
            warn!("LEDGER_PATH not set: verified users are kept in memory and lost on restart");
            Ok(create_memory_ledger(config.backup_guild_id))
        }
    }
}

/// Warn early about setups that would make every verification fail
async fn check_guild_setup(discord: &DiscordClient, config: &AppConfig) {
    if !config.can_join_guilds() {
        warn!(
            "OAUTH_SCOPE '{}' lacks guilds.join: only users already in the server can verify",
            config.oauth_scope
        );
    }

    let joiner = GuildJoiner::new(discord.clone());
    let mut targets = vec![("verification", config.guild_id, config.role_id)];
    if let (Some(guild_id), Some(role_id)) = (config.backup_guild_id, config.backup_role_id) {
        targets.push(("backup", guild_id, role_id));
    }

    for (label, guild_id, role_id) in targets {
        match joiner.check_role_hierarchy(guild_id, role_id).await {
            Ok(check) => info!(
                "{} guild {}: bot role {:?} (position {}) can grant '{}' (position {})",
                label,
                guild_id,
                check.bot_role_name,
                check.bot_position,
                check.role_name,
                check.role_position
            ),
            Err(e) => warn!("{} guild {}: {}", label, guild_id, e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    // Create log buffer for web admin panel
    let log_buffer = logging::create_log_buffer(logging::DEFAULT_LOG_CAPACITY);
    logging::init_tracing(log_buffer.clone());

    let mut config = AppConfig::from_env().map_err(|e| {
        error!("{}", e);
        e
    })?;
    if let Some(port) = args.port {
        config.port = port;
    }
    let config = Arc::new(config);
    info!("Loaded {:?}", config);

    if let Some(app_id) = config::application_id_from_token(&config.bot_token) {
        info!(
            "Application ID: {} (add {} as a redirect at https://discord.com/developers/applications/{}/oauth2)",
            app_id, config.redirect_uri, app_id
        );
    }

    let ledger = load_ledger(&config).await?;
    let discord = DiscordClient::from_config(&config);
    let sessions = web::create_session_store();
    web::spawn_session_cleanup(sessions.clone());

    check_guild_setup(&discord, &config).await;

    let web_state = web::AppState::new(
        config.clone(),
        discord,
        ledger.clone(),
        sessions,
        log_buffer,
    );
    let port = config.port;

    if args.web_only {
        info!("--web-only: not connecting to the Discord gateway");
        return web::start_web_server(web_state, port).await;
    }

    tokio::spawn(async move {
        info!("Starting web server on port {}...", port);
        if let Err(e) = web::start_web_server(web_state, port).await {
            error!("Web server error: {}", e);
        }
    });

    let global_commands = args.global_commands;
    let token = config.bot_token.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![verify(), verify_panel(), ping(), help()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' invoked by {} (ID: {}) in {}",
                        ctx.command().qualified_name,
                        ctx.author().name,
                        ctx.author().id,
                        ctx.guild_id()
                            .map(|g| g.to_string())
                            .unwrap_or_else(|| "DM".to_string())
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!("Error in command '{}': {}", ctx.command().qualified_name, error);
                            let _ = ctx
                                .send(
                                    poise::CreateReply::default()
                                        .content("Something went wrong. Please try again later.")
                                        .ephemeral(true),
                                )
                                .await;
                        }
                        poise::FrameworkError::MissingUserPermissions { ctx, .. } => {
                            warn!(
                                "User {} lacks permissions for '{}'",
                                ctx.author().name,
                                ctx.command().qualified_name
                            );
                            let _ = ctx
                                .send(
                                    poise::CreateReply::default()
                                        .content("You need Administrator permission for this command.")
                                        .ephemeral(true),
                                )
                                .await;
                        }
                        poise::FrameworkError::GuildOnly { ctx, .. } => {
                            warn!(
                                "Command '{}' is guild-only, used in DM by {}",
                                ctx.command().qualified_name,
                                ctx.author().name
                            );
                        }
                        other => {
                            error!("Other framework error: {}", other);
                        }
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            let config = config.clone();
            let ledger = ledger.clone();

            Box::pin(async move {
                info!("Bot logged in as: {}", ready.user.name);

                let commands = &framework.options().commands;
                if global_commands {
                    info!("Registering commands globally...");
                    poise::builtins::register_globally(ctx, commands).await?;
                    info!(
                        "Registered {} commands globally (may take up to 1 hour to propagate)",
                        commands.len()
                    );
                } else {
                    poise::builtins::register_in_guild(ctx, commands, config.guild_id).await?;
                    info!(
                        "Registered {} commands to guild {}",
                        commands.len(),
                        config.guild_id
                    );
                }

                Ok(Data { config, ledger })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;

    info!("Starting bot...");
    client.start().await?;
    warn!("Bot ended.");

    Ok(())
}
