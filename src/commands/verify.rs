use poise::serenity_prelude as serenity;
use tracing::info;

use crate::config::AppConfig;
use crate::{Context, Error};

/// custom_id of the button posted by `/verify-panel`
pub const VERIFY_BUTTON_ID: &str = "guildgate:verify";

/// Link button that opens the verification flow for `user_id`
pub fn verify_link_row(config: &AppConfig, user_id: serenity::UserId) -> serenity::CreateActionRow {
    let url = config.verify_link(Some(&user_id.to_string()));
    serenity::CreateActionRow::Buttons(vec![
        serenity::CreateButton::new_link(url).label("Verify with Discord")
    ])
}

pub fn verify_message(already_verified: bool) -> &'static str {
    if already_verified {
        "You are already verified. Use the link again if you lost the role or left the server."
    } else {
        "Click the button to sign in with Discord. You'll be added to the server with the verified role."
    }
}

/// Get your personal verification link
#[poise::command(slash_command)]
pub async fn verify(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let user_id = ctx.author().id;
    let already_verified = data.ledger.get(&user_id.to_string()).await.is_some();

    ctx.send(
        poise::CreateReply::default()
            .content(verify_message(already_verified))
            .components(vec![verify_link_row(&data.config, user_id)])
            .ephemeral(true),
    )
    .await?;

    info!("Sent verification link to {} ({})", ctx.author().name, user_id);
    Ok(())
}

/// Post a verification button in this channel
#[poise::command(
    slash_command,
    rename = "verify-panel",
    guild_only,
    required_permissions = "ADMINISTRATOR",
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn verify_panel(
    ctx: Context<'_>,
    #[description = "Text shown above the button"] message: Option<String>,
) -> Result<(), Error> {
    let embed = serenity::CreateEmbed::new()
        .title("Verification")
        .description(message.unwrap_or_else(|| {
            "Press **Verify** to get your personal sign-in link.".to_string()
        }))
        .color(0x5865F2);

    let button = serenity::CreateButton::new(VERIFY_BUTTON_ID)
        .label("Verify")
        .style(serenity::ButtonStyle::Primary);

    ctx.channel_id()
        .send_message(
            ctx.http(),
            serenity::CreateMessage::new()
                .embed(embed)
                .components(vec![serenity::CreateActionRow::Buttons(vec![button])]),
        )
        .await?;

    ctx.send(
        poise::CreateReply::default()
            .content("Verification panel posted.")
            .ephemeral(true),
    )
    .await?;

    info!(
        "Verification panel posted in channel {} by {}",
        ctx.channel_id(),
        ctx.author().name
    );
    Ok(())
}
