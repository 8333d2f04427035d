use poise::serenity_prelude as serenity;
use tracing::{debug, info};

use crate::commands::verify::{verify_link_row, verify_message, VERIFY_BUTTON_ID};
use crate::{Data, Error};

/// Handle button presses on the verification panel
pub async fn handle_component(
    ctx: &serenity::Context,
    component: &serenity::ComponentInteraction,
    data: &Data,
) -> Result<(), Error> {
    if component.data.custom_id != VERIFY_BUTTON_ID {
        debug!("Ignoring component {}", component.data.custom_id);
        return Ok(());
    }

    let user_id = component.user.id;
    let already_verified = data.ledger.get(&user_id.to_string()).await.is_some();

    component
        .create_response(
            &ctx.http,
            serenity::CreateInteractionResponse::Message(
                serenity::CreateInteractionResponseMessage::new()
                    .content(verify_message(already_verified))
                    .components(vec![verify_link_row(&data.config, user_id)])
                    .ephemeral(true),
            ),
        )
        .await?;

    info!(
        "Sent verification link to {} ({}) from the panel",
        component.user.name, user_id
    );
    Ok(())
}
