//! Voice presence commands: /joinvc, /leavevc

use serenity::all::{
    CommandInteraction, Context, CreateCommand, EditInteractionResponse, Permissions,
};
use tracing::{info, warn};

use crate::bot::BotState;
use crate::policy;
use crate::voice::{ConnectError, LeaveError};

/// Register voice commands
pub fn register() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("joinvc")
            .description("Join your current voice channel and stay there")
            .default_member_permissions(Permissions::MANAGE_GUILD),
        CreateCommand::new("leavevc")
            .description("Leave the voice channel")
            .default_member_permissions(Permissions::MANAGE_GUILD),
    ]
}

/// Handle /joinvc
pub async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    state: &BotState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let guild_id = command.guild_id.ok_or("Must be used in a guild")?;

    // The invoker's voice channel, from the guild cache.
    let voice_channel_id = {
        let guild = ctx.cache.guild(guild_id).ok_or("Guild not in cache")?;
        guild
            .voice_states
            .get(&command.user.id)
            .and_then(|vs| vs.channel_id)
    };
    let Some(channel_id) = voice_channel_id else {
        edit(ctx, command, "❌ Join a voice channel first, then run /joinvc.").await?;
        return Ok(());
    };

    match state.voice.join(ctx.http.clone(), guild_id, channel_id).await {
        Ok(()) => {
            policy::set_voice_channel(state.store.as_ref(), guild_id, Some(channel_id))?;

            let channel_name = ctx
                .cache
                .channel(channel_id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| "voice".to_string());
            edit(
                ctx,
                command,
                format!(
                    "🔊 Joined **{}**. I'll reconnect automatically if the connection drops.",
                    channel_name
                ),
            )
            .await?;
            info!("Joined voice channel {} in guild {}", channel_id, guild_id);
        }
        Err(ConnectError::Timeout) => {
            edit(
                ctx,
                command,
                "❌ Couldn't establish a voice connection in time. Check that UDP traffic to Discord's voice servers isn't blocked by a firewall.",
            )
            .await?;
        }
        Err(e) => {
            warn!(
                "Voice join failed in guild {} channel {}: {}",
                guild_id, channel_id, e
            );
            edit(ctx, command, "❌ Couldn't join the voice channel.").await?;
        }
    }

    Ok(())
}

/// Handle /leavevc
pub async fn handle_leave(
    ctx: &Context,
    command: &CommandInteraction,
    state: &BotState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let guild_id = command.guild_id.ok_or("Must be used in a guild")?;

    match state.voice.leave(guild_id).await {
        Ok(()) => {
            policy::set_voice_channel(state.store.as_ref(), guild_id, None)?;
            edit(ctx, command, "👋 Left the voice channel.").await?;
        }
        Err(LeaveError::NotConnected) => {
            edit(ctx, command, "I'm not in a voice channel.").await?;
        }
    }

    Ok(())
}

/// Helper to edit the deferred response
async fn edit(
    ctx: &Context,
    command: &CommandInteraction,
    content: impl Into<String>,
) -> Result<(), serenity::Error> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await
        .map(|_| ())
}
