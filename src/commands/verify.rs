//! Verification commands: /verify, /setverifychannel, /pauseverify, /resumeverify

use serenity::all::{
    CommandInteraction, CommandOptionType, Context, CreateCommand, CreateCommandOption,
    EditInteractionResponse, EditMember, EditRole, Permissions, ResolvedValue,
};
use tracing::{info, warn};

use crate::bot::BotState;
use crate::policy::{self, RejectReason, VerifyOutcome};

const VERIFIED_ROLE_NAME: &str = "Verified";
const VERIFIED_ROLE_COLOUR: u32 = 0x00ff00;

/// Register verification commands
pub fn register() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("verify")
            .description("Verify your Minecraft username")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "username",
                    "Minecraft username",
                )
                .required(true),
            ),
        CreateCommand::new("setverifychannel")
            .description("Accept /verify only in this channel")
            .default_member_permissions(Permissions::MANAGE_GUILD),
        CreateCommand::new("pauseverify")
            .description("Pause verification")
            .default_member_permissions(Permissions::MANAGE_GUILD),
        CreateCommand::new("resumeverify")
            .description("Resume verification")
            .default_member_permissions(Permissions::MANAGE_GUILD),
    ]
}

/// Handle /verify <username>
pub async fn handle_verify(
    ctx: &Context,
    command: &CommandInteraction,
    state: &BotState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let guild_id = command.guild_id.ok_or("Must be used in a guild")?;
    let member = command.member.as_ref().ok_or("Missing member data")?;

    let options = command.data.options();
    let username = match options.first().map(|o| &o.value) {
        Some(ResolvedValue::String(s)) => s.to_string(),
        _ => {
            edit(ctx, command, "❌ A username is required.").await?;
            return Ok(());
        }
    };

    let is_owner = {
        let guild = ctx.cache.guild(guild_id).ok_or("Guild not in cache")?;
        guild.owner_id == command.user.id
    };

    let settings = state.store.get(guild_id);
    let rename_target = match policy::attempt_verify(&settings, command.channel_id, is_owner) {
        VerifyOutcome::Rejected(RejectReason::NotConfigured) => {
            edit(
                ctx,
                command,
                "❌ Verification isn't set up yet. Ask an admin to run /setverifychannel.",
            )
            .await?;
            return Ok(());
        }
        VerifyOutcome::Rejected(RejectReason::Paused) => {
            edit(ctx, command, "⏸ Verification paused").await?;
            return Ok(());
        }
        VerifyOutcome::Rejected(RejectReason::WrongChannel) => {
            let target = settings
                .verify_channel_id
                .map(|c| format!("<#{}>", c))
                .unwrap_or_else(|| "the verify channel".to_string());
            edit(ctx, command, format!("❌ Please use /verify in {}.", target)).await?;
            return Ok(());
        }
        VerifyOutcome::Approved { rename_target } => rename_target,
    };

    // Find or create the Verified role.
    let existing_role = {
        let guild = ctx.cache.guild(guild_id).ok_or("Guild not in cache")?;
        guild
            .roles
            .values()
            .find(|r| r.name == VERIFIED_ROLE_NAME)
            .map(|r| r.id)
    };
    let role_id = match existing_role {
        Some(id) => id,
        None => {
            let builder = EditRole::new()
                .name(VERIFIED_ROLE_NAME)
                .colour(VERIFIED_ROLE_COLOUR);
            match guild_id.create_role(&ctx.http, builder).await {
                Ok(role) => role.id,
                Err(e) => {
                    warn!("Could not create Verified role in guild {}: {}", guild_id, e);
                    edit(
                        ctx,
                        command,
                        "❌ I couldn't create the **Verified** role. Check that I have the Manage Roles permission.",
                    )
                    .await?;
                    return Ok(());
                }
            }
        }
    };

    // Each mutation can fail on its own; report each specifically.
    let mut notes: Vec<&str> = Vec::new();
    if !member.roles.contains(&role_id) {
        if rename_target {
            let rename = EditMember::new().nickname(&username);
            if let Err(e) = guild_id.edit_member(&ctx.http, command.user.id, rename).await {
                warn!(
                    "Could not set nickname for {} in guild {}: {}",
                    command.user.id, guild_id, e
                );
                notes.push("I couldn't change your nickname. Check my Manage Nicknames permission and role position.");
            }
        } else {
            notes.push("I can't change the server owner's nickname.");
        }

        if let Err(e) = member.add_role(&ctx.http, role_id).await {
            warn!(
                "Could not assign Verified role to {} in guild {}: {}",
                command.user.id, guild_id, e
            );
            edit(
                ctx,
                command,
                "❌ I couldn't assign the **Verified** role. Move my role above **Verified** in the role list.",
            )
            .await?;
            return Ok(());
        }
    }

    let mut reply = format!("✅ Verified as **{}**", username);
    for note in notes {
        reply.push_str("\n⚠️ ");
        reply.push_str(note);
    }
    edit(ctx, command, reply).await?;

    info!(
        "Verified user {} as '{}' in guild {}",
        command.user.id, username, guild_id
    );
    Ok(())
}

/// Handle /setverifychannel
pub async fn handle_set_channel(
    ctx: &Context,
    command: &CommandInteraction,
    state: &BotState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let guild_id = command.guild_id.ok_or("Must be used in a guild")?;

    policy::configure_channel(state.store.as_ref(), guild_id, command.channel_id)?;
    edit(ctx, command, "✅ Verify channel set").await?;

    info!(
        "Guild {} set verify channel to {}",
        guild_id, command.channel_id
    );
    Ok(())
}

/// Handle /pauseverify
pub async fn handle_pause(
    ctx: &Context,
    command: &CommandInteraction,
    state: &BotState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let guild_id = command.guild_id.ok_or("Must be used in a guild")?;

    policy::pause(state.store.as_ref(), guild_id)?;
    edit(ctx, command, "⏸ Paused").await?;

    info!("Guild {} paused verification", guild_id);
    Ok(())
}

/// Handle /resumeverify
pub async fn handle_resume(
    ctx: &Context,
    command: &CommandInteraction,
    state: &BotState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let guild_id = command.guild_id.ok_or("Must be used in a guild")?;

    policy::resume(state.store.as_ref(), guild_id)?;
    edit(ctx, command, "▶️ Resumed").await?;

    info!("Guild {} resumed verification", guild_id);
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
