//! Discord event handling and command dispatch

use crate::commands;
use crate::config::Config;
use crate::policy;
use crate::store::{JsonFileStore, SettingsStore};
use crate::voice::{ReconnectPolicy, VoiceController};
use serenity::all::{
    Client, Context, CreateMessage, EditInteractionResponse, EventHandler, GatewayIntents,
    GuildId, Interaction, Message, Ready,
};
use serenity::async_trait;
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Bot state shared across handlers
pub struct BotState {
    pub config: Arc<Config>,
    pub store: Arc<dyn SettingsStore>,
    pub voice: Arc<VoiceController>,
}

/// Main event handler for the bot
pub struct Handler {
    pub state: Arc<BotState>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Logged in as {}", ready.user.name);

        let commands = commands::verify::register()
            .into_iter()
            .chain(commands::voice::register())
            .collect::<Vec<_>>();

        // Setting the command list replaces it wholesale, wiping stale duplicates.
        let guild_ids: Vec<GuildId> = match self.state.config.guild_id {
            Some(id) => vec![GuildId::new(id)],
            None => ready.guilds.iter().map(|g| g.id).collect(),
        };
        for guild_id in guild_ids {
            match guild_id.set_commands(&ctx.http, commands.clone()).await {
                Ok(cmds) => info!("Registered {} commands in guild {}", cmds.len(), guild_id),
                Err(e) => error!("Failed to register commands in guild {}: {}", guild_id, e),
            }
        }

        // Rejoin remembered voice channels. Ready fires again on gateway
        // resume, so guilds with a live session are skipped.
        for (guild_id, settings) in self.state.store.all() {
            let Some(channel_id) = settings.voice_channel_id else {
                continue;
            };
            if self.state.voice.active_session(guild_id).is_some() {
                continue;
            }
            let voice = self.state.voice.clone();
            let http = ctx.http.clone();
            tokio::spawn(async move {
                match voice.join(http, guild_id, channel_id).await {
                    Ok(()) => info!("Resumed voice channel {} in guild {}", channel_id, guild_id),
                    Err(e) => warn!(
                        "Could not resume voice channel {} in guild {}: {}",
                        channel_id, guild_id, e
                    ),
                }
            });
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(guild_id) = msg.guild_id else { return };

        let settings = self.state.store.get(guild_id);
        if !policy::should_moderate(&settings, msg.channel_id, msg.author.bot) {
            return;
        }

        if let Err(e) = msg.delete(&ctx.http).await {
            warn!(
                "Could not delete message {} in guild {}: {}",
                msg.id, guild_id, e
            );
            return;
        }

        let notice = CreateMessage::new().content(format!(
            "Your message in <#{}> was removed. That channel only accepts the /verify command.",
            msg.channel_id
        ));
        if let Err(e) = msg.author.dm(&ctx.http, notice).await {
            // DMs may be closed; not an error worth surfacing.
            debug!("Could not DM {} about moderation: {}", msg.author.id, e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };

        // Acknowledge before any slow work; the interaction token expires
        // quickly. A failed defer abandons the request.
        if let Err(e) = command.defer_ephemeral(&ctx.http).await {
            error!("Failed to defer {}: {}", command.data.name, e);
            return;
        }

        let state = self.state.as_ref();
        let result = match command.data.name.as_str() {
            "verify" => commands::verify::handle_verify(&ctx, &command, state).await,
            "setverifychannel" => commands::verify::handle_set_channel(&ctx, &command, state).await,
            "pauseverify" => commands::verify::handle_pause(&ctx, &command, state).await,
            "resumeverify" => commands::verify::handle_resume(&ctx, &command, state).await,
            "joinvc" => commands::voice::handle_join(&ctx, &command, state).await,
            "leavevc" => commands::voice::handle_leave(&ctx, &command, state).await,
            _ => {
                // A stale command registered by a prior deployment can still
                // arrive before re-registration lands; it was deferred above,
                // so it is still owed its one final reply.
                warn!("No route for command {}", command.data.name);
                command
                    .edit_response(
                        &ctx.http,
                        EditInteractionResponse::new().content("❌ Unknown command."),
                    )
                    .await
                    .map(|_| ())
                    .map_err(|e| e.into())
            }
        };

        // One guild's failure must not take the process down; report it once.
        if let Err(e) = result {
            error!("Command {} failed: {}", command.data.name, e);
            let response = EditInteractionResponse::new()
                .content("❌ Something went wrong while handling that command.");
            if let Err(e) = command.edit_response(&ctx.http, response).await {
                error!("Could not report failure for {}: {}", command.data.name, e);
            }
        }
    }
}

/// Create and run the Discord bot
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Arc::new(config);

    let store: Arc<dyn SettingsStore> = Arc::new(JsonFileStore::new(&config.settings_file));

    // The controller owns the songbird manager, so build it explicitly
    // instead of letting the client register a default one.
    let manager = Songbird::serenity();
    let reconnect = ReconnectPolicy {
        max_attempts: config.voice_max_retries,
        ..Default::default()
    };
    let voice = Arc::new(VoiceController::new(manager.clone(), reconnect));

    let state = Arc::new(BotState {
        config: config.clone(),
        store,
        voice,
    });

    let handler = Handler {
        state: state.clone(),
    };

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_VOICE_STATES;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(manager)
        .await?;

    info!("Starting bot...");
    client.start().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // The dispatcher answers these by name; anything else falls through to
    // the unknown-command reply. Registration and routing must agree, or a
    // registered command would sit on its deferred reply forever.
    #[test]
    fn every_registered_command_has_a_dispatch_route() {
        let mut routed = vec![
            "verify",
            "setverifychannel",
            "pauseverify",
            "resumeverify",
            "joinvc",
            "leavevc",
        ];
        routed.sort_unstable();

        let mut registered: Vec<String> = commands::verify::register()
            .into_iter()
            .chain(commands::voice::register())
            .map(|c| {
                serde_json::to_value(&c).unwrap()["name"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        registered.sort_unstable();

        assert_eq!(registered, routed);
    }
}
