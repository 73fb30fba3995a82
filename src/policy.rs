//! Verification policy
//!
//! Pure eligibility decisions plus the settings mutations behind the admin
//! commands. Side effects (role grant, nickname change, message deletion) are
//! performed by the command layer so the policy stays testable without a live
//! Discord connection.

use serenity::all::{ChannelId, GuildId};

use crate::store::{GuildSettings, SettingsStore, StoreError};

/// Why a verification request was turned down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No verify channel has been configured for the guild
    NotConfigured,
    /// Verification is paused
    Paused,
    /// The request arrived outside the configured verify channel
    WrongChannel,
}

/// Outcome of a verification eligibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Grant the role; rename the member only when `rename_target` is true
    /// (the platform forbids bots from renaming the guild owner)
    Approved { rename_target: bool },
    Rejected(RejectReason),
}

/// Decide whether a /verify request is eligible.
///
/// Checks run in precedence order: unconfigured beats paused beats
/// wrong-channel. The guild owner is approved but never renamed.
pub fn attempt_verify(
    settings: &GuildSettings,
    channel_id: ChannelId,
    is_guild_owner: bool,
) -> VerifyOutcome {
    let Some(verify_channel) = settings.verify_channel_id else {
        return VerifyOutcome::Rejected(RejectReason::NotConfigured);
    };
    if settings.paused {
        return VerifyOutcome::Rejected(RejectReason::Paused);
    }
    if channel_id != verify_channel {
        return VerifyOutcome::Rejected(RejectReason::WrongChannel);
    }
    VerifyOutcome::Approved {
        rename_target: !is_guild_owner,
    }
}

/// True iff a plain message in the verify channel should be deleted
pub fn should_moderate(
    settings: &GuildSettings,
    channel_id: ChannelId,
    author_is_bot: bool,
) -> bool {
    if author_is_bot || settings.paused {
        return false;
    }
    settings.verify_channel_id == Some(channel_id)
}

/// Set the verify channel. Setting a channel implicitly resumes verification.
pub fn configure_channel(
    store: &dyn SettingsStore,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> Result<GuildSettings, StoreError> {
    let mut settings = store.get(guild_id);
    settings.verify_channel_id = Some(channel_id);
    settings.paused = false;
    store.save(guild_id, &settings)?;
    Ok(settings)
}

/// Pause verification for a guild. Idempotent.
pub fn pause(store: &dyn SettingsStore, guild_id: GuildId) -> Result<GuildSettings, StoreError> {
    let mut settings = store.get(guild_id);
    settings.paused = true;
    store.save(guild_id, &settings)?;
    Ok(settings)
}

/// Resume verification for a guild. Idempotent.
pub fn resume(store: &dyn SettingsStore, guild_id: GuildId) -> Result<GuildSettings, StoreError> {
    let mut settings = store.get(guild_id);
    settings.paused = false;
    store.save(guild_id, &settings)?;
    Ok(settings)
}

/// Remember (or forget) the voice channel the bot should sit in
pub fn set_voice_channel(
    store: &dyn SettingsStore,
    guild_id: GuildId,
    channel_id: Option<ChannelId>,
) -> Result<GuildSettings, StoreError> {
    let mut settings = store.get(guild_id);
    settings.voice_channel_id = channel_id;
    store.save(guild_id, &settings)?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonFileStore;

    fn configured(channel: u64) -> GuildSettings {
        GuildSettings {
            verify_channel_id: Some(ChannelId::new(channel)),
            paused: false,
            voice_channel_id: None,
        }
    }

    #[test]
    fn unconfigured_guild_rejects_regardless_of_other_fields() {
        let settings = GuildSettings {
            verify_channel_id: None,
            paused: true,
            voice_channel_id: Some(ChannelId::new(5)),
        };
        assert_eq!(
            attempt_verify(&settings, ChannelId::new(1), false),
            VerifyOutcome::Rejected(RejectReason::NotConfigured)
        );
        assert_eq!(
            attempt_verify(&settings, ChannelId::new(1), true),
            VerifyOutcome::Rejected(RejectReason::NotConfigured)
        );
    }

    #[test]
    fn request_in_configured_channel_is_approved_with_rename() {
        let settings = configured(100);
        assert_eq!(
            attempt_verify(&settings, ChannelId::new(100), false),
            VerifyOutcome::Approved {
                rename_target: true
            }
        );
    }

    #[test]
    fn request_in_other_channel_is_rejected() {
        let settings = configured(100);
        assert_eq!(
            attempt_verify(&settings, ChannelId::new(200), false),
            VerifyOutcome::Rejected(RejectReason::WrongChannel)
        );
    }

    #[test]
    fn paused_guild_rejects_even_in_right_channel() {
        let mut settings = configured(100);
        settings.paused = true;
        assert_eq!(
            attempt_verify(&settings, ChannelId::new(100), false),
            VerifyOutcome::Rejected(RejectReason::Paused)
        );
    }

    #[test]
    fn owner_is_approved_but_not_renamed() {
        let settings = configured(100);
        assert_eq!(
            attempt_verify(&settings, ChannelId::new(100), true),
            VerifyOutcome::Approved {
                rename_target: false
            }
        );
    }

    #[test]
    fn bot_messages_are_never_moderated() {
        let settings = configured(100);
        assert!(!should_moderate(&settings, ChannelId::new(100), true));
        assert!(should_moderate(&settings, ChannelId::new(100), false));
    }

    #[test]
    fn moderation_respects_channel_pause_and_configuration() {
        let mut settings = configured(100);
        assert!(!should_moderate(&settings, ChannelId::new(200), false));

        settings.paused = true;
        assert!(!should_moderate(&settings, ChannelId::new(100), false));

        settings.paused = false;
        settings.verify_channel_id = None;
        assert!(!should_moderate(&settings, ChannelId::new(100), false));
    }

    fn scratch_store(name: &str) -> JsonFileStore {
        let path = std::env::temp_dir().join(format!(
            "verify-policy-{}-{}.json",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        JsonFileStore::new(path)
    }

    #[test]
    fn configure_channel_clears_pause() {
        let store = scratch_store("configure");
        let guild = GuildId::new(1);

        pause(&store, guild).unwrap();
        assert!(store.get(guild).paused);

        let settings = configure_channel(&store, guild, ChannelId::new(9)).unwrap();
        assert_eq!(settings.verify_channel_id, Some(ChannelId::new(9)));
        assert!(!settings.paused);
        assert_eq!(store.get(guild), settings);
    }

    #[test]
    fn pause_is_idempotent() {
        let store = scratch_store("pause");
        let guild = GuildId::new(2);

        let once = pause(&store, guild).unwrap();
        let twice = pause(&store, guild).unwrap();
        assert_eq!(once, twice);
        assert!(twice.paused);
    }
}
