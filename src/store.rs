//! Durable per-guild settings
//!
//! One JSON document maps guild ID to its settings. The document is read in
//! full on every lookup and rewritten in full on every mutation, so edits made
//! to the file between calls are picked up.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serenity::all::{ChannelId, GuildId};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to write settings file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Guild-specific settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuildSettings {
    /// Channel where /verify is accepted; None means verification is not configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_channel_id: Option<ChannelId>,
    /// When true, verification and message moderation are suppressed
    pub paused: bool,
    /// Last voice channel the bot was asked to join; used to resume after restart
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_channel_id: Option<ChannelId>,
}

/// Key-value persistence for guild settings
///
/// A record exists (with defaults) as soon as a guild is looked up; records are
/// never deleted. Concurrent writers for the same guild are last-write-wins.
pub trait SettingsStore: Send + Sync {
    /// Settings for a guild, defaults if no record exists yet
    fn get(&self, guild_id: GuildId) -> GuildSettings;

    /// Persist a guild's settings
    fn save(&self, guild_id: GuildId, settings: &GuildSettings) -> Result<(), StoreError>;

    /// All stored records; used to resume remembered voice channels on startup
    fn all(&self) -> HashMap<GuildId, GuildSettings>;
}

/// Store backed by a single JSON file
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes same-process writers so the document is never torn.
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Read the whole document; a missing or corrupt file degrades to empty
    fn load(&self) -> HashMap<GuildId, GuildSettings> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!("Could not read settings file {}: {}", self.path.display(), e);
                return HashMap::new();
            }
        };

        match serde_json::from_str(&text) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    "Settings file {} is corrupt, treating as empty: {}",
                    self.path.display(),
                    e
                );
                HashMap::new()
            }
        }
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, guild_id: GuildId) -> GuildSettings {
        let _guard = self.lock.lock();
        self.load().remove(&guild_id).unwrap_or_default()
    }

    fn save(&self, guild_id: GuildId, settings: &GuildSettings) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut map = self.load();
        map.insert(guild_id, settings.clone());
        let text = serde_json::to_string_pretty(&map)?;
        fs::write(&self.path, text).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn all(&self) -> HashMap<GuildId, GuildSettings> {
        let _guard = self.lock.lock();
        self.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "verify-bot-{}-{}.json",
            name,
            std::process::id()
        ))
    }

    #[test]
    fn unknown_guild_gets_defaults() {
        let path = scratch_path("defaults");
        let _ = fs::remove_file(&path);
        let store = JsonFileStore::new(&path);

        let settings = store.get(GuildId::new(12345));
        assert_eq!(settings, GuildSettings::default());
        assert!(!settings.paused);
        assert!(settings.verify_channel_id.is_none());
    }

    #[test]
    fn save_then_get_round_trips() {
        let path = scratch_path("roundtrip");
        let _ = fs::remove_file(&path);
        let store = JsonFileStore::new(&path);

        let guild = GuildId::new(42);
        let settings = GuildSettings {
            verify_channel_id: Some(ChannelId::new(777)),
            paused: true,
            voice_channel_id: None,
        };
        store.save(guild, &settings).unwrap();

        // A fresh store over the same file must see the record (no in-memory cache).
        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get(guild), settings);
        assert_eq!(reopened.all().len(), 1);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_file_degrades_to_empty() {
        let path = scratch_path("corrupt");
        fs::write(&path, "not json at all").unwrap();
        let store = JsonFileStore::new(&path);

        assert_eq!(store.get(GuildId::new(1)), GuildSettings::default());
        assert!(store.all().is_empty());

        // Saving over the corrupt file recovers it.
        store
            .save(GuildId::new(1), &GuildSettings::default())
            .unwrap();
        assert_eq!(store.all().len(), 1);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn absent_fields_are_omitted_from_the_document() {
        let settings = GuildSettings {
            paused: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json, serde_json::json!({ "paused": true }));

        // And they still deserialize when missing.
        let parsed: GuildSettings = serde_json::from_str(r#"{"paused":true}"#).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn saves_preserve_other_guilds() {
        let path = scratch_path("multi");
        let _ = fs::remove_file(&path);
        let store = JsonFileStore::new(&path);

        let a = GuildSettings {
            verify_channel_id: Some(ChannelId::new(1)),
            ..Default::default()
        };
        let b = GuildSettings {
            paused: true,
            ..Default::default()
        };
        store.save(GuildId::new(10), &a).unwrap();
        store.save(GuildId::new(20), &b).unwrap();

        assert_eq!(store.get(GuildId::new(10)), a);
        assert_eq!(store.get(GuildId::new(20)), b);

        let _ = fs::remove_file(&path);
    }
}
