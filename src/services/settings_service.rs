use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::dao::kv::{KeyValueStore, load_json_or_quarantine, save_json};

/// Storage key of the serialized [`AppSettings`].
pub const SETTINGS_KEY: &str = "app_settings";

/// User preferences of the scoring console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    /// Push automatically on mutations, reconnects and sweeps.
    pub auto_sync: bool,
    /// Keep finished games in the library after they are synced.
    pub keep_synced_games: bool,
    /// Regulation period length (minutes) for new games.
    pub default_period_duration: u32,
    /// Shot clock length (seconds) for new games.
    pub default_shot_clock: u32,
    /// Haptic feedback on the console.
    pub vibration_enabled: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auto_sync: true,
            keep_synced_games: true,
            default_period_duration: 10,
            default_shot_clock: 24,
            vibration_enabled: true,
        }
    }
}

/// Persisted settings.
pub struct SettingsStore {
    storage: Arc<dyn KeyValueStore>,
    current: RwLock<AppSettings>,
}

impl SettingsStore {
    /// Load settings, falling back to defaults.
    pub fn open(storage: Arc<dyn KeyValueStore>) -> Self {
        let current = match load_json_or_quarantine::<AppSettings>(storage.as_ref(), SETTINGS_KEY)
        {
            Ok(settings) => settings.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "failed to load app settings; using defaults");
                AppSettings::default()
            }
        };
        Self {
            storage,
            current: RwLock::new(current),
        }
    }

    /// Current settings.
    pub async fn get(&self) -> AppSettings {
        self.current.read().await.clone()
    }

    /// Replace the settings and persist them.
    pub async fn update(&self, settings: AppSettings) -> AppSettings {
        let mut current = self.current.write().await;
        *current = settings;
        if let Err(err) = save_json(self.storage.as_ref(), SETTINGS_KEY, &*current) {
            warn!(error = %err, "failed to persist app settings");
        }
        current.clone()
    }
}
