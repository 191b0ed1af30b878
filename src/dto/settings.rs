use serde::Deserialize;
use validator::Validate;

use crate::services::settings_service::AppSettings;

/// Partial update of the app settings; omitted fields are left unchanged.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub auto_sync: Option<bool>,
    pub keep_synced_games: Option<bool>,
    #[validate(range(min = 1, max = 60))]
    pub default_period_duration: Option<u32>,
    #[validate(range(min = 1, max = 60))]
    pub default_shot_clock: Option<u32>,
    pub vibration_enabled: Option<bool>,
}

impl UpdateSettingsRequest {
    /// Overlay the supplied fields on `current`.
    pub fn merge_into(self, current: AppSettings) -> AppSettings {
        AppSettings {
            auto_sync: self.auto_sync.unwrap_or(current.auto_sync),
            keep_synced_games: self.keep_synced_games.unwrap_or(current.keep_synced_games),
            default_period_duration: self
                .default_period_duration
                .unwrap_or(current.default_period_duration),
            default_shot_clock: self.default_shot_clock.unwrap_or(current.default_shot_clock),
            vibration_enabled: self.vibration_enabled.unwrap_or(current.vibration_enabled),
        }
    }
}
