use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ng::NgSettings;
use crate::storage::Storage;

pub mod keys {
    pub const AUTO_REFRESH: &str = "sidestream_settings_autoRefresh";
    pub const TREND_INTERVAL: &str = "sidestream_settings_trendInterval";
    pub const SEARCH_INTERVAL: &str = "sidestream_settings_searchInterval";
    pub const THEME_COLOR: &str = "sidestream_settings_themeColor";
    pub const BG_MODE: &str = "sidestream_settings_bgMode";
    pub const FONT_SIZE: &str = "sidestream_settings_fontSize";
    pub const NG_SETTINGS: &str = "sidestream_ng_settings_v5";
    pub const SEARCH_HISTORY: &str = "sidestream_search_history";
}

pub const TREND_INTERVAL_OPTIONS_MS: [u64; 4] = [60_000, 180_000, 300_000, 600_000];
pub const SEARCH_INTERVAL_OPTIONS_MS: [u64; 4] = [1_000, 3_000, 5_000, 10_000];

pub const DEFAULT_TREND_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_SEARCH_INTERVAL_MS: u64 = 5_000;

pub const MAX_HISTORY: usize = 20;

/// User-tunable refresh and filter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub auto_refresh: bool,
    pub trend_interval_ms: u64,
    pub search_interval_ms: u64,
    pub ng: NgSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_refresh: true,
            trend_interval_ms: DEFAULT_TREND_INTERVAL_MS,
            search_interval_ms: DEFAULT_SEARCH_INTERVAL_MS,
            ng: NgSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(storage: &Storage) -> Self {
        let defaults = Self::default();
        Self {
            auto_refresh: storage.load(keys::AUTO_REFRESH, defaults.auto_refresh),
            trend_interval_ms: storage.load(keys::TREND_INTERVAL, defaults.trend_interval_ms),
            search_interval_ms: storage.load(keys::SEARCH_INTERVAL, defaults.search_interval_ms),
            ng: storage.load(keys::NG_SETTINGS, defaults.ng),
        }
    }

    pub fn save(&self, storage: &mut Storage) -> Result<()> {
        storage.save(keys::AUTO_REFRESH, &self.auto_refresh)?;
        storage.save(keys::TREND_INTERVAL, &self.trend_interval_ms)?;
        storage.save(keys::SEARCH_INTERVAL, &self.search_interval_ms)?;
        storage.save(keys::NG_SETTINGS, &self.ng)
    }

    pub fn trend_interval(&self) -> Duration {
        Duration::from_millis(self.trend_interval_ms.max(1))
    }

    pub fn search_interval(&self) -> Duration {
        Duration::from_millis(self.search_interval_ms.max(1))
    }
}

/// Most recent searches first, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchHistory(Vec<String>);

impl SearchHistory {
    pub fn load(storage: &Storage) -> Self {
        storage.load(keys::SEARCH_HISTORY, Self::default())
    }

    pub fn save(&self, storage: &mut Storage) -> Result<()> {
        storage.save(keys::SEARCH_HISTORY, self)
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    /// Moves `keyword` to the front. Blank keywords are ignored.
    pub fn add(&mut self, keyword: &str) {
        if keyword.trim().is_empty() {
            return;
        }
        self.0.retain(|k| k != keyword);
        self.0.insert(0, keyword.to_owned());
        self.0.truncate(MAX_HISTORY);
    }

    pub fn remove(&mut self, keyword: &str) {
        self.0.retain(|k| k != keyword);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}
