//! Local persisted state: a flat map of JSON values under fixed string keys,
//! kept in a single JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, SideStreamError};

/// Legacy keys and the keys that replaced them.
const KEY_MIGRATIONS: &[(&str, &str)] = &[
    ("sidestream_trend_interval", crate::settings::keys::TREND_INTERVAL),
    ("sidestream_search_interval", crate::settings::keys::SEARCH_INTERVAL),
    ("sidestream_theme_color", crate::settings::keys::THEME_COLOR),
    ("sidestream_bg_mode", crate::settings::keys::BG_MODE),
    ("sidestream_font_size", crate::settings::keys::FONT_SIZE),
    ("sidestream_ng_settings", crate::settings::keys::NG_SETTINGS),
    ("sidestream_ng_settings_v4", crate::settings::keys::NG_SETTINGS),
    ("sidestream_auto_refresh", crate::settings::keys::AUTO_REFRESH),
];

const MIGRATION_FLAG_KEY: &str = "sidestream_migration_v1_1_0_completed";

#[derive(Debug, Default)]
pub struct Storage {
    path: Option<PathBuf>,
    entries: BTreeMap<String, Value>,
}

impl Storage {
    /// Opens the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| SideStreamError::Storage(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = entries.len(), "opened storage");
        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Value under `key`, or `default` if it is missing or does not decode.
    pub fn load<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let Some(value) = self.entries.get(key) else {
            return default;
        };
        match serde_json::from_value(value.clone()) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "ignoring unreadable stored value");
                default
            }
        }
    }

    pub fn save<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value =
            serde_json::to_value(value).map_err(|e| SideStreamError::Storage(e.to_string()))?;
        self.entries.insert(key.to_owned(), value);
        self.flush()
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    /// Every stored key as one JSON document.
    pub fn export(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.entries)
            .map_err(|e| SideStreamError::Storage(e.to_string()))
    }

    /// Writes every key of an exported document, overwriting existing values.
    pub fn import(&mut self, document: &str) -> Result<usize> {
        let imported: BTreeMap<String, Value> =
            serde_json::from_str(document).map_err(|e| SideStreamError::Storage(e.to_string()))?;
        let count = imported.len();
        self.entries.extend(imported);
        self.flush()?;
        info!(count, "imported settings");
        Ok(count)
    }

    /// Moves values from legacy keys to their current names, once.
    ///
    /// A legacy value is only moved when the current key is unset; otherwise
    /// the legacy key is dropped.
    pub fn migrate(&mut self) -> Result<usize> {
        if self.entries.get(MIGRATION_FLAG_KEY) == Some(&Value::Bool(true)) {
            debug!("storage migration already done");
            return Ok(0);
        }

        let mut migrated = 0;
        for (old_key, new_key) in KEY_MIGRATIONS {
            let Some(value) = self.entries.remove(*old_key) else {
                continue;
            };
            if self.entries.contains_key(*new_key) {
                debug!(old_key, "dropped legacy key");
            } else {
                self.entries.insert((*new_key).to_owned(), value);
                info!(old_key, new_key, "migrated legacy key");
                migrated += 1;
            }
        }

        self.entries
            .insert(MIGRATION_FLAG_KEY.to_owned(), Value::Bool(true));
        self.flush()?;
        info!(migrated, "storage migration completed");
        Ok(migrated)
    }

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let text = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| SideStreamError::Storage(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
