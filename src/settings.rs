//! Persistent user settings.
//!
//! Stored as `settings.json` next to the data file. A missing file yields the
//! defaults; an unreadable one is logged and replaced by the defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::session::{Actor, ContextIds};

pub const SETTINGS_FILE: &str = "settings.json";
pub const DATA_FILE: &str = "church_admin.json";
pub const POSTAL_FILE: &str = "postal_codes.json";
pub const LOG_FILE: &str = "chm.log";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub actor: Actor,
    /// Rows per page in list views.
    pub page_size: usize,
    /// Idle time before a search keystroke triggers a fetch.
    pub search_debounce_ms: u64,
    pub active: ContextIds,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            actor: Actor::default(),
            page_size: 20,
            search_debounce_ms: 500,
            active: ContextIds::default(),
        }
    }
}

impl Settings {
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Settings::default();
        }
        match fs::read_to_string(&path).map(|s| serde_json::from_str::<Settings>(&s)) {
            Ok(Ok(settings)) => settings,
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "invalid settings file, using defaults");
                Settings::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read settings, using defaults");
                Settings::default()
            }
        }
    }

    pub fn save(&self, data_dir: &Path) -> std::io::Result<()> {
        let data = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(data_dir.join(SETTINGS_FILE), data)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

/// Default data directory: `$HOME/.chm`.
pub fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".chm")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::SystemRole;

    #[test]
    fn test_missing_and_partial_settings_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Settings::load(dir.path()), Settings::default());

        fs::write(dir.path().join(SETTINGS_FILE), r#"{"page_size": 50}"#).unwrap();
        let settings = Settings::load(dir.path());
        assert_eq!(settings.page_size, 50);
        assert_eq!(settings.search_debounce_ms, 500);
    }

    #[test]
    fn test_round_trip_keeps_actor_and_context() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.actor.role = SystemRole::Secretary;
        settings.active.church_id = Some(3);
        settings.save(dir.path()).unwrap();
        assert_eq!(Settings::load(dir.path()), settings);
    }
}
