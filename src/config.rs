use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::arrangement::LayoutMode;
use crate::store::{LEGACY_FILE_NAME, RECORD_FILE_NAME};

/// Environment variable that overrides the pin record location.
pub const STORE_ENV: &str = "PINBOARD_STORE";

const SETTINGS_FILE_NAME: &str = "settings.json";
pub(crate) const DEFAULT_COLUMNS: u32 = 6;
const DEFAULT_DEBOUNCE_MS: u64 = 100;
const DEFAULT_SELF_WRITE_WINDOW_MS: u64 = 200;

/// Runtime configuration of a pin board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub store_path: PathBuf,
    /// Older flat-list file imported once into an empty store.
    pub legacy_path: Option<PathBuf>,
    /// Layout for a record that does not carry one yet. Once a record
    /// exists, its own layout wins.
    pub layout: LayoutMode,
    /// Column bound for placements that have no caller-supplied one
    /// (migration, removals, command-line pins).
    pub default_columns: u32,
    pub debounce: Duration,
    pub self_write_window: Duration,
}

/// On-disk settings; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Settings {
    layout: Option<LayoutMode>,
    default_columns: Option<u32>,
    debounce_ms: Option<u64>,
    self_write_window_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("", "", "pinboard")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self::at(data_dir.join(RECORD_FILE_NAME))
    }
}

impl Config {
    /// Defaults around an explicit record location. The legacy file is
    /// looked for next to it.
    pub fn at(store_path: impl Into<PathBuf>) -> Self {
        let store_path = store_path.into();
        let legacy_path = store_path.parent().map(|dir| dir.join(LEGACY_FILE_NAME));
        Self {
            store_path,
            legacy_path,
            layout: LayoutMode::default(),
            default_columns: DEFAULT_COLUMNS,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            self_write_window: Duration::from_millis(DEFAULT_SELF_WRITE_WINDOW_MS),
        }
    }

    /// Per-user configuration: the default location, the settings file from
    /// the config directory, then the `PINBOARD_STORE` override.
    pub fn load() -> Self {
        let mut config = Self::default();
        if let Some(dirs) = ProjectDirs::from("", "", "pinboard") {
            config.apply_settings_file(&dirs.config_dir().join(SETTINGS_FILE_NAME));
        }
        if let Some(path) = std::env::var_os(STORE_ENV) {
            config.relocate(PathBuf::from(path));
        }
        config
    }

    /// Move the record (and the legacy sibling) to another location.
    pub fn relocate(&mut self, store_path: PathBuf) {
        self.legacy_path = store_path.parent().map(|dir| dir.join(LEGACY_FILE_NAME));
        self.store_path = store_path;
    }

    /// Overlay settings from a JSON file. A missing file is silently
    /// skipped; an unreadable one is logged and skipped.
    pub fn apply_settings_file(&mut self, path: &Path) {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot read settings, using defaults");
                return;
            }
        };
        match serde_json::from_str::<Settings>(&text) {
            Ok(settings) => {
                debug!(path = %path.display(), ?settings, "applying settings");
                self.apply(settings);
            }
            Err(err) => warn!(path = %path.display(), %err, "malformed settings, using defaults"),
        }
    }

    fn apply(&mut self, settings: Settings) {
        if let Some(layout) = settings.layout {
            self.layout = layout;
        }
        if let Some(columns) = settings.default_columns {
            self.default_columns = columns.max(1);
        }
        if let Some(ms) = settings.debounce_ms {
            self.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = settings.self_write_window_ms {
            self.self_write_window = Duration::from_millis(ms);
        }
    }
}
