//! Client settings: backend base URL, demo-mode flag and greeting toggle.
//!
//! Resolution order: built-in defaults, then the persisted
//! `<data dir>/settings.json`, then environment variables (a `.env` file is
//! honoured through dotenvy). Values set at runtime through
//! [`SettingsStore`] win over the environment for the fields they set; the
//! other environment overrides stay in effect.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::stream::Channel;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const ENV_API_BASE_URL: &str = "TRAINWATCH_API_BASE_URL";
pub const ENV_DEMO_MODE: &str = "TRAINWATCH_DEMO_MODE";
pub const ENV_DATA_DIR: &str = "TRAINWATCH_DATA_DIR";
const SETTINGS_FILE: &str = "settings.json";

/// Reads one environment variable.
pub type EnvLookup = fn(&str) -> Option<String>;

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid API base URL '{0}': expected http:// or https://")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    pub demo_mode: bool,
    /// Publish the assistant's greeting shortly after start.
    pub greeting: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            demo_mode: false,
            greeting: true,
        }
    }
}

impl Settings {
    pub fn demo() -> Self {
        Self {
            demo_mode: true,
            ..Self::default()
        }
    }

    /// Base URL without trailing slashes, validated.
    pub fn api_base(&self) -> Result<String, SettingsError> {
        normalize_base_url(&self.api_base_url)
    }

    /// WebSocket endpoint for `channel`: `http→ws`, `https→wss`.
    pub fn channel_url(&self, channel: Channel) -> Result<String, SettingsError> {
        let base = self.api_base()?;
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(SettingsError::InvalidUrl(base));
        };
        Ok(format!("{ws_base}{}", channel.path()))
    }

    /// Override fields from `TRAINWATCH_*` variables.
    fn apply_env(&mut self, env: EnvLookup) {
        if let Some(url) = env(ENV_API_BASE_URL) {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                self.api_base_url = trimmed.to_string();
            }
        }
        if let Some(flag) = env(ENV_DEMO_MODE) {
            self.demo_mode = parse_flag(&flag);
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn normalize_base_url(raw: &str) -> Result<String, SettingsError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let valid = ["http://", "https://"]
        .iter()
        .any(|scheme| trimmed.len() > scheme.len() && trimmed.starts_with(scheme));
    if !valid {
        return Err(SettingsError::InvalidUrl(raw.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Application data directory: `TRAINWATCH_DATA_DIR`, else `%APPDATA%\Trainwatch`
/// on Windows, else `$HOME/.trainwatch`.
pub fn data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(ENV_DATA_DIR) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(app_data) = std::env::var("APPDATA") {
            return PathBuf::from(app_data).join("Trainwatch");
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".trainwatch");
    }

    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".trainwatch");
    }

    PathBuf::from(".trainwatch")
}

/// Fields set at runtime in this process.
#[derive(Debug, Default)]
struct Pinned {
    api_base_url: Option<String>,
    demo_mode: Option<bool>,
}

/// Persisted settings file plus the environment it is overlaid with.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    env: EnvLookup,
    pinned: Arc<Mutex<Pinned>>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env: process_env,
            pinned: Arc::new(Mutex::new(Pinned::default())),
        }
    }

    /// Read overrides through `env` instead of the process environment.
    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    pub fn in_data_dir() -> Self {
        Self::new(data_dir().join(SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted settings; a missing file yields the defaults.
    pub fn load(&self) -> Result<Settings, SettingsError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let raw = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, raw).map_err(|source| self.io_error(source))
    }

    /// Persisted settings with environment and runtime overrides applied.
    pub fn resolve(&self) -> Result<Settings, SettingsError> {
        let mut settings = self.load()?;
        self.overlay(&mut settings);
        Ok(settings)
    }

    fn overlay(&self, settings: &mut Settings) {
        settings.apply_env(self.env);
        let pinned = self.pinned.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(url) = &pinned.api_base_url {
            settings.api_base_url = url.clone();
        }
        if let Some(enabled) = pinned.demo_mode {
            settings.demo_mode = enabled;
        }
    }

    fn pin(&self, edit: impl FnOnce(&mut Pinned)) {
        let mut pinned = self.pinned.lock().unwrap_or_else(|p| p.into_inner());
        edit(&mut *pinned);
    }

    /// Validate and persist a new base URL. Returns the effective settings.
    pub fn set_api_base_url(&self, url: &str) -> Result<Settings, SettingsError> {
        let url = normalize_base_url(url)?;
        self.update(|settings| settings.api_base_url = url.clone())?;
        tracing::info!("API base URL set to {url}");
        self.pin(|pinned| pinned.api_base_url = Some(url));
        self.resolve()
    }

    /// Persist the demo flag. Returns the effective settings.
    pub fn set_demo_mode(&self, enabled: bool) -> Result<Settings, SettingsError> {
        self.update(|settings| settings.demo_mode = enabled)?;
        tracing::info!("demo mode {}", if enabled { "enabled" } else { "disabled" });
        self.pin(|pinned| pinned.demo_mode = Some(enabled));
        self.resolve()
    }

    fn update(&self, edit: impl FnOnce(&mut Settings)) -> Result<(), SettingsError> {
        let mut persisted = self.load()?;
        edit(&mut persisted);
        self.save(&persisted)
    }

    fn io_error(&self, source: std::io::Error) -> SettingsError {
        SettingsError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

/// Resolve the effective settings for this process. A corrupt settings file
/// is logged and replaced by the defaults.
pub fn load_settings(store: &SettingsStore) -> Settings {
    let _ = dotenvy::dotenv();
    let mut settings = store.load().unwrap_or_else(|e| {
        tracing::warn!("ignoring persisted settings: {e}");
        Settings::default()
    });
    store.overlay(&mut settings);
    settings
}
