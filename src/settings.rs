// ============================================================================
// SETTINGS — user preferences persisted as TOML
// ============================================================================

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SettingsError;
use crate::gpu::UrlResolver;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Generation server that also serves `/images/{user}/...`.
    pub server_url: String,
    /// Image namespace on the server.
    pub user: String,
    /// `"high performance"` or `"low power"`.
    pub preferred_gpu: String,
    /// Overrides the default scene file location.
    pub scene_path: Option<PathBuf>,
    /// Seconds between autosaves of a dirty scene (0 = disabled).
    pub autosave_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5000".to_string(),
            user: "default".to_string(),
            preferred_gpu: "high performance".to_string(),
            scene_path: None,
            autosave_secs: 2,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/seed-canvas/settings.toml  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\seed-canvas\settings.toml
    /// On macOS:   ~/Library/Application Support/seed-canvas/settings.toml
    pub fn settings_path() -> PathBuf {
        config_dir().join("settings.toml")
    }

    /// Where the scene lives unless `scene_path` says otherwise.
    pub fn scene_file(&self) -> PathBuf {
        self.scene_path
            .clone()
            .unwrap_or_else(|| config_dir().join("scene.json"))
    }

    pub fn resolver(&self) -> UrlResolver {
        UrlResolver::new(self.server_url.clone(), self.user.clone())
    }

    /// Load from the default location; a missing or unreadable file yields
    /// defaults.
    pub fn load() -> Self {
        let path = Self::settings_path();
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(SettingsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no settings at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("ignoring settings at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&Self::settings_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("seed-canvas")
    }
    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
        PathBuf::from(home)
            .join("Library")
            .join("Application Support")
            .join("seed-canvas")
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                PathBuf::from(home).join(".config")
            })
            .join("seed-canvas")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_server() {
        let s = AppSettings::default();
        assert_eq!(s.server_url, "http://localhost:5000");
        assert_eq!(s.user, "default");
        assert_eq!(s.autosave_secs, 2);
        assert_eq!(s.resolver().resolve("a.png"), "http://localhost:5000/images/default/a.png");
    }

    #[test]
    fn saves_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("settings.toml");
        let settings = AppSettings {
            user: "alice".into(),
            scene_path: Some(dir.path().join("s.json")),
            ..Default::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(AppSettings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "user = \"bob\"\n").unwrap();
        let s = AppSettings::load_from(&path).unwrap();
        assert_eq!(s.user, "bob");
        assert_eq!(s.server_url, "http://localhost:5000");
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "user = [unclosed").unwrap();
        assert!(matches!(AppSettings::load_from(&path), Err(SettingsError::Parse(_))));
    }
}
