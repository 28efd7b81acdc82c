// Application settings
// Loaded from ~/.config/sumrec/settings.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Job and download store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Seconds a prepared job stays finalizable
    pub job_ttl_secs: u64,

    /// Seconds a produced workbook stays downloadable
    pub download_ttl_secs: u64,

    /// Where jobs and downloads are kept between invocations.
    /// None = platform data dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            job_ttl_secs: 60 * 60,
            download_ttl_secs: 15 * 60,
            state_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    /// Rows shown in the preview; the full sheet is still exported
    pub row_limit: usize,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self { row_limit: 1000 }
    }
}

/// Usersetting layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterSettings {
    /// 0-indexed header row of the usersetting export
    pub header_row: usize,

    /// Scan for the header row instead of trusting `header_row`
    pub detect_header: bool,
}

impl Default for RosterSettings {
    fn default() -> Self {
        Self {
            header_row: 6,
            detect_header: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Master workbook every finalized run is appended to. None = disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Allowed form values. Empty = free text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormSettings {
    pub algo_choices: Vec<String>,
    pub operator_choices: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub preview: PreviewSettings,
    pub roster: RosterSettings,
    pub ledger: LedgerSettings,
    pub form: FormSettings,
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sumrec")
            .join("settings.toml")
    }

    /// Load settings from the default path, falling back to defaults
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load settings from `path`. A missing file gives defaults silently,
    /// an unreadable or unparsable one gives defaults with a warning.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            log::debug!("no settings at {}, using defaults", path.display());
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml(&contents) {
                Ok(settings) => {
                    log::debug!("settings loaded from {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("error parsing {}: {}; using default settings", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("error reading {}: {}; using default settings", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, String> {
        toml::from_str(contents).map_err(|e| e.to_string())
    }

    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| e.to_string())
    }

    /// Write settings to `path`, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        fs::write(path, self.to_toml()?).map_err(|e| e.to_string())
    }

    /// Directory holding job and download state
    pub fn state_dir(&self) -> PathBuf {
        self.store.state_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("sumrec")
                .join("state")
        })
    }
}
