use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SETTINGS_FILE_NAME: &str = "settings.json";
const APP_DIR_NAME: &str = "voxdial";

/// Agent voice codes the backend accepts; anything else falls back to its
/// default voice server-side.
pub const VOICES: [&str; 4] = [
    "es-ES-Female",
    "es-ES-Male",
    "es-MX-Female",
    "es-US-Female",
];

/// Whether a voice code is one the backend maps to a real voice.
pub fn is_known_voice(code: &str) -> bool {
    VOICES.contains(&code)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// WebSocket URL of the voice-agent backend.
    pub server_url: String,

    /// Agent voice code sent with every audio chunk and on call start.
    pub voice: String,

    /// Conversation prompt identifier, when the backend offers several.
    pub prompt: Option<String>,

    /// Named input device; `None` uses the system default.
    pub input_device: Option<String>,

    /// Outbound capture slice cadence in milliseconds.
    pub capture_slice_ms: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            server_url: crate::transport::DEFAULT_SERVER_URL.to_string(),
            voice: "es-ES-Female".to_string(),
            prompt: None,
            input_device: None,
            capture_slice_ms: 250,
        }
    }
}

fn settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or("Could not determine config directory")?;
    Ok(dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings() -> AppSettings {
    let path = match settings_path() {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Settings: {}", e);
            return AppSettings::default();
        }
    };
    load_settings_from(&path)
}

/// Load from an explicit path. Any failure falls back to defaults; a broken
/// settings file must never stop the client from starting.
pub fn load_settings_from(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(settings: &AppSettings) -> Result<(), String> {
    let path = settings_path()?;
    save_settings_to(&path, settings)
}

pub fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write atomically: write to a temp file in the same directory, then rename.
    // This prevents partial/corrupt settings.json if the process dies mid-write.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Unix, rename will atomically replace the destination. On Windows, rename
    // fails if the destination exists, so we remove it first (ignoring NotFound).
    if cfg!(windows) {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(format!("Remove existing settings file {:?}: {}", path, e));
                }
            }
        }
    }

    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e)
    })?;
    Ok(())
}
