use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Floor for the capture cadence accepted by `retune`.
pub const MIN_CAPTURE_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_POINTER_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialSettings {
    pub preferred_port: Option<String>,
    pub baud_rate: u32,
    pub reply_timeout_ms: u64,
    /// Pause after opening the port while the board resets.
    pub settle_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            preferred_port: None,
            baud_rate: 9600,
            reply_timeout_ms: 2_000,
            settle_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierSettings {
    pub model: String,
    /// Name of the environment variable holding the API key. The key itself is never stored.
    pub api_key_env: String,
    pub endpoint: String,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash-lite".into(),
            api_key_env: "GOOGLE_API_KEY".into(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".into(),
        }
    }
}

impl ClassifierSettings {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorSettings {
    pub capture_interval_ms: u64,
    pub pointer_interval_ms: u64,
    pub serial: SerialSettings,
    pub classifier: ClassifierSettings,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            capture_interval_ms: DEFAULT_CAPTURE_INTERVAL_MS,
            pointer_interval_ms: DEFAULT_POINTER_INTERVAL_MS,
            serial: SerialSettings::default(),
            classifier: ClassifierSettings::default(),
        }
    }
}

impl MonitorSettings {
    pub fn normalized(mut self) -> Self {
        if self.capture_interval_ms < MIN_CAPTURE_INTERVAL_MS {
            warn!(
                "stored capture interval {}ms is below {}ms; clamping",
                self.capture_interval_ms, MIN_CAPTURE_INTERVAL_MS
            );
            self.capture_interval_ms = MIN_CAPTURE_INTERVAL_MS;
        }
        if self.pointer_interval_ms == 0 {
            self.pointer_interval_ms = DEFAULT_POINTER_INTERVAL_MS;
        }
        self
    }
}

/// JSON-backed settings file in the app data directory.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<MonitorSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))
                .and_then(|contents| Ok(serde_json::from_str::<MonitorSettings>(&contents)?))
                .unwrap_or_else(|err| {
                    warn!("ignoring settings at {}: {err:#}", path.display());
                    MonitorSettings::default()
                })
                .normalized()
        } else {
            MonitorSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> MonitorSettings {
        self.read().clone()
    }

    pub fn update_capture_interval(&self, interval_ms: u64) -> Result<()> {
        let mut guard = self.write();
        guard.capture_interval_ms = interval_ms;
        self.persist(&guard)
    }

    pub fn update_preferred_port(&self, port: &str) -> Result<()> {
        let mut guard = self.write();
        if guard.serial.preferred_port.as_deref() == Some(port) {
            return Ok(());
        }
        guard.serial.preferred_port = Some(port.to_string());
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, MonitorSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MonitorSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &MonitorSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
