// src/config.rs - Runtime settings, stored as JSON
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::trigger::TriggerPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub device: DeviceConfig,
    pub dispatch: DispatchConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Flip frames horizontally so the preview behaves like a mirror.
    pub mirror: bool,
}

/// External hand landmark helper process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Program and leading arguments.
    pub command: Vec<String>,
    pub min_detection_confidence: f64,
    pub min_tracking_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub adb_path: String,
    pub serial: Option<String>,
    /// Pause between the two key presses of the screenshot chord.
    pub screenshot_press_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub trigger: TriggerPolicy,
    /// Run device commands on per-action worker threads instead of inline.
    pub fire_and_forget: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub export_csv: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            fps: 30,
            mirror: true,
        }
    }
}

/// MediaPipe helper shipped with the crate.
pub const BUNDLED_DETECTOR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/helpers/hand_landmarks.py");

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string(), BUNDLED_DETECTOR.to_string()],
            min_detection_confidence: 0.7,
            min_tracking_confidence: 0.7,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            serial: None,
            screenshot_press_delay_ms: 100,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: directories::UserDirs::new()
                .and_then(|dirs| dirs.document_dir().map(|p| p.join("GestureRemote")))
                .unwrap_or_else(|| PathBuf::from("./output")),
            export_csv: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        if self.camera.fps == 0 {
            return Err(ConfigError::Invalid("camera fps must be > 0".to_string()));
        }
        if self.detector.command.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid("detector command must not be empty".to_string()));
        }
        for (name, value) in [
            ("min_detection_confidence", self.detector.min_detection_confidence),
            ("min_tracking_confidence", self.detector.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.device.adb_path.trim().is_empty() {
            return Err(ConfigError::Invalid("adb_path must not be empty".to_string()));
        }
        if self.device.serial.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(ConfigError::Invalid("device serial must not be blank".to_string()));
        }
        if let TriggerPolicy::Cooldown { cooldown_ms: 0 } = self.dispatch.trigger {
            return Err(ConfigError::Invalid("cooldown_ms must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the default file, or defaults when there is none.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "gesture-remote")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
