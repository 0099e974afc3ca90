use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings io: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings parse: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read-only snapshot of the application settings a job needs. Cloned into
/// each job at construction; later edits do not affect running jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    /// Profile id used when a job builds its own profile.
    pub current_profile: String,
    /// Rendering threads handed to consumers.
    pub render_threads: u32,
    /// How a job's target height is turned into a frame size.
    pub resize: ResizePolicy,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self { current_profile: "atsc_1080p_25".to_string(), render_threads: 1, resize: ResizePolicy::default() }
    }
}

/// Aspect ratio the width is derived from when a profile is resized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeAspect {
    /// `width = height * display aspect`, keeps the picture's shape.
    #[default]
    Display,
    /// `width = height * sample aspect`, the engine's historic behaviour.
    Sample,
}

/// When the resize happens for a profile taken from the clip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeOrder {
    /// Resize the placeholder; adopting the clip's parameters then replaces
    /// the size.
    BeforeMedia,
    #[default]
    AfterMedia,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizePolicy {
    pub aspect: ResizeAspect,
    pub order: ResizeOrder,
}

impl ProjectSettings {
    pub fn default_path() -> PathBuf { crate::app_data_dir().join("settings.json") }

    /// Missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() { return Ok(Self::default()); }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(dir) = path.parent() { fs::create_dir_all(dir)?; }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Value for a consumer's `real_time` property. Negative asks the engine
    /// for that many rendering threads without frame dropping.
    pub fn consumer_real_time(&self) -> i64 { -(self.render_threads as i64) }
}
