// src/config.rs
use crate::error::MixerError;
use serde::{Deserialize, Serialize};
use sound_primitives::Volume;
use std::path::Path;

/// Mixer settings, loadable from YAML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Number of channel slots.
    pub channel_slots: usize,

    /// Largest block mixed in one pass; bigger requests are split.
    /// Also sizes the wrap guard of every stream buffer.
    pub max_frames_per_tick: usize,

    pub volume: Volume,
    pub music_volume: Volume,
    pub output: OutputConfig,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            channel_slots: 16,
            max_frames_per_tick: 2048,
            volume: Volume::UNITY,
            music_volume: Volume::UNITY,
            output: OutputConfig::default(),
        }
    }
}

/// Device settings. `None` leaves the choice to the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub sample_rate: Option<u32>,
    pub buffer_frames: Option<u32>,
}

impl MixerConfig {
    /// Load from `path`. A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MixerError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No mixer config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&contents)?;
        tracing::info!("Loaded mixer config from {:?}", path);
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, MixerError> {
        Ok(serde_yaml::from_str(contents)?)
    }
}
