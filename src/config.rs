use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LooperError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "looper.toml";

/// Top-level configuration, loaded from TOML. Every field has a default so an
/// empty or partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    pub audio: AudioSection,
    pub buttons: ButtonSection,
    pub takes: TakeSection,
    /// Period of the control-path housekeeping tick in milliseconds.
    pub tick_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per callback block.
    pub block_size: u32,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonSection {
    pub debounce_ms: u64,
    pub long_press_ms: u64,
    pub poll_interval_ms: u64,
    /// How long a key counts as held after its last press/repeat report, for
    /// terminals that never send key release events.
    pub key_hold_ms: u64,
    pub keys: KeyMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyMap {
    pub record: char,
    pub mute: char,
    pub play_stop: char,
    pub exit: char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    Float32,
    Int16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TakeSection {
    pub dir: PathBuf,
    pub persist: bool,
    pub encoding: SampleEncoding,
    /// Frames per preallocated take chunk.
    pub chunk_frames: usize,
    /// Spare chunks kept ready for the capture callback.
    pub spare_chunks: usize,
    /// Longest take in seconds; capture beyond it is dropped and counted.
    pub max_take_secs: u32,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            audio: AudioSection::default(),
            buttons: ButtonSection::default(),
            takes: TakeSection::default(),
            tick_ms: 20,
        }
    }
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            block_size: 1024,
            input_device: None,
            output_device: None,
        }
    }
}

impl Default for ButtonSection {
    fn default() -> Self {
        Self {
            debounce_ms: 150,
            long_press_ms: 3000,
            poll_interval_ms: 10,
            key_hold_ms: 600,
            keys: KeyMap::default(),
        }
    }
}

impl Default for KeyMap {
    fn default() -> Self {
        Self {
            record: 'r',
            mute: 'm',
            play_stop: 'p',
            exit: 'x',
        }
    }
}

impl Default for TakeSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("loops"),
            persist: true,
            encoding: SampleEncoding::Float32,
            chunk_frames: 4096,
            spare_chunks: 32,
            max_take_secs: 600,
        }
    }
}

impl ButtonSection {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn long_press(&self) -> Duration {
        Duration::from_millis(self.long_press_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn key_hold(&self) -> Duration {
        Duration::from_millis(self.key_hold_ms)
    }

    /// Long-press hold for help text, e.g. `3s` or `2.5s`.
    pub fn long_press_label(&self) -> String {
        format!("{}s", self.long_press().as_secs_f64())
    }
}

impl TakeSection {
    /// Chunks needed to hold a take of `max_take_secs` at `sample_rate`.
    pub fn max_chunks(&self, sample_rate: u32) -> usize {
        let frames = self.max_take_secs as usize * sample_rate as usize;
        frames.div_ceil(self.chunk_frames.max(1))
    }
}

impl LooperConfig {
    /// Load from an explicit path, or from `looper.toml` in the working
    /// directory if present, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path
            }
        };

        let text = std::fs::read_to_string(&path)
            .map_err(|e| LooperError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| LooperError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(LooperError::Config("sample_rate must be > 0".into()));
        }
        if !(1..=2).contains(&self.audio.channels) {
            return Err(LooperError::Config(format!(
                "channels must be 1 or 2, got {}",
                self.audio.channels
            )));
        }
        if self.audio.block_size == 0 {
            return Err(LooperError::Config("block_size must be > 0".into()));
        }
        if self.buttons.poll_interval_ms == 0 {
            return Err(LooperError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.buttons.debounce_ms >= self.buttons.long_press_ms {
            return Err(LooperError::Config(
                "debounce_ms must be shorter than long_press_ms".into(),
            ));
        }
        if self.takes.chunk_frames == 0 || self.takes.spare_chunks == 0 {
            return Err(LooperError::Config(
                "chunk_frames and spare_chunks must be > 0".into(),
            ));
        }
        if self.takes.max_take_secs == 0 {
            return Err(LooperError::Config("max_take_secs must be > 0".into()));
        }
        if self.tick_ms == 0 {
            return Err(LooperError::Config("tick_ms must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = LooperConfig::from_toml_str("").unwrap();
        assert_eq!(config, LooperConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = LooperConfig::from_toml_str(
            r#"
            [audio]
            channels = 1

            [buttons]
            debounce_ms = 100
            keys = { record = "a" }

            [takes]
            encoding = "int16"
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.buttons.debounce_ms, 100);
        assert_eq!(config.buttons.long_press_ms, 3000);
        assert_eq!(config.buttons.keys.record, 'a');
        assert_eq!(config.buttons.keys.exit, 'x');
        assert_eq!(config.takes.encoding, SampleEncoding::Int16);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(LooperConfig::from_toml_str("[audio]\nchannels = 6").is_err());
        assert!(LooperConfig::from_toml_str("[buttons]\ndebounce_ms = 5000").is_err());
        assert!(LooperConfig::from_toml_str("[takes]\nchunk_frames = 0").is_err());
        assert!(LooperConfig::from_toml_str("tick_ms = \"fast\"").is_err());
    }

    #[test]
    fn test_derived_values() {
        let mut config = LooperConfig::default();
        assert_eq!(config.buttons.long_press_label(), "3s");
        config.buttons.long_press_ms = 2500;
        assert_eq!(config.buttons.long_press_label(), "2.5s");

        config.takes.chunk_frames = 4096;
        config.takes.max_take_secs = 1;
        assert_eq!(config.takes.max_chunks(48000), 12);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = LooperConfig::load(Some(Path::new("/nonexistent/looper.toml")));
        assert!(matches!(result, Err(LooperError::Config(_))));
    }
}
