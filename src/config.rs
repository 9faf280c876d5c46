use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::error::Result;

lazy_static! {
    static ref CONFIG: RwLock<Config> = RwLock::new(Config::load());
}

const CONFIG_PATHS: [&str; 2] = ["./avcap.toml", "./config.toml"];

/// H.264 entropy coder selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropyMode {
    Cavlc,
    Cabac,
}

/// Requested H.264 profile; the level is always chosen by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileLevel {
    BaselineAutoLevel,
    MainAutoLevel,
    HighAutoLevel,
}

/// Compression session parameters. These are constants of the recording,
/// never derived from the frames that are submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoEncoderSettings {
    pub width: u32,
    pub height: u32,
    pub expected_frame_rate: u32,
    pub max_key_frame_interval_secs: f64,
    pub allow_frame_reordering: bool,
    pub entropy_mode: EntropyMode,
    pub profile_level: ProfileLevel,
    pub real_time: bool,
    /// `None` lets the session pick its own rate control.
    pub average_bitrate: Option<u32>,
}

impl Default for VideoEncoderSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            expected_frame_rate: 60,
            max_key_frame_interval_secs: 2.0,
            allow_frame_reordering: true,
            entropy_mode: EntropyMode::Cabac,
            profile_level: ProfileLevel::HighAutoLevel,
            real_time: true,
            average_bitrate: None,
        }
    }
}

impl VideoEncoderSettings {
    /// Maximum distance between key frames expressed in frames.
    pub fn max_key_frame_interval_frames(&self) -> u32 {
        (self.max_key_frame_interval_secs * self.expected_frame_rate as f64).round() as u32
    }
}

/// AAC output format produced by the audio encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEncoderSettings {
    pub sample_rate: u32,
    pub channels: u8,
    pub frames_per_packet: u32,
    pub bitrate: u32,
}

impl Default for AudioEncoderSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            frames_per_packet: 1024,
            bitrate: 192_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterSettings {
    /// When set no audio track is ever added and audio samples are ignored.
    pub audio_muted: bool,
    pub movie_timescale: u32,
    pub video_timescale: u32,
    /// Encoder delay trimmed from the start of the audio track, in audio frames.
    pub audio_priming_frames: u32,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            audio_muted: false,
            movie_timescale: 1000,
            video_timescale: 90_000,
            audio_priming_frames: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub endpoint: String,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            endpoint: String::from("http://127.0.0.1:3000/upload"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub video: VideoEncoderSettings,
    pub audio: AudioEncoderSettings,
    pub writer: WriterSettings,
    pub upload: UploadSettings,
}

impl Config {
    /// Parses a TOML document; missing tables and keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn load() -> Self {
        let mut config = Config::default();

        for path in &CONFIG_PATHS {
            let Ok(content) = std::fs::read_to_string(path) else {
                continue;
            };
            match Config::from_toml_str(&content) {
                Ok(parsed) => {
                    log::debug!("loaded configuration from {}", path);
                    config = parsed;
                    break;
                }
                Err(e) => log::warn!("ignoring unreadable config {}: {}", path, e),
            }
        }

        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var("AVCAP_UPLOAD_URL") {
            if !url.is_empty() {
                self.upload.endpoint = url;
            }
        }
        if let Ok(muted) = env::var("AVCAP_AUDIO_MUTED") {
            self.writer.audio_muted = matches!(muted.as_str(), "1" | "true" | "yes");
        }
    }

    pub fn reload() {
        let new_config = Config::load();
        *CONFIG.write() = new_config;
    }
}

/// Returns a copy of the process-wide configuration.
pub fn get() -> Config {
    CONFIG.read().clone()
}

/// Re-reads config files and environment into the process-wide configuration.
pub fn reload() {
    Config::reload();
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        std::fs::write(path, DEFAULT_TEMPLATE)?;
    }
    Ok(())
}

pub(crate) const DEFAULT_TEMPLATE: &str = r#"# avcap configuration
# Every key is optional; omitted keys keep their built-in defaults.

[video]
width = 1920
height = 1080
expected_frame_rate = 60
max_key_frame_interval_secs = 2.0
allow_frame_reordering = true
entropy_mode = "cabac"
profile_level = "high_auto_level"

[audio]
sample_rate = 44100
channels = 1
bitrate = 192000

[writer]
audio_muted = false

[upload]
endpoint = "http://127.0.0.1:3000/upload"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_recording_constants() {
        let config = Config::default();
        assert_eq!(config.video.width, 1920);
        assert_eq!(config.video.height, 1080);
        assert_eq!(config.video.expected_frame_rate, 60);
        assert_eq!(config.video.max_key_frame_interval_frames(), 120);
        assert_eq!(config.video.entropy_mode, EntropyMode::Cabac);
        assert!(config.video.allow_frame_reordering);
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.frames_per_packet, 1024);
        assert!(!config.writer.audio_muted);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [writer]
            audio_muted = true

            [video]
            expected_frame_rate = 30
            "#,
        )
        .unwrap();

        assert!(config.writer.audio_muted);
        assert_eq!(config.video.expected_frame_rate, 30);
        assert_eq!(config.video.width, 1920);
        assert_eq!(config.audio, AudioEncoderSettings::default());
    }

    #[test]
    fn test_template_parses() {
        let config = Config::from_toml_str(DEFAULT_TEMPLATE).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::from_toml_str("video = 3").is_err());
    }
}
