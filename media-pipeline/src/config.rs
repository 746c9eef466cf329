use crate::decode::DecodeSettings;
use crate::encode::EncodeSettings;
use crate::error::{PipelineError, Result};
use common::{CodecConfig, MediaKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pipeline configuration for both media kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Video encode/decode settings
    #[serde(default = "MediaConfig::video_default")]
    pub video: MediaConfig,

    /// Audio encode/decode settings
    #[serde(default = "MediaConfig::audio_default")]
    pub audio: MediaConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-media codec and jitter buffer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Codec identifier string
    pub codec: String,

    /// Frame width (video only)
    pub width: Option<u32>,

    /// Frame height (video only)
    pub height: Option<u32>,

    /// Sample rate in Hz (audio only)
    pub sample_rate: Option<u32>,

    /// Channel count (audio only)
    pub channels: Option<u16>,

    /// Target bitrate in bps
    pub bitrate: u64,

    /// Frame rate (frames or audio packets per second)
    pub framerate: f64,

    /// Request a keyframe every N frames
    pub keyframe_interval: u64,

    /// Minimum time an object stays in the jitter buffer
    pub jitter_min_delay_ms: u64,

    /// Jitter buffer capacity in entries
    pub jitter_capacity: usize,

    /// Encoder queue depth above which frames are dropped
    pub max_encode_queue: usize,

    /// Playout tick interval
    pub playout_interval_ms: u64,

    /// Transport track alias
    pub track_alias: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video: MediaConfig::video_default(),
            audio: MediaConfig::audio_default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl MediaConfig {
    pub fn video_default() -> Self {
        Self {
            codec: "avc1.42001f".to_string(),
            width: Some(1280),
            height: Some(720),
            sample_rate: None,
            channels: None,
            bitrate: 2_000_000, // 2 Mbps
            framerate: 30.0,
            keyframe_interval: 60,
            jitter_min_delay_ms: 150,
            jitter_capacity: 256,
            max_encode_queue: 2,
            playout_interval_ms: 10,
            track_alias: 1,
        }
    }

    pub fn audio_default() -> Self {
        Self {
            codec: "opus".to_string(),
            width: None,
            height: None,
            sample_rate: Some(48_000),
            channels: Some(2),
            bitrate: 64_000, // 64 kbps
            framerate: 50.0, // 20ms packets
            keyframe_interval: 1,
            jitter_min_delay_ms: 60,
            jitter_capacity: 128,
            max_encode_queue: 8,
            playout_interval_ms: 5,
            track_alias: 2,
        }
    }

    /// Codec configuration handed to encoders and decoders
    pub fn codec_config(&self) -> CodecConfig {
        CodecConfig {
            codec: self.codec.clone(),
            width: self.width,
            height: self.height,
            bitrate: self.bitrate,
            framerate: self.framerate,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn encode_settings(&self, media: MediaKind) -> EncodeSettings {
        EncodeSettings::from_config(media, self)
    }

    pub fn decode_settings(&self, media: MediaKind) -> DecodeSettings {
        DecodeSettings::from_config(media, self)
    }

    /// Validate one media section
    pub fn validate(&self, media: MediaKind) -> Result<()> {
        let invalid = |message: String| Err(PipelineError::Config { message });

        if self.codec.is_empty() {
            return invalid(format!("{} codec cannot be empty", media));
        }

        if media == MediaKind::Video && (self.width.is_none() || self.height.is_none()) {
            return invalid("Video dimensions must be set".to_string());
        }

        if self.framerate <= 0.0 {
            return invalid(format!("{} frame rate must be greater than 0", media));
        }

        if self.keyframe_interval == 0 {
            return invalid(format!("{} keyframe interval must be greater than 0", media));
        }

        if self.jitter_capacity == 0 {
            return invalid(format!("{} jitter buffer capacity must be greater than 0", media));
        }

        if self.max_encode_queue == 0 {
            return invalid(format!("{} encode queue threshold must be greater than 0", media));
        }

        if self.playout_interval_ms == 0 {
            return invalid(format!("{} playout interval must be greater than 0", media));
        }

        Ok(())
    }
}

impl PipelineConfig {
    /// Load configuration from file, writing the defaults if it does not exist
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::Config {
                message: format!("Failed to read config file: {}", e),
            })?;

        let config: Self = toml::from_str(&content).map_err(|e| PipelineError::Config {
            message: format!("Failed to parse config file: {}", e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| PipelineError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.video.validate(MediaKind::Video)?;
        self.audio.validate(MediaKind::Audio)?;

        if self.video.track_alias == self.audio.track_alias {
            return Err(PipelineError::Config {
                message: "Video and audio track aliases must differ".to_string(),
            });
        }

        Ok(())
    }

    pub fn media(&self, media: MediaKind) -> &MediaConfig {
        match media {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.video.codec, "avc1.42001f");
        assert_eq!(config.audio.keyframe_interval, 1);
        assert!(config.audio.playout_interval_ms < config.video.playout_interval_ms);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = PipelineConfig::default();
        config.video.jitter_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.audio.keyframe_interval = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.video.width = None;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.audio.track_alias = config.video.track_alias;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_settings() {
        let config = PipelineConfig::default();

        let decode = config.video.decode_settings(MediaKind::Video);
        assert_eq!(decode.min_delay, Duration::from_millis(150));
        assert_eq!(decode.capacity, 256);
        assert_eq!(decode.playout_interval, Duration::from_millis(10));

        let encode = config.audio.encode_settings(MediaKind::Audio);
        assert_eq!(encode.track_alias, 2);
        assert_eq!(encode.max_queue_size, 8);

        let codec = config.audio.codec_config();
        assert_eq!(codec.sample_rate, Some(48_000));
        assert_eq!(codec.width, None);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("pipeline.toml");

        let mut config = PipelineConfig::default();
        config.video.jitter_min_delay_ms = 400;
        config.logging.level = "debug".to_string();
        config.save(&path).await.unwrap();

        let loaded = PipelineConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_missing_file_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline.toml");

        let config = PipelineConfig::load(&path).await.unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_partial_file_uses_fallbacks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline.toml");
        tokio::fs::write(&path, "[logging]\nlevel = \"warn\"\n")
            .await
            .unwrap();

        let config = PipelineConfig::load(&path).await.unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.video, MediaConfig::video_default());
        assert_eq!(config.audio, MediaConfig::audio_default());
    }

    #[tokio::test]
    async fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline.toml");
        tokio::fs::write(&path, "[video]\ncodec = 5\n").await.unwrap();

        assert!(matches!(
            PipelineConfig::load(&path).await,
            Err(PipelineError::Config { .. })
        ));
    }
}
