pub mod capture;
pub mod display;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod stream;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::{FrameSource, LiveSource, RawFrame};
pub use display::DisplaySink;
pub use error::Error;
pub use normalize::{NormalizedFrame, Normalizer};
pub use pipeline::{Pipeline, PipelineState};
pub use stream::{ChannelConfig, ResultPayload, StreamingChannel};

/// Environment prefix for configuration overrides, e.g. `FRAMECAST__CHANNEL__MODEL_ID`.
pub const ENV_PREFIX: &str = "FRAMECAST";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub normalize: NormalizeConfig,
    pub channel: ChannelSettings,
    pub pipeline: PipelineConfig,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    V4l2,
    Pattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Empty means auto-detect.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub target_size: u32,
    /// Lossy encoder quality in `(0, 1]`.
    pub quality: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Websocket,
    Loopback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub kind: ChannelKind,
    pub endpoint: String,
    pub model_id: String,
    pub connection_key: String,
    pub throttle_interval_ms: u64,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub reconnect_max_secs: u64,
    pub outbound_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tick_interval_ms: u64,
    pub start_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Drop results that arrive while streaming is stopped.
    pub suppress_late_results: bool,
    pub window: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::V4l2,
            device: String::new(),
            width: 1280,
            height: 720,
            fps: 30,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
        }
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            target_size: 512,
            quality: 0.7,
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            kind: ChannelKind::Websocket,
            endpoint: "wss://fal.run".into(),
            model_id: "fal-ai/birefnet".into(),
            connection_key: "birefnet-demo".into(),
            // The capture tick is the only throttle.
            throttle_interval_ms: 0,
            api_key_env: "FAL_KEY".into(),
            reconnect_max_secs: 30,
            outbound_capacity: 1,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            start_enabled: false,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            suppress_late_results: false,
            window: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "framecast=info".into(),
        }
    }
}

impl Config {
    /// Load defaults, then the optional TOML file, then `FRAMECAST__*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

impl ChannelSettings {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            endpoint: self.endpoint.clone(),
            model_id: self.model_id.clone(),
            connection_key: self.connection_key.clone(),
            throttle_interval: Duration::from_millis(self.throttle_interval_ms),
            api_key: std::env::var(&self.api_key_env).ok(),
            reconnect_max: Duration::from_secs(self.reconnect_max_secs.max(2)),
            outbound_capacity: self.outbound_capacity.max(1),
        }
    }
}

impl PipelineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_values() {
        let config = Config::default();
        assert_eq!(config.normalize.target_size, 512);
        assert!((config.normalize.quality - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.pipeline.tick_interval_ms, 16);
        assert_eq!(config.channel.throttle_interval_ms, 0);
        assert_eq!(config.channel.model_id, "fal-ai/birefnet");
        assert_eq!(config.channel.connection_key, "birefnet-demo");
        assert!(!config.display.suppress_late_results);
        assert!(config.capture.device.is_empty());
    }

    #[test]
    fn load_partial_toml_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[capture]
source = "pattern"
width = 640
height = 480

[channel]
kind = "loopback"
throttle_interval_ms = 5
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.capture.source, SourceKind::Pattern);
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.capture.fps, 30);
        assert_eq!(config.capture.device, "");
        assert_eq!(config.channel.kind, ChannelKind::Loopback);
        assert_eq!(config.channel.throttle_interval_ms, 5);
        assert_eq!(config.normalize.target_size, 512);
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/framecast.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn channel_config_clamps_capacity() {
        let mut settings = ChannelSettings::default();
        settings.outbound_capacity = 0;
        settings.api_key_env = "FRAMECAST_TEST_UNSET_KEY".into();
        let cfg = settings.channel_config();
        assert_eq!(cfg.outbound_capacity, 1);
        assert_eq!(cfg.throttle_interval, Duration::ZERO);
        assert!(cfg.api_key.is_none());
    }
}
