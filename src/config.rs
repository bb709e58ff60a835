//! Configuration
//!
//! Timeouts, the negotiated stream format and the client identity sent to the
//! audio server. Stored as TOML under the user's config directory; every
//! field has a default so a missing or partial file is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::server::{keys, FormatParams, Properties, SampleFormat};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub client: ClientConfig,
    pub timeouts: TimeoutConfig,
    pub format: FormatConfig,
}

/// Identity announced when opening the connection context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub app_name: String,
    pub process_binary: String,
    pub remote_name: String,
    /// Client configuration file the server should apply (real-time profile)
    pub config_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_name: "beacn-link".into(),
            process_binary: "beacn".into(),
            remote_name: "pipewire-0".into(),
            config_name: "client-rt.conf".into(),
        }
    }
}

impl ClientConfig {
    /// Connection context properties
    pub fn properties(&self) -> Properties {
        Properties::new()
            .with(keys::CONFIG_NAME, self.config_name.as_str())
            .with(keys::APP_NAME, self.app_name.as_str())
            .with(keys::APP_PROCESS_BINARY, self.process_binary.as_str())
            .with(keys::REMOTE_NAME, self.remote_name.as_str())
    }
}

/// Bounded waits, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    pub stream_ready_ms: u64,
    pub batch_ms: u64,
    pub disconnect_ms: u64,
    pub confirmation_ms: u64,
    /// Pause between devices during batch creation
    pub device_spacing_ms: u64,
    /// Re-check interval for waits on server-side state
    pub poll_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            stream_ready_ms: DEFAULT_STREAM_READY_TIMEOUT_MS,
            batch_ms: DEFAULT_BATCH_TIMEOUT_MS,
            disconnect_ms: DEFAULT_DISCONNECT_TIMEOUT_MS,
            confirmation_ms: DEFAULT_CONFIRMATION_TIMEOUT_MS,
            device_spacing_ms: DEFAULT_DEVICE_SPACING_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn stream_ready(&self) -> Duration {
        Duration::from_millis(self.stream_ready_ms)
    }

    pub fn batch(&self) -> Duration {
        Duration::from_millis(self.batch_ms)
    }

    pub fn disconnect(&self) -> Duration {
        Duration::from_millis(self.disconnect_ms)
    }

    pub fn confirmation(&self) -> Duration {
        Duration::from_millis(self.confirmation_ms)
    }

    pub fn device_spacing(&self) -> Duration {
        Duration::from_millis(self.device_spacing_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Short timeouts for tests and demos against the simulated server
    pub fn fast() -> Self {
        Self {
            connect_ms: 500,
            stream_ready_ms: 500,
            batch_ms: 2000,
            disconnect_ms: 100,
            confirmation_ms: 200,
            device_spacing_ms: 0,
            poll_interval_ms: 2,
        }
    }
}

/// Stream format and buffer geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffers: u32,
    pub frames_per_buffer: u32,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            buffers: DEFAULT_BUFFERS,
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER,
        }
    }
}

impl FormatConfig {
    pub fn params(&self) -> FormatParams {
        FormatParams {
            format: SampleFormat::F32,
            channels: self.channels,
            rate: self.sample_rate,
            buffers: self.buffers,
            frames_per_buffer: self.frames_per_buffer,
        }
    }
}

impl LinkConfig {
    /// Default config with [`TimeoutConfig::fast`] timeouts
    pub fn fast() -> Self {
        Self {
            timeouts: TimeoutConfig::fast(),
            ..Default::default()
        }
    }

    /// `<config dir>/beacn-link/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "beacn", "beacn-link")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: LinkConfig =
            toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from [`LinkConfig::default_path`], falling back to defaults when absent
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.timeouts;
        let waits = [
            ("connect_ms", t.connect_ms),
            ("stream_ready_ms", t.stream_ready_ms),
            ("batch_ms", t.batch_ms),
            ("disconnect_ms", t.disconnect_ms),
            ("confirmation_ms", t.confirmation_ms),
        ];
        if let Some((name, _)) = waits.iter().find(|(_, v)| *v == 0) {
            return Err(Error::Config(format!("timeouts.{name} must be non-zero")));
        }
        if t.batch_ms < t.stream_ready_ms {
            return Err(Error::Config(
                "timeouts.batch_ms must be at least timeouts.stream_ready_ms".into(),
            ));
        }

        let f = &self.format;
        if f.sample_rate == 0 || f.channels == 0 || f.buffers == 0 || f.frames_per_buffer == 0 {
            return Err(Error::Config("format values must be non-zero".into()));
        }
        if self.client.app_name.is_empty() {
            return Err(Error::Config("client.app_name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = LinkConfig::default();
        assert_eq!(config.timeouts.connect(), Duration::from_secs(5));
        assert_eq!(config.timeouts.stream_ready(), Duration::from_secs(5));
        assert_eq!(config.timeouts.batch(), Duration::from_secs(10));
        assert_eq!(config.timeouts.disconnect(), Duration::from_secs(1));
        assert_eq!(config.timeouts.confirmation(), Duration::from_secs(2));
        assert_eq!(config.timeouts.device_spacing(), Duration::from_millis(100));

        let params = config.format.params();
        assert_eq!(params.rate, 48000);
        assert_eq!(params.channels, 2);
        assert_eq!(params.buffers, 8);
        assert_eq!(params.frames_per_buffer, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: LinkConfig = toml::from_str(
            r#"
            [timeouts]
            confirmation_ms = 500

            [client]
            app_name = "studio"
            "#,
        )
        .unwrap();
        assert_eq!(config.timeouts.confirmation_ms, 500);
        assert_eq!(config.timeouts.connect_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(config.client.app_name, "studio");
        assert_eq!(config.client.remote_name, "pipewire-0");
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("beacn-link-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let mut config = LinkConfig::default();
        config.format.frames_per_buffer = 256;
        config.save(&path).unwrap();

        let loaded = LinkConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = LinkConfig::default();
        config.timeouts.confirmation_ms = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = LinkConfig::default();
        config.timeouts.batch_ms = 100;
        assert!(config.validate().is_err());

        let mut config = LinkConfig::default();
        config.format.channels = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_context_properties() {
        let props = ClientConfig::default().properties();
        assert_eq!(props.get(keys::CONFIG_NAME), Some("client-rt.conf"));
        assert_eq!(props.get(keys::APP_NAME), Some("beacn-link"));
        assert_eq!(props.get(keys::APP_PROCESS_BINARY), Some("beacn"));
        assert_eq!(props.get(keys::REMOTE_NAME), Some("pipewire-0"));
    }
}
