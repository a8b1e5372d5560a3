//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.medrelay.toml` files.

use crate::aggregation::view::DEFAULT_FALLBACK_TEXT;
use crate::aggregation::MergeSettings;
use crate::nearby::{NearbySettings, TravelMode};
use crate::providers::SocketSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".medrelay.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    /// Event-stream provider settings.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Socket provider settings.
    #[serde(default)]
    pub socket: SocketConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    /// Nearby search settings.
    #[serde(default)]
    pub nearby: NearbyConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Where to write the session report. Printed to stdout when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Log at debug level unless `--quiet` is given.
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_url")]
    pub url: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// How long one stream may run without a terminal event.
    #[serde(default = "default_stream_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_stream_url(),
            connect_timeout_seconds: default_connect_timeout(),
            request_timeout_seconds: default_stream_request_timeout(),
        }
    }
}

fn default_stream_url() -> String {
    "http://localhost:5000/api/medical/stream".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_stream_request_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_socket_url")]
    pub url: String,

    /// Pause between a close and the next connection attempt.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// How long one request may stay unanswered.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: default_socket_url(),
            reconnect_delay_ms: default_reconnect_delay(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_socket_url() -> String {
    "ws://localhost:8000/ws".to_string()
}

fn default_reconnect_delay() -> u64 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Deadline from submission until a partial answer is shown.
    #[serde(default = "default_merge_timeout")]
    pub timeout_ms: u64,

    /// Answer text when neither provider supplied any.
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_merge_timeout(),
            fallback_text: default_fallback_text(),
        }
    }
}

fn default_merge_timeout() -> u64 {
    10_000
}

fn default_fallback_text() -> String {
    DEFAULT_FALLBACK_TEXT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyConfig {
    #[serde(default = "default_radius")]
    pub radius_km: f64,

    #[serde(default = "default_limit")]
    pub limit: usize,

    #[serde(default)]
    pub travel_mode: TravelMode,

    /// ISO country code passed through to the store search.
    #[serde(default)]
    pub country: String,

    /// Fixes older than this are not used for searches.
    #[serde(default = "default_location_max_age")]
    pub location_max_age_seconds: u64,
}

impl Default for NearbyConfig {
    fn default() -> Self {
        Self {
            radius_km: default_radius(),
            limit: default_limit(),
            travel_mode: TravelMode::default(),
            country: String::new(),
            location_max_age_seconds: default_location_max_age(),
        }
    }
}

fn default_radius() -> f64 {
    2.0
}

fn default_limit() -> usize {
    4
}

fn default_location_max_age() -> u64 {
    60
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.medrelay.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CONFIG_FILE);

        if path.exists() {
            Ok(Some(Self::load(&path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// where they were actually given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref url) = args.stream_url {
            self.stream.url = url.clone();
        }
        if let Some(ref url) = args.socket_url {
            self.socket.url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.merge.timeout_ms = timeout;
        }
        if let Some(ref output) = args.output {
            self.general.output = Some(output.display().to_string());
        }
        if let Some(mode) = args.mode {
            self.nearby.travel_mode = mode;
        }
        if let Some(ref country) = args.country {
            self.nearby.country = country.clone();
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    pub fn merge_settings(&self) -> MergeSettings {
        MergeSettings {
            timeout: Duration::from_millis(self.merge.timeout_ms),
            fallback_text: self.merge.fallback_text.clone(),
        }
    }

    pub fn socket_settings(&self) -> SocketSettings {
        SocketSettings {
            url: self.socket.url.clone(),
            reconnect_delay: Duration::from_millis(self.socket.reconnect_delay_ms),
            request_timeout: Duration::from_secs(self.socket.request_timeout_seconds),
        }
    }

    pub fn nearby_settings(&self) -> NearbySettings {
        NearbySettings {
            radius_km: self.nearby.radius_km,
            limit: self.nearby.limit,
            mode: self.nearby.travel_mode,
            country: self.nearby.country.clone(),
            max_location_age: chrono::Duration::seconds(self.nearby.location_max_age_seconds as i64),
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.socket.reconnect_delay_ms, 3000);
        assert_eq!(config.merge.timeout_ms, 10_000);
        assert_eq!(config.merge.fallback_text, "Analysis complete.");
        assert_eq!(config.nearby.limit, 4);
        assert_eq!(config.nearby.travel_mode, TravelMode::Walking);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "trip.md"
verbose = true

[socket]
url = "ws://clinic.example:9000/ws"
reconnect_delay_ms = 500

[merge]
timeout_ms = 4000

[nearby]
travel_mode = "driving"
country = "TH"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output.as_deref(), Some("trip.md"));
        assert!(config.general.verbose);
        assert_eq!(config.socket.url, "ws://clinic.example:9000/ws");
        assert_eq!(config.socket.request_timeout_seconds, 30);
        assert_eq!(config.merge_settings().timeout, Duration::from_secs(4));
        assert_eq!(config.nearby_settings().mode, TravelMode::Driving);
        assert_eq!(config.nearby.country, "TH");
        assert_eq!(config.stream.url, default_stream_url());
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from_dir(dir.path()).unwrap().is_none());

        let mut file = std::fs::File::create(dir.path().join(CONFIG_FILE)).unwrap();
        writeln!(file, "[stream]\nconnect_timeout_seconds = 3").unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(config.stream.connect_timeout_seconds, 3);
        assert_eq!(config.stream.request_timeout_seconds, 60);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[merge]\ntimeout_ms = \"soon\"").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config: Config = toml::from_str("[merge]\ntimeout_ms = 4000").unwrap();
        let args = Args::parse_from([
            "medrelay",
            "--query",
            "headache",
            "--socket-url",
            "ws://override:1/ws",
            "--timeout",
            "2500",
        ]);
        config.merge_with_args(&args);

        assert_eq!(config.socket.url, "ws://override:1/ws");
        assert_eq!(config.merge.timeout_ms, 2500);
        assert_eq!(config.stream.url, default_stream_url());
    }

    #[test]
    fn test_file_verbose_survives_args() {
        let mut config: Config = toml::from_str("[general]\nverbose = true").unwrap();
        let args = Args::parse_from(["medrelay", "--query", "headache"]);
        config.merge_with_args(&args);

        assert!(config.general.verbose);
        assert_eq!(args.log_level(config.general.verbose), tracing::Level::DEBUG);

        let quiet = Args::parse_from(["medrelay", "--query", "headache", "--quiet"]);
        assert_eq!(quiet.log_level(config.general.verbose), tracing::Level::ERROR);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[socket]"));
        assert!(toml_str.contains("[nearby]"));
        assert!(toml_str.contains("request_timeout_seconds = 60"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.nearby.radius_km, 2.0);
    }
}
