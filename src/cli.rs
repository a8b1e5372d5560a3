//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::Severity;
use crate::nearby::TravelMode;
use clap::Parser;
use std::path::PathBuf;

/// MedRelay - ask two medical assistants at once
///
/// Sends each symptom description to an event-stream provider and a
/// socket provider concurrently and prints one combined answer.
///
/// Examples:
///   medrelay --query "fever and sore throat"
///   medrelay --query "headache" --query "now also nausea" --format json
///   echo "stomach cramps after street food" | medrelay --lat 13.75 --lon 100.50
///   medrelay --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Symptom description to submit (repeatable)
    ///
    /// When omitted, one query is read per line from stdin.
    #[arg(short = 'q', long = "query", value_name = "TEXT")]
    pub queries: Vec<String>,

    /// Event-stream provider URL
    #[arg(long, value_name = "URL", env = "MEDRELAY_STREAM_URL")]
    pub stream_url: Option<String>,

    /// Socket provider URL
    #[arg(long, value_name = "URL", env = "MEDRELAY_SOCKET_URL")]
    pub socket_url: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .medrelay.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(long)]
    pub quiet: bool,

    /// Merge deadline in milliseconds
    ///
    /// After this long, whatever has arrived is shown as a partial answer.
    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Output format for the session report
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Write the session report to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Exit with code 2 if any answer reaches this severity
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<FailOnLevel>,

    /// Latitude of the current location
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Longitude of the current location
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub lon: Option<f64>,

    /// Accuracy of the location fix in meters
    #[arg(long, value_name = "METERS")]
    pub accuracy: Option<f64>,

    /// Country code for nearby store searches
    #[arg(long, value_name = "CODE")]
    pub country: Option<String>,

    /// Travel mode for nearby store searches
    #[arg(long, value_name = "MODE")]
    pub mode: Option<TravelMode>,

    /// Generate a default .medrelay.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Severity level for --fail-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum FailOnLevel {
    Low,
    Medium,
    High,
}

impl FailOnLevel {
    pub fn severity(&self) -> Severity {
        match self {
            FailOnLevel::Low => Severity::Low,
            FailOnLevel::Medium => Severity::Medium,
            FailOnLevel::High => Severity::High,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.stream_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Stream URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref url) = self.socket_url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err("Socket URL must start with 'ws://' or 'wss://'".to_string());
            }
        }

        if self.queries.iter().any(|q| q.trim().is_empty()) {
            return Err("Queries must not be empty".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 millisecond".to_string());
            }
        }

        if let Some(lat) = self.lat {
            if !(-90.0..=90.0).contains(&lat) {
                return Err("Latitude must be between -90 and 90".to_string());
            }
        }
        if let Some(lon) = self.lon {
            if !(-180.0..=180.0).contains(&lon) {
                return Err("Longitude must be between -180 and 180".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `verbose_default` comes from the config file; `--quiet` overrides it.
    pub fn log_level(&self, verbose_default: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || verbose_default {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
