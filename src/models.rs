//! Data models for the query aggregator.
//!
//! This module contains the core data structures shared by the provider
//! clients, the merger and the report renderers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Severity rating reported by a provider.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Self-care is enough
    #[default]
    Low,
    /// Monitor symptoms, consider seeing a doctor
    Medium,
    /// Seek medical care
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

impl Severity {
    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🔴",
        }
    }

    /// Parse a provider-supplied severity label.
    ///
    /// Unknown labels yield `None`, which the merger treats like absence.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "low" | "mild" => Some(Severity::Low),
            "medium" | "moderate" => Some(Severity::Medium),
            "high" | "severe" | "critical" | "emergency" => Some(Severity::High),
            _ => None,
        }
    }

    /// Absence counts as `Low`.
    pub fn normalize(severity: Option<Severity>) -> Severity {
        severity.unwrap_or_default()
    }
}

/// Which provider a piece of data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// The event-stream provider.
    A,
    /// The socket provider.
    B,
}

impl Source {
    /// Human readable transport name, used in logs.
    pub fn transport(&self) -> &'static str {
        match self {
            Source::A => "stream",
            Source::B => "socket",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::A => write!(f, "A"),
            Source::B => write!(f, "B"),
        }
    }
}

/// Opaque identifier assigned to every submitted query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(Uuid);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id echoed back by a provider.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user utterance in flight.
#[derive(Debug, Clone, Serialize)]
pub struct Query {
    pub id: QueryId,
    pub text: String,
    pub submitted_at: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: QueryId::new(),
            text: text.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// A medicine suggested by one of the providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicineRecommendation {
    /// Empty when the provider omitted it.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_availability: Option<String>,
    pub source: Source,
}

/// The terminal payload of one provider for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    pub source: Source,
    pub medicines: Vec<MedicineRecommendation>,
    pub severity: Option<Severity>,
    pub analysis_text: String,
    pub seek_emergency_care: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    /// Set when the payload could not be parsed and a fallback was used.
    pub degraded: bool,
}

impl ProviderResponse {
    /// A response carrying nothing.
    pub fn empty(source: Source) -> Self {
        Self {
            source,
            medicines: Vec::new(),
            severity: None,
            analysis_text: String::new(),
            seek_emergency_care: false,
            location: None,
            degraded: false,
        }
    }

    /// Stand-in used when a terminal payload could not be parsed.
    pub fn degraded(source: Source) -> Self {
        Self {
            degraded: true,
            ..Self::empty(source)
        }
    }

    /// Whether the response has anything worth showing.
    pub fn has_content(&self) -> bool {
        !self.medicines.is_empty() || !self.analysis_text.trim().is_empty()
    }
}

/// The single user-facing answer built from both providers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedAnswer {
    pub text: String,
    pub medicines: Vec<MedicineRecommendation>,
    pub severity: Severity,
    pub seek_emergency_care: bool,
    /// Providers that contributed a payload, in merge order.
    pub sources: Vec<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    /// At least one contributing payload was a parse fallback.
    pub degraded: bool,
}

impl CombinedAnswer {
    /// True when only one provider contributed.
    pub fn is_partial(&self) -> bool {
        self.sources.len() < 2
    }
}

/// An advisory progress notification from the stream provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f32>,
}

impl ProgressUpdate {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            step: None,
            total: None,
            percent: None,
        }
    }
}
