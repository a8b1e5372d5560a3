//! Session report generation.
//!
//! Renders the conversation, per-query outcomes and any planned nearby
//! searches as Markdown or JSON.

use crate::aggregation::{ChatMessage, QueryResult, Role, Transcript};
use crate::models::{MedicineRecommendation, QueryId, Severity, Source};
use crate::nearby::SearchRequest;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a query ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// Both providers contributed.
    Answered,
    /// Only one provider contributed.
    Partial,
    Failed,
}

/// One row of the per-query table.
#[derive(Debug, Clone, Serialize)]
pub struct QuerySummary {
    pub query_id: QueryId,
    pub question: String,
    pub status: QueryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub sources: Vec<Source>,
    pub medicines: usize,
    pub seek_emergency_care: bool,
    pub elapsed_ms: u128,
    pub progress: Vec<String>,
}

impl QuerySummary {
    pub fn from_result(result: &QueryResult) -> Self {
        let answer = result.answer();
        let status = match answer {
            Some(answer) if answer.is_partial() => QueryStatus::Partial,
            Some(_) => QueryStatus::Answered,
            None => QueryStatus::Failed,
        };

        Self {
            query_id: result.query.id,
            question: result.query.text.clone(),
            status,
            severity: answer.map(|a| a.severity),
            sources: answer.map(|a| a.sources.clone()).unwrap_or_default(),
            medicines: answer.map(|a| a.medicines.len()).unwrap_or(0),
            seek_emergency_care: answer.map(|a| a.seek_emergency_care).unwrap_or(false),
            elapsed_ms: result.elapsed.as_millis(),
            progress: result.progress.iter().map(|p| p.message.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMetadata {
    pub started_at: DateTime<Utc>,
    pub stream_url: String,
    pub socket_url: String,
    pub duration_seconds: f64,
}

/// Everything written at the end of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub metadata: SessionMetadata,
    pub queries: Vec<QuerySummary>,
    pub transcript: Transcript,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nearby_searches: Vec<SearchRequest>,
}

impl SessionReport {
    /// Highest severity among answered queries.
    pub fn highest_severity(&self) -> Option<Severity> {
        self.queries.iter().filter_map(|q| q.severity).max()
    }

    pub fn failed_count(&self) -> usize {
        self.queries
            .iter()
            .filter(|q| q.status == QueryStatus::Failed)
            .count()
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &SessionReport) -> String {
    let mut output = String::new();

    output.push_str("# MedRelay Session Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_summary_section(&report.queries));
    output.push_str(&generate_conversation_section(report.transcript.messages()));
    output.push_str(&generate_searches_section(&report.nearby_searches));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(metadata: &SessionMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Started:** {}\n",
        metadata.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Stream Provider:** `{}`\n", metadata.stream_url));
    section.push_str(&format!("- **Socket Provider:** `{}`\n", metadata.socket_url));
    section.push_str(&format!(
        "- **Session Duration:** {:.1}s\n\n",
        metadata.duration_seconds
    ));

    section
}

fn generate_summary_section(queries: &[QuerySummary]) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");

    if queries.is_empty() {
        section.push_str("No queries were submitted.\n\n");
        return section;
    }

    section.push_str("| Query | Status | Severity | Sources | Medicines | Time |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|---:|\n");

    for query in queries {
        let severity = query
            .severity
            .map(|s| format!("{} {}", s.emoji(), s))
            .unwrap_or_else(|| "-".to_string());
        let sources = if query.sources.is_empty() {
            "-".to_string()
        } else {
            query
                .sources
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" + ")
        };
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {:.1}s |\n",
            escape_cell(&query.question),
            status_label(query.status),
            severity,
            sources,
            query.medicines,
            query.elapsed_ms as f64 / 1000.0
        ));
    }
    section.push('\n');

    if queries.iter().any(|q| q.seek_emergency_care) {
        section.push_str(
            "> ⚠️ At least one answer recommends seeking medical care. Contact local emergency services if symptoms worsen.\n\n",
        );
    }

    section
}

fn generate_conversation_section(messages: &[ChatMessage]) -> String {
    let mut section = String::new();

    section.push_str("## Conversation\n\n");
    for message in messages {
        section.push_str(&generate_message_block(message));
    }

    section
}

fn generate_message_block(message: &ChatMessage) -> String {
    let mut block = String::new();

    let speaker = match message.role {
        Role::User => "🧑 **You**",
        Role::Assistant => "🩺 **Assistant**",
        Role::System => "⚙️ **System**",
    };
    block.push_str(&format!(
        "### {} · {}\n\n",
        speaker,
        message.timestamp.format("%H:%M:%S")
    ));

    if let Some(severity) = message.severity {
        block.push_str(&format!(
            "**Severity:** {} {}\n\n",
            severity.emoji(),
            severity.to_string().to_uppercase()
        ));
    }
    if message.seek_emergency_care {
        block.push_str("**⚠️ Seek medical care promptly.**\n\n");
    }

    block.push_str(message.content.trim());
    block.push_str("\n\n");

    if !message.medicines.is_empty() {
        block.push_str(&generate_medicine_table(&message.medicines));
    }

    block
}

fn generate_medicine_table(medicines: &[MedicineRecommendation]) -> String {
    let mut table = String::new();

    table.push_str("| Medicine | Dosage | Notes | Source |\n");
    table.push_str("|:---|:---|:---|:---:|\n");
    for medicine in medicines {
        let notes = medicine
            .local_availability
            .as_deref()
            .or(medicine.description.as_deref())
            .unwrap_or("");
        table.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            escape_cell(&medicine.name),
            escape_cell(medicine.dosage.as_deref().unwrap_or("")),
            escape_cell(notes),
            medicine.source
        ));
    }
    table.push('\n');

    table
}

fn generate_searches_section(searches: &[SearchRequest]) -> String {
    if searches.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Nearby Searches\n\n");
    for search in searches {
        let names: Vec<_> = search
            .payload
            .medicines
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        section.push_str(&format!(
            "- `{}` ({:?}, {} km, {:?}): {}\n",
            search.rid,
            search.kind,
            search.payload.radius_km,
            search.payload.mode,
            names.join(", ")
        ));
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(
        "*This report is informational only and is not a substitute for professional medical advice.*\n",
    );

    footer
}

fn status_label(status: QueryStatus) -> &'static str {
    match status {
        QueryStatus::Answered => "✅ answered",
        QueryStatus::Partial => "🟡 partial",
        QueryStatus::Failed => "❌ failed",
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Generate a JSON report.
pub fn generate_json_report(report: &SessionReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::merger::{FailureReason, MergeOutcome};
    use crate::models::{CombinedAnswer, Query};
    use std::time::Duration;

    fn answered(question: &str, sources: Vec<Source>, severity: Severity) -> QueryResult {
        let source = sources[0];
        QueryResult {
            query: Query::new(question),
            outcome: MergeOutcome::Merged(CombinedAnswer {
                text: "Rest and drink fluids.".to_string(),
                medicines: vec![MedicineRecommendation {
                    name: "Paracetamol".to_string(),
                    dosage: Some("500mg".to_string()),
                    description: None,
                    local_availability: Some("Sold as Panadol".to_string()),
                    source,
                }],
                severity,
                seek_emergency_care: severity == Severity::High,
                sources,
                location: None,
                degraded: false,
            }),
            progress: Vec::new(),
            elapsed: Duration::from_millis(2300),
        }
    }

    fn failed(question: &str) -> QueryResult {
        QueryResult {
            query: Query::new(question),
            outcome: MergeOutcome::Failed(FailureReason::NoResponse),
            progress: Vec::new(),
            elapsed: Duration::from_secs(10),
        }
    }

    fn create_test_report(results: &[QueryResult]) -> SessionReport {
        let mut transcript = Transcript::with_greeting();
        for result in results {
            transcript.push_user(result.query.id, &result.query.text);
            if let Some(answer) = result.answer() {
                transcript.push_answer(result.query.id, answer);
            }
        }

        SessionReport {
            metadata: SessionMetadata {
                started_at: Utc::now(),
                stream_url: "http://localhost:5000/api/stream".to_string(),
                socket_url: "ws://localhost:8000/ws".to_string(),
                duration_seconds: 12.5,
            },
            queries: results.iter().map(QuerySummary::from_result).collect(),
            transcript,
            nearby_searches: Vec::new(),
        }
    }

    #[test]
    fn test_query_status() {
        let both = QuerySummary::from_result(&answered(
            "fever",
            vec![Source::A, Source::B],
            Severity::Medium,
        ));
        let partial = QuerySummary::from_result(&answered("cough", vec![Source::A], Severity::Low));
        let none = QuerySummary::from_result(&failed("rash"));

        assert_eq!(both.status, QueryStatus::Answered);
        assert_eq!(partial.status, QueryStatus::Partial);
        assert_eq!(none.status, QueryStatus::Failed);
        assert_eq!(none.severity, None);
        assert_eq!(both.elapsed_ms, 2300);
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report(&[
            answered("fever | chills", vec![Source::A, Source::B], Severity::High),
            failed("rash"),
        ]);
        let markdown = generate_markdown_report(&report);

        assert!(markdown.contains("# MedRelay Session Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Conversation"));
        assert!(markdown.contains("fever \\| chills"));
        assert!(markdown.contains("A + B"));
        assert!(markdown.contains("🔴 HIGH"));
        assert!(markdown.contains("| Paracetamol | 500mg | Sold as Panadol | A |"));
        assert!(markdown.contains("❌ failed"));
        assert!(markdown.contains("Seek medical care"));
        assert!(!markdown.contains("## Nearby Searches"));
    }

    #[test]
    fn test_highest_severity_and_failures() {
        let report = create_test_report(&[
            answered("fever", vec![Source::A], Severity::Medium),
            answered("chest pain", vec![Source::B], Severity::High),
            failed("rash"),
        ]);
        assert_eq!(report.highest_severity(), Some(Severity::High));
        assert_eq!(report.failed_count(), 1);
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report(&[answered("fever", vec![Source::A], Severity::Low)]);
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"metadata\""));
        assert!(json.contains("\"transcript\""));
        assert!(json.contains("\"status\": \"partial\""));
        assert!(!json.contains("nearby_searches"));
    }
}
