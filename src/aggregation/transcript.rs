//! Conversation transcript.

use crate::models::{CombinedAnswer, MedicineRecommendation, QueryId, Severity};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Opening message of every session.
pub const GREETING: &str = "Hello! I'm your medical assistant. I can help you understand your symptoms and find local medicines. How are you feeling today?";

/// Who wrote a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Connection errors and other notices that are not answers.
    System,
}

/// One entry in the conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<QueryId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub medicines: Vec<MedicineRecommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub seek_emergency_care: bool,
}

/// In-memory conversation for one session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transcript that opens with the assistant greeting.
    pub fn with_greeting() -> Self {
        let mut transcript = Self::new();
        transcript.push(Role::Assistant, GREETING.to_string(), None);
        transcript
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn push_user(&mut self, query_id: QueryId, text: &str) {
        self.push(Role::User, text.to_string(), Some(query_id));
    }

    pub fn push_system(&mut self, text: &str) {
        self.push(Role::System, text.to_string(), None);
    }

    /// Append the combined answer for a query.
    pub fn push_answer(&mut self, query_id: QueryId, answer: &CombinedAnswer) {
        let mut message = self.entry(Role::Assistant, answer.text.clone(), Some(query_id));
        message.medicines = answer.medicines.clone();
        message.severity = Some(answer.severity);
        message.seek_emergency_care = answer.seek_emergency_care;
        self.messages.push(message);
    }

    /// Number of combined answers recorded.
    #[cfg(test)]
    pub fn answer_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant && m.query_id.is_some())
            .count()
    }

    fn push(&mut self, role: Role, content: String, query_id: Option<QueryId>) {
        let message = self.entry(role, content, query_id);
        self.messages.push(message);
    }

    fn entry(&self, role: Role, content: String, query_id: Option<QueryId>) -> ChatMessage {
        let timestamp = Utc::now();
        ChatMessage {
            id: format!("{}-{}", role_prefix(role), self.messages.len() + 1),
            role,
            content,
            timestamp,
            query_id,
            medicines: Vec::new(),
            severity: None,
            seek_emergency_care: false,
        }
    }
}

fn role_prefix(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}
