//! Dual-source query aggregator.
//!
//! Dispatches each query to both providers at once, feeds their outcomes
//! into the [`ResultMerger`], and races them against the merge deadline.
//! Provider tasks are never cancelled: when a query is superseded their
//! late results still arrive on the shared channel and are dropped by id.

use crate::aggregation::merger::{MergeOutcome, ProviderOutcome, ResultMerger};
use crate::aggregation::progress::ProgressLog;
use crate::aggregation::transcript::Transcript;
use crate::aggregation::view::DEFAULT_FALLBACK_TEXT;
use crate::models::{CombinedAnswer, MedicineRecommendation, ProgressUpdate, Query, QueryId, Source};
use crate::providers::{ProgressSink, Provider, SessionNotice};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Shown when no provider produced anything for a query.
pub const RETRY_LATER_MESSAGE: &str =
    "Sorry, I couldn't get an answer right now. Please try again in a moment.";

/// Called with the flattened medicine list of every merged answer.
pub type MedicineCallback = Box<dyn Fn(QueryId, &[MedicineRecommendation]) + Send + Sync>;

/// Called whenever the current activity changes.
pub type ProgressObserver = Box<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Merge timing.
#[derive(Debug, Clone)]
pub struct MergeSettings {
    /// Deadline measured from submission.
    pub timeout: Duration,
    pub fallback_text: String,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            fallback_text: DEFAULT_FALLBACK_TEXT.to_string(),
        }
    }
}

/// Everything known about a finished query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub query: Query,
    pub outcome: MergeOutcome,
    /// Deduplicated progress messages seen while waiting.
    pub progress: Vec<ProgressUpdate>,
    pub elapsed: Duration,
}

impl QueryResult {
    pub fn answer(&self) -> Option<&CombinedAnswer> {
        match &self.outcome {
            MergeOutcome::Merged(answer) => Some(answer),
            MergeOutcome::Failed(_) => None,
        }
    }

    /// Text to show the user.
    pub fn user_message(&self) -> &str {
        match &self.outcome {
            MergeOutcome::Merged(answer) => &answer.text,
            MergeOutcome::Failed(_) => RETRY_LATER_MESSAGE,
        }
    }
}

#[derive(Debug)]
struct Reply {
    query_id: QueryId,
    source: Source,
    outcome: ProviderOutcome,
}

/// Issues queries to both providers and keeps the conversation.
pub struct Aggregator {
    provider_a: Arc<dyn Provider>,
    provider_b: Arc<dyn Provider>,
    merger: ResultMerger,
    transcript: Transcript,
    progress: ProgressLog,
    replies_tx: mpsc::UnboundedSender<Reply>,
    replies_rx: mpsc::UnboundedReceiver<Reply>,
    progress_tx: mpsc::UnboundedSender<(QueryId, ProgressUpdate)>,
    progress_rx: mpsc::UnboundedReceiver<(QueryId, ProgressUpdate)>,
    notices: Option<mpsc::UnboundedReceiver<SessionNotice>>,
    on_medicines: Option<MedicineCallback>,
    on_progress: Option<ProgressObserver>,
}

impl Aggregator {
    pub fn new(
        provider_a: Arc<dyn Provider>,
        provider_b: Arc<dyn Provider>,
        settings: MergeSettings,
    ) -> Self {
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        Self {
            provider_a,
            provider_b,
            merger: ResultMerger::new(settings.timeout, settings.fallback_text),
            transcript: Transcript::with_greeting(),
            progress: ProgressLog::new(),
            replies_tx,
            replies_rx,
            progress_tx,
            progress_rx,
            notices: None,
            on_medicines: None,
            on_progress: None,
        }
    }

    /// Record server-reported errors in the transcript.
    pub fn with_notices(mut self, notices: mpsc::UnboundedReceiver<SessionNotice>) -> Self {
        self.notices = Some(notices);
        self
    }

    pub fn with_medicine_callback(mut self, callback: MedicineCallback) -> Self {
        self.on_medicines = Some(callback);
        self
    }

    pub fn with_progress_observer(mut self, observer: ProgressObserver) -> Self {
        self.on_progress = Some(observer);
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Submit a query and wait until it is merged or has failed.
    pub async fn submit(&mut self, text: &str) -> QueryResult {
        let query = Query::new(text.trim());
        let started = Instant::now();

        self.progress.clear();
        let deadline = self.merger.begin(query.id, started);
        self.transcript.push_user(query.id, &query.text);
        info!("Query {} submitted: {}", query.id, query.text);

        self.dispatch(&query, Arc::clone(&self.provider_a));
        self.dispatch(&query, Arc::clone(&self.provider_b));

        let outcome = loop {
            tokio::select! {
                Some(reply) = self.replies_rx.recv() => {
                    if let Some(outcome) = self.merger.accept(reply.query_id, reply.source, reply.outcome) {
                        break outcome;
                    }
                }
                Some((id, update)) = self.progress_rx.recv() => {
                    self.record_progress(id, update);
                }
                Some(notice) = next_notice(&mut self.notices) => {
                    self.record_notice(notice);
                }
                _ = sleep_until(deadline) => {
                    if let Some(outcome) = self.merger.expire(query.id, Instant::now()) {
                        break outcome;
                    }
                }
            }
        };

        while let Ok((id, update)) = self.progress_rx.try_recv() {
            self.record_progress(id, update);
        }
        self.drain_notices();

        match &outcome {
            MergeOutcome::Merged(answer) => {
                info!(
                    "Query {} merged from {:?}: severity {}, {} medicines",
                    query.id,
                    answer.sources,
                    answer.severity,
                    answer.medicines.len()
                );
                if let Some(callback) = &self.on_medicines {
                    callback(query.id, &answer.medicines);
                }
                self.transcript.push_answer(query.id, answer);
            }
            MergeOutcome::Failed(reason) => {
                warn!("Query {} failed: {}", query.id, reason);
            }
        }

        QueryResult {
            query,
            outcome,
            progress: self.progress.entries().to_vec(),
            elapsed: started.elapsed(),
        }
    }

    fn dispatch(&self, query: &Query, provider: Arc<dyn Provider>) {
        let source = provider.source();
        let replies = self.replies_tx.clone();
        let sink = ProgressSink::new(query.id, self.progress_tx.clone());
        let query = query.clone();

        tokio::spawn(async move {
            let outcome = match provider.ask(&query, sink).await {
                Ok(response) => {
                    debug!("Provider {} answered query {}", source, query.id);
                    ProviderOutcome::Answered(response)
                }
                Err(e) => {
                    warn!(
                        "Provider {} ({}) has no answer for query {}: {}",
                        source,
                        source.transport(),
                        query.id,
                        e
                    );
                    ProviderOutcome::Rejected(e.to_string())
                }
            };
            let _ = replies.send(Reply {
                query_id: query.id,
                source,
                outcome,
            });
        });
    }

    fn record_progress(&mut self, id: QueryId, update: ProgressUpdate) {
        if self.merger.active() != Some(id) {
            debug!("Dropping progress for stale query {}", id);
            return;
        }
        if self.progress.record(update.clone()) {
            if let Some(observer) = &self.on_progress {
                observer(&update);
            }
        }
    }

    fn record_notice(&mut self, notice: SessionNotice) {
        match notice {
            SessionNotice::Error(message) => self.transcript.push_system(&message),
        }
    }

    fn drain_notices(&mut self) {
        let mut drained = Vec::new();
        if let Some(notices) = self.notices.as_mut() {
            while let Ok(notice) = notices.try_recv() {
                drained.push(notice);
            }
        }
        for notice in drained {
            self.record_notice(notice);
        }
    }
}

async fn next_notice(
    notices: &mut Option<mpsc::UnboundedReceiver<SessionNotice>>,
) -> Option<SessionNotice> {
    match notices {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::merger::FailureReason;
    use crate::aggregation::transcript::Role;
    use crate::error::ProviderError;
    use crate::models::{ProviderResponse, Severity};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers each query text after a fixed delay. `None` means reject.
    struct ScriptedProvider {
        source: Source,
        script: HashMap<&'static str, (Duration, Option<ProviderResponse>)>,
        progress: Vec<&'static str>,
    }

    impl ScriptedProvider {
        fn new(source: Source) -> Self {
            Self {
                source,
                script: HashMap::new(),
                progress: Vec::new(),
            }
        }

        fn answer(mut self, text: &'static str, after_secs: u64, response: ProviderResponse) -> Self {
            self.script
                .insert(text, (Duration::from_secs(after_secs), Some(response)));
            self
        }

        fn reject(mut self, text: &'static str, after_secs: u64) -> Self {
            self.script.insert(text, (Duration::from_secs(after_secs), None));
            self
        }

        fn with_progress(mut self, messages: &[&'static str]) -> Self {
            self.progress = messages.to_vec();
            self
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn source(&self) -> Source {
            self.source
        }

        async fn ask(
            &self,
            query: &Query,
            progress: ProgressSink,
        ) -> Result<ProviderResponse, ProviderError> {
            for message in &self.progress {
                progress.report(ProgressUpdate::new(*message));
            }
            let (delay, response) = self
                .script
                .get(query.text.as_str())
                .cloned()
                .unwrap_or((Duration::from_secs(3600), None));
            tokio::time::sleep(delay).await;
            response.ok_or(ProviderError::Disconnected)
        }
    }

    fn response(source: Source, severity: &str, medicines: &[&str]) -> ProviderResponse {
        ProviderResponse {
            medicines: medicines
                .iter()
                .map(|name| MedicineRecommendation {
                    name: name.to_string(),
                    dosage: None,
                    description: None,
                    local_availability: None,
                    source,
                })
                .collect(),
            severity: Severity::parse(severity),
            ..ProviderResponse::empty(source)
        }
    }

    fn aggregator(a: ScriptedProvider, b: ScriptedProvider) -> Aggregator {
        Aggregator::new(Arc::new(a), Arc::new(b), MergeSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_fever_and_sore_throat() {
        let a = ScriptedProvider::new(Source::A).answer(
            "fever and sore throat",
            1,
            response(Source::A, "medium", &["Paracetamol"]),
        );
        let b = ScriptedProvider::new(Source::B).answer(
            "fever and sore throat",
            2,
            response(Source::B, "high", &["Amoxicillin"]),
        );

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut aggregator = aggregator(a, b).with_medicine_callback(Box::new(move |_, meds| {
            sink.lock()
                .unwrap()
                .extend(meds.iter().map(|m| m.name.clone()));
        }));

        let result = aggregator.submit("fever and sore throat").await;
        let answer = result.answer().expect("merged answer");

        assert_eq!(answer.severity, Severity::High);
        assert!(answer.seek_emergency_care);
        let medicines: Vec<_> = answer
            .medicines
            .iter()
            .map(|m| (m.name.as_str(), m.source))
            .collect();
        assert_eq!(
            medicines,
            vec![("Paracetamol", Source::A), ("Amoxicillin", Source::B)]
        );
        assert!(result.elapsed >= Duration::from_secs(2));
        assert!(result.elapsed < Duration::from_secs(10));

        assert_eq!(*seen.lock().unwrap(), vec!["Paracetamol", "Amoxicillin"]);
        assert_eq!(aggregator.transcript().answer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replies_are_attributed_by_provider_source() {
        let a = ScriptedProvider::new(Source::A).answer(
            "back pain",
            2,
            response(Source::A, "low", &["Counterpain"]),
        );
        let b = ScriptedProvider::new(Source::B).answer(
            "back pain",
            1,
            response(Source::B, "medium", &["Ibuprofen"]),
        );

        // Slots swapped: attribution must come from each provider itself.
        let mut aggregator = Aggregator::new(Arc::new(b), Arc::new(a), MergeSettings::default());
        let result = aggregator.submit("back pain").await;
        let answer = result.answer().expect("merged answer");

        assert_eq!(answer.sources, vec![Source::A, Source::B]);
        let names: Vec<_> = answer.medicines.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Counterpain", "Ibuprofen"]);
        assert!(result.elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_answer_after_deadline() {
        let a = ScriptedProvider::new(Source::A).answer(
            "dizzy",
            1,
            response(Source::A, "low", &["Tolak Angin"]),
        );
        let b = ScriptedProvider::new(Source::B);

        let mut aggregator = aggregator(a, b);
        let result = aggregator.submit("dizzy").await;
        let answer = result.answer().expect("partial answer");

        assert_eq!(answer.sources, vec![Source::A]);
        assert_eq!(answer.medicines.len(), 1);
        assert_eq!(answer.medicines[0].source, Source::A);
        assert!(result.elapsed >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_timeout_appends_no_answer() {
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);
        let mut aggregator = aggregator(
            ScriptedProvider::new(Source::A),
            ScriptedProvider::new(Source::B),
        )
        .with_medicine_callback(Box::new(move |_, _| *flag.lock().unwrap() = true));

        let before = aggregator.transcript().len();
        let result = aggregator.submit("anything").await;

        assert_eq!(result.outcome, MergeOutcome::Failed(FailureReason::NoResponse));
        assert_eq!(result.user_message(), RETRY_LATER_MESSAGE);
        assert_eq!(aggregator.transcript().answer_count(), 0);
        // Only the user entry was added.
        assert_eq!(aggregator.transcript().len(), before + 1);
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_rejected_fails_before_deadline() {
        let a = ScriptedProvider::new(Source::A).reject("rash", 1);
        let b = ScriptedProvider::new(Source::B).reject("rash", 2);

        let mut aggregator = aggregator(a, b);
        let result = aggregator.submit("rash").await;

        assert_eq!(result.outcome, MergeOutcome::Failed(FailureReason::BothRejected));
        assert!(result.elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_from_previous_query_is_ignored() {
        let a = ScriptedProvider::new(Source::A)
            .answer("first", 15, response(Source::A, "high", &["Stale"]))
            .answer("second", 8, response(Source::A, "low", &["Fresh"]));
        let b = ScriptedProvider::new(Source::B)
            .reject("first", 1)
            .reject("second", 1);

        let mut aggregator = aggregator(a, b);
        let first = aggregator.submit("first").await;
        assert!(matches!(first.outcome, MergeOutcome::Failed(_)));

        let second = aggregator.submit("second").await;
        let answer = second.answer().expect("second query merged");
        assert_eq!(answer.medicines.len(), 1);
        assert_eq!(answer.medicines[0].name, "Fresh");
        assert_eq!(answer.severity, Severity::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_deduplicated_and_observed() {
        let a = ScriptedProvider::new(Source::A)
            .with_progress(&["x", "x", "y", "y", "y", "z"])
            .answer("cough", 1, response(Source::A, "low", &[]));
        let b = ScriptedProvider::new(Source::B).answer("cough", 1, response(Source::B, "low", &[]));

        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        let mut aggregator = aggregator(a, b).with_progress_observer(Box::new(move |update| {
            sink.lock().unwrap().push(update.message.clone());
        }));

        let result = aggregator.submit("cough").await;
        let messages: Vec<_> = result.progress.iter().map(|u| u.message.as_str()).collect();
        assert_eq!(messages, vec!["x", "y", "z"]);
        assert_eq!(*observed.lock().unwrap(), vec!["x", "y", "z"]);
        assert_eq!(result.user_message(), DEFAULT_FALLBACK_TEXT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_errors_land_in_transcript() {
        let (tx, rx) = mpsc::unbounded_channel();
        let a = ScriptedProvider::new(Source::A).answer("cough", 1, response(Source::A, "low", &[]));
        let b = ScriptedProvider::new(Source::B).reject("cough", 1);
        let mut aggregator = aggregator(a, b).with_notices(rx);

        tx.send(SessionNotice::Error("model overloaded".to_string()))
            .unwrap();
        aggregator.submit("cough").await;

        let system: Vec<_> = aggregator
            .transcript()
            .messages()
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(system, vec!["model overloaded"]);
    }
}
