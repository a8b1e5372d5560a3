//! Result merger state machine.
//!
//! The merger is synchronous and clock-agnostic: callers pass `now` in, and
//! the async aggregator owns the actual timer. State is kept per query id so
//! that late answers for an earlier query are recognised and dropped.

use crate::aggregation::view::merge_with_fallback;
use crate::models::{CombinedAnswer, ProviderResponse, QueryId, Source};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Where the merger is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePhase {
    Idle,
    WaitingForBoth,
    Merged,
    Failed,
}

/// What a provider call produced.
#[derive(Debug, Clone)]
pub enum ProviderOutcome {
    Answered(ProviderResponse),
    Rejected(String),
}

/// Why a query produced no answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The deadline passed with nothing received.
    NoResponse,
    /// Both provider calls failed.
    BothRejected,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoResponse => write!(f, "no provider answered before the deadline"),
            FailureReason::BothRejected => write!(f, "both providers failed"),
        }
    }
}

/// Terminal result of one query.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged(CombinedAnswer),
    Failed(FailureReason),
}

#[derive(Debug)]
struct MergeState {
    response_a: Option<ProviderResponse>,
    response_b: Option<ProviderResponse>,
    rejected_a: bool,
    rejected_b: bool,
    started_at: Instant,
    deadline: Instant,
}

impl MergeState {
    fn new(started_at: Instant, timeout: Duration) -> Self {
        Self {
            response_a: None,
            response_b: None,
            rejected_a: false,
            rejected_b: false,
            started_at,
            deadline: started_at + timeout,
        }
    }

    fn settled(&self, source: Source) -> bool {
        match source {
            Source::A => self.response_a.is_some() || self.rejected_a,
            Source::B => self.response_b.is_some() || self.rejected_b,
        }
    }

    fn any_answered(&self) -> bool {
        self.response_a.is_some() || self.response_b.is_some()
    }
}

/// Holds per-query provider payloads until they can be combined.
#[derive(Debug)]
pub struct ResultMerger {
    timeout: Duration,
    fallback_text: String,
    states: HashMap<QueryId, MergeState>,
    active: Option<QueryId>,
    phase: MergePhase,
}

impl ResultMerger {
    pub fn new(timeout: Duration, fallback_text: impl Into<String>) -> Self {
        Self {
            timeout,
            fallback_text: fallback_text.into(),
            states: HashMap::new(),
            active: None,
            phase: MergePhase::Idle,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> MergePhase {
        self.phase
    }

    /// The query currently being merged, if any.
    pub fn active(&self) -> Option<QueryId> {
        self.active
    }

    /// Number of queries with live merge state.
    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    /// Start waiting for a new query, discarding any earlier one.
    pub fn begin(&mut self, id: QueryId, now: Instant) -> Instant {
        if let Some(previous) = self.active.take() {
            if self.phase == MergePhase::WaitingForBoth {
                debug!("Query {} superseded by {}", previous, id);
            }
        }
        self.states.clear();

        let state = MergeState::new(now, self.timeout);
        let deadline = state.deadline;
        self.states.insert(id, state);
        self.active = Some(id);
        self.phase = MergePhase::WaitingForBoth;
        deadline
    }

    /// Record a provider outcome. Returns the final outcome once the query
    /// can be resolved without waiting any longer.
    pub fn accept(
        &mut self,
        id: QueryId,
        source: Source,
        outcome: ProviderOutcome,
    ) -> Option<MergeOutcome> {
        if self.active != Some(id) || self.phase != MergePhase::WaitingForBoth {
            debug!("Discarding {} result for stale query {}", source, id);
            return None;
        }
        let state = self.states.get_mut(&id)?;

        if state.settled(source) {
            debug!("Ignoring repeated {} result for query {}", source, id);
            return None;
        }

        match (source, outcome) {
            (Source::A, ProviderOutcome::Answered(response)) => state.response_a = Some(response),
            (Source::B, ProviderOutcome::Answered(response)) => state.response_b = Some(response),
            (source, ProviderOutcome::Rejected(reason)) => {
                debug!("{} gave no answer for query {}: {}", source, id, reason);
                match source {
                    Source::A => state.rejected_a = true,
                    Source::B => state.rejected_b = true,
                }
            }
        }

        if state.rejected_a && state.rejected_b {
            return Some(self.finish(id, false));
        }
        if state.settled(Source::A) && state.settled(Source::B) {
            return Some(self.finish(id, true));
        }
        None
    }

    /// Resolve the active query if its deadline has passed.
    pub fn expire(&mut self, id: QueryId, now: Instant) -> Option<MergeOutcome> {
        if self.active != Some(id) || self.phase != MergePhase::WaitingForBoth {
            return None;
        }
        let state = self.states.get(&id)?;
        if now < state.deadline {
            return None;
        }

        debug!(
            "Query {} reached its deadline after {:?}",
            id,
            now.duration_since(state.started_at)
        );
        let answered = state.any_answered();
        Some(self.finish(id, answered))
    }

    fn finish(&mut self, id: QueryId, merge: bool) -> MergeOutcome {
        let state = self.states.remove(&id);

        match state {
            Some(state) if merge => {
                self.phase = MergePhase::Merged;
                MergeOutcome::Merged(merge_with_fallback(
                    state.response_a.as_ref(),
                    state.response_b.as_ref(),
                    &self.fallback_text,
                ))
            }
            Some(state) => {
                self.phase = MergePhase::Failed;
                if state.rejected_a && state.rejected_b {
                    MergeOutcome::Failed(FailureReason::BothRejected)
                } else {
                    MergeOutcome::Failed(FailureReason::NoResponse)
                }
            }
            None => {
                self.phase = MergePhase::Failed;
                MergeOutcome::Failed(FailureReason::NoResponse)
            }
        }
    }
}
