//! Provider clients.
//!
//! Both medical-information sources sit behind the [`Provider`] trait so
//! the aggregator can dispatch them the same way and tests can swap in
//! scripted fakes.

pub mod socket;
pub mod sse;
pub mod stream;

pub use socket::{ConnectionStatus, SessionNotice, SocketSession, SocketSettings};
pub use stream::StreamProvider;

use crate::error::ProviderError;
use crate::models::{ProgressUpdate, ProviderResponse, Query, QueryId, Source};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A source of medical answers for one query at a time.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Attribution tag for everything this provider returns.
    fn source(&self) -> Source;

    /// Resolve a query to its terminal payload.
    async fn ask(
        &self,
        query: &Query,
        progress: ProgressSink,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// Forwards advisory progress messages, tagged with their query id.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    query_id: QueryId,
    tx: Option<mpsc::UnboundedSender<(QueryId, ProgressUpdate)>>,
}

impl ProgressSink {
    pub fn new(query_id: QueryId, tx: mpsc::UnboundedSender<(QueryId, ProgressUpdate)>) -> Self {
        Self {
            query_id,
            tx: Some(tx),
        }
    }

    /// A sink that drops everything.
    #[cfg(test)]
    pub fn discard(query_id: QueryId) -> Self {
        Self { query_id, tx: None }
    }

    pub fn report(&self, update: ProgressUpdate) {
        if let Some(tx) = &self.tx {
            // The receiver only goes away when the aggregator is dropped.
            let _ = tx.send((self.query_id, update));
        }
    }
}
