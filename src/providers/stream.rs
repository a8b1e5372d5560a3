//! Event-stream provider client (provider A).
//!
//! Opens one `text/event-stream` request per query. `status` events are
//! logged, `progress` events are forwarded to the caller, and the first
//! `completed` event resolves the query. The body is dropped right after,
//! which closes the stream whatever the payload looked like. A stream that
//! never completes is cut off after the request timeout.

use crate::error::ProviderError;
use crate::models::{ProgressUpdate, ProviderResponse, Query, Source};
use crate::payload::parse_stream_completion;
use crate::providers::sse::{SseDecoder, SseEvent};
use crate::providers::{ProgressSink, Provider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Events of the stream provider's wire contract.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Status(String),
    Progress(ProgressUpdate),
    Completed(ProviderResponse),
    Other(String),
}

impl StreamEvent {
    pub fn from_sse(event: SseEvent) -> Self {
        match event.event.as_str() {
            "status" => StreamEvent::Status(event.data),
            "progress" => {
                let update = serde_json::from_str::<ProgressUpdate>(&event.data)
                    .unwrap_or_else(|_| ProgressUpdate::new(event.data.trim()));
                StreamEvent::Progress(update)
            }
            "completed" | "complete" => StreamEvent::Completed(parse_stream_completion(&event.data)),
            _ => StreamEvent::Other(event.event),
        }
    }
}

/// HTTP client for the event-stream provider.
pub struct StreamProvider {
    http_client: reqwest::Client,
    url: String,
    connect_timeout_seconds: u64,
    request_timeout_seconds: u64,
}

impl StreamProvider {
    pub fn new(url: &str, connect_timeout_seconds: u64, request_timeout_seconds: u64) -> Result<Self> {
        info!(
            "Stream provider endpoint: {} (request timeout: {}s)",
            url, request_timeout_seconds
        );

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            url: url.to_string(),
            connect_timeout_seconds,
            request_timeout_seconds,
        })
    }

    /// One GET request, read until the first terminal event.
    async fn exchange(
        &self,
        query: &Query,
        progress: &ProgressSink,
    ) -> Result<ProviderResponse, ProviderError> {
        let query_id = query.id.to_string();
        let response = self
            .http_client
            .get(&self.url)
            .query(&[("message", query.text.as_str()), ("queryId", query_id.as_str())])
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, &self.url, self.connect_timeout_seconds))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http { status, body });
        }

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ProviderError::Transport(e.to_string()))?;
            for event in decoder.feed(&chunk) {
                if let Some(done) = handle_event(event, query, progress) {
                    return Ok(done);
                }
            }
        }

        if let Some(done) = decoder.finish().and_then(|e| handle_event(e, query, progress)) {
            return Ok(done);
        }

        Err(ProviderError::StreamEnded)
    }
}

#[async_trait]
impl Provider for StreamProvider {
    fn source(&self) -> Source {
        Source::A
    }

    async fn ask(
        &self,
        query: &Query,
        progress: ProgressSink,
    ) -> Result<ProviderResponse, ProviderError> {
        let limit = Duration::from_secs(self.request_timeout_seconds);
        match tokio::time::timeout(limit, self.exchange(query, &progress)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Stream for query {} did not complete within {}s",
                    query.id, self.request_timeout_seconds
                );
                Err(ProviderError::Timeout {
                    seconds: self.request_timeout_seconds,
                })
            }
        }
    }
}

fn handle_event(event: SseEvent, query: &Query, progress: &ProgressSink) -> Option<ProviderResponse> {
    match StreamEvent::from_sse(event) {
        StreamEvent::Status(status) => {
            debug!("Stream status for query {}: {}", query.id, status.trim());
            None
        }
        StreamEvent::Progress(update) => {
            debug!("Stream progress for query {}: {}", query.id, update.message);
            progress.report(update);
            None
        }
        StreamEvent::Completed(response) => {
            debug!(
                "Stream completed for query {} ({} medicines, degraded: {})",
                query.id,
                response.medicines.len(),
                response.degraded
            );
            Some(response)
        }
        StreamEvent::Other(name) => {
            debug!("Ignoring stream event '{}'", name);
            None
        }
    }
}
