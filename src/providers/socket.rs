//! Socket provider session (provider B).
//!
//! One WebSocket connection is kept open for the whole session by a single
//! background task. When it drops, the task waits a fixed delay and dials
//! again, forever. Because the same task owns both the connection and the
//! retry timer, at most one reconnect is ever scheduled.
//!
//! Queries are sent as `{"type":"query","message":..,"queryId":..}`. A
//! terminal payload carrying a `queryId` resolves that query; one without
//! an id resolves the most recently sent query still waiting. Payloads for
//! unknown ids are dropped.

use crate::error::ProviderError;
use crate::models::{ProviderResponse, Query, QueryId, Source};
use crate::payload::{parse_payload_value, parse_text_body};
use crate::providers::{ProgressSink, Provider};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Message types that carry a terminal payload.
const TERMINAL_TYPES: &[&str] = &["response", "medical_response", "analysis", "result"];

/// Connection state shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// The server announced it is ready to answer.
    Ready,
    /// The server is up but still loading its documents.
    Waiting,
    Disconnected,
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Ready => "Ready",
            ConnectionStatus::Waiting => "Waiting for documents...",
            ConnectionStatus::Disconnected => "Disconnected - Reconnecting...",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connected | ConnectionStatus::Ready | ConnectionStatus::Waiting
        )
    }
}

/// Out-of-band messages that must not be merged into answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    Error(String),
}

/// Socket session tuning.
#[derive(Debug, Clone)]
pub struct SocketSettings {
    pub url: String,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundQuery<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: &'a str,
    query_id: QueryId,
}

#[derive(Default)]
struct Pending {
    waiting: HashMap<QueryId, oneshot::Sender<ProviderResponse>>,
    latest: Option<QueryId>,
}

struct Shared {
    pending: Mutex<Pending>,
    connected: AtomicBool,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, id: QueryId) -> oneshot::Receiver<ProviderResponse> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending();
        pending.waiting.insert(id, tx);
        pending.latest = Some(id);
        rx
    }

    fn forget(&self, id: QueryId) {
        let mut pending = self.pending();
        pending.waiting.remove(&id);
        if pending.latest == Some(id) {
            pending.latest = None;
        }
    }

    fn deliver(&self, id: Option<QueryId>, response: ProviderResponse) {
        let mut pending = self.pending();
        let target = match id.or(pending.latest) {
            Some(target) => target,
            None => {
                debug!("Socket payload arrived with no outstanding query, dropping it");
                return;
            }
        };

        match pending.waiting.remove(&target) {
            Some(tx) => {
                if pending.latest == Some(target) {
                    pending.latest = None;
                }
                let _ = tx.send(response);
            }
            None => debug!("Discarding socket payload for stale query {}", target),
        }
    }

    /// Drop every waiter so outstanding requests fail fast.
    fn fail_pending(&self) {
        let mut pending = self.pending();
        if !pending.waiting.is_empty() {
            debug!("Failing {} outstanding socket queries", pending.waiting.len());
        }
        pending.waiting.clear();
        pending.latest = None;
    }
}

/// Removes the waiter when a request finishes or is abandoned.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: QueryId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.forget(self.id);
    }
}

/// Long-lived connection to the socket provider.
pub struct SocketSession {
    settings: SocketSettings,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<String>,
    status: watch::Receiver<ConnectionStatus>,
    notices: Option<mpsc::UnboundedReceiver<SessionNotice>>,
    task: JoinHandle<()>,
}

impl SocketSession {
    /// Start the connection task. Must be called inside a Tokio runtime.
    pub fn connect(settings: SocketSettings) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::default()),
            connected: AtomicBool::new(false),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::Connecting);
        let (notice_tx, notices) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_connection(
            settings.clone(),
            Arc::clone(&shared),
            outbound_rx,
            status_tx,
            notice_tx,
        ));

        Self {
            settings,
            shared,
            outbound,
            status,
            notices: Some(notices),
            task,
        }
    }

    /// Watch the connection status indicator.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Take the receiver for server-reported errors. Only the first call
    /// gets it.
    pub fn take_notices(&mut self) -> Option<mpsc::UnboundedReceiver<SessionNotice>> {
        self.notices.take()
    }

    /// Send one query and wait for its terminal payload.
    pub async fn request(&self, query: &Query) -> Result<ProviderResponse, ProviderError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(ProviderError::NotConnected);
        }

        let frame = serde_json::to_string(&OutboundQuery {
            kind: "query",
            message: &query.text,
            query_id: query.id,
        })
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let rx = self.shared.register(query.id);
        let _guard = PendingGuard {
            shared: &self.shared,
            id: query.id,
        };

        self.outbound
            .send(frame)
            .map_err(|_| ProviderError::NotConnected)?;
        debug!("Sent query {} over socket", query.id);

        match tokio::time::timeout(self.settings.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ProviderError::Disconnected),
            Err(_) => Err(ProviderError::Timeout {
                seconds: self.settings.request_timeout.as_secs(),
            }),
        }
    }
}

impl Drop for SocketSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl Provider for SocketSession {
    fn source(&self) -> Source {
        Source::B
    }

    async fn ask(
        &self,
        query: &Query,
        _progress: ProgressSink,
    ) -> Result<ProviderResponse, ProviderError> {
        self.request(query).await
    }
}

async fn run_connection(
    settings: SocketSettings,
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    status_tx: watch::Sender<ConnectionStatus>,
    notice_tx: mpsc::UnboundedSender<SessionNotice>,
) {
    let mut attempt = 0u64;
    loop {
        attempt += 1;
        status_tx.send_replace(ConnectionStatus::Connecting);

        match connect_async(settings.url.as_str()).await {
            Ok((ws, _)) => {
                info!("Socket connected to {} (attempt {})", settings.url, attempt);
                shared.connected.store(true, Ordering::SeqCst);
                status_tx.send_replace(ConnectionStatus::Connected);

                let reason = pump(ws, &mut outbound_rx, &shared, &status_tx, &notice_tx).await;
                shared.connected.store(false, Ordering::SeqCst);
                match reason {
                    Some(reason) => warn!("Socket connection lost: {}", reason),
                    None => {
                        debug!("Socket session dropped, stopping connection task");
                        return;
                    }
                }
            }
            Err(e) => warn!("Socket connection to {} failed: {}", settings.url, e),
        }

        shared.fail_pending();
        while outbound_rx.try_recv().is_ok() {}
        status_tx.send_replace(ConnectionStatus::Disconnected);

        debug!("Reconnecting in {:?}", settings.reconnect_delay);
        tokio::time::sleep(settings.reconnect_delay).await;
    }
}

/// Shuttle frames until the connection ends. Returns why it ended, or
/// `None` when the session itself went away.
async fn pump(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    shared: &Shared,
    status_tx: &watch::Sender<ConnectionStatus>,
    notice_tx: &mpsc::UnboundedSender<SessionNotice>,
) -> Option<String> {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(frame) => {
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        return Some(format!("send failed: {}", e));
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return None;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => handle_inbound(&text, shared, status_tx, notice_tx),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => handle_inbound(&text, shared, status_tx, notice_tx),
                    Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return Some(format!("closed by server ({:?})", frame));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some(format!("read error: {}", e)),
                None => return Some("stream ended".to_string()),
            },
        }
    }
}

fn handle_inbound(
    text: &str,
    shared: &Shared,
    status_tx: &watch::Sender<ConnectionStatus>,
    notice_tx: &mpsc::UnboundedSender<SessionNotice>,
) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            debug!("Socket frame is not JSON, treating it as a plain answer");
            shared.deliver(None, parse_text_body(text, Source::B));
            return;
        }
    };

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();

    match kind.as_str() {
        "connection" => {
            let ready = value.get("status").and_then(Value::as_str) == Some("ready");
            let status = if ready {
                ConnectionStatus::Ready
            } else {
                ConnectionStatus::Waiting
            };
            debug!("Socket provider announced: {}", status.label());
            status_tx.send_replace(status);
        }
        "status" => debug!("Socket status message: {}", value),
        "error" => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            warn!("Socket provider reported an error: {}", message);
            let _ = notice_tx.send(SessionNotice::Error(message));
        }
        kind if TERMINAL_TYPES.contains(&kind) => {
            let id = value
                .get("queryId")
                .and_then(Value::as_str)
                .and_then(QueryId::parse);
            shared.deliver(id, parse_payload_value(&value, Source::B));
        }
        other => debug!("Ignoring socket message of type '{}'", other),
    }
}
