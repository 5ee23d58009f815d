//! Upstream SSE Transport
//!
//! One correlated JSON-RPC channel per upstream MCP server. The protocol is
//! asymmetric: a long-lived `GET <base>/sse` stream carries server-to-client
//! traffic (the first event is `endpoint` with the POST path and session id),
//! while client-to-server messages are POSTed to
//! `<base><endpoint>?sessionId=<id>`. POST responses carry no payload (202);
//! the JSON-RPC reply arrives later on the SSE stream, matched by `id`.
//!
//! Responsibilities:
//! - request/response pairing through a pending table keyed by JSON-RPC id
//! - reconnection with exponential backoff after a previously-open stream
//!   fails, without retrying in-flight requests (their correlation ids died
//!   with the old session)
//! - a bounded outbound queue while the channel is down

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use reqwest_eventsource::{Event as SseEvent, EventSource};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::types::{EndpointEvent, JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcRequest};

/// Default timeout for `request()` and for awaiting the `endpoint` event.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default base delay of the reconnect backoff schedule.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default maximum number of reconnect attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default high-water mark of the outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Error type for transport operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("timed out waiting for connection")]
    ConnectionTimeout,

    #[error("connection closed")]
    ConnectionClosed { retryable: bool },

    #[error("failed to send message: {0}")]
    MessageSendFailed(String),

    #[error("failed to receive message: {0}")]
    MessageReceiveFailed(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("reconnection failed after {attempts} attempts")]
    ReconnectionFailed { attempts: u32 },

    #[error("transport not connected")]
    NotConnected,

    #[error("request timed out")]
    Timeout,

    #[error("upstream returned error: {0}")]
    Rpc(JsonRpcError),

    #[error("outbound queue is full")]
    QueueFull,
}

impl TransportError {
    /// Whether the caller may reasonably retry the operation.
    pub fn retryable(&self) -> bool {
        match self {
            TransportError::ConnectionFailed(_) => true,
            TransportError::ConnectionTimeout => true,
            TransportError::ConnectionClosed { retryable } => *retryable,
            TransportError::MessageSendFailed(_) => true,
            TransportError::MessageReceiveFailed(_) => true,
            TransportError::InvalidMessage(_) => false,
            TransportError::ReconnectionFailed { .. } => false,
            TransportError::NotConnected => true,
            TransportError::Timeout => true,
            TransportError::Rpc(_) => false,
            TransportError::QueueFull => true,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Tuning knobs for one transport
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Timeout for `request()` and for the `endpoint` handshake.
    pub timeout: Duration,
    /// Base delay of the reconnect backoff (doubles per attempt).
    pub retry_delay: Duration,
    /// Maximum reconnect attempts before the channel is abandoned.
    pub max_retries: u32,
    /// High-water mark of the outbound queue while disconnected.
    pub queue_capacity: usize,
    /// Bearer token applied to the SSE GET and every message POST.
    pub auth_token: Option<String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            auth_token: None,
        }
    }
}

/// Connectivity transitions reported to the owning registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// SSE stream open, `endpoint` handshake complete.
    Online,
    /// Stream lost; the transport is attempting to reconnect.
    Offline,
    /// Reconnection exhausted; the channel is terminally down.
    Errored,
}

/// Hook invoked for every inbound message after correlation.
pub type MessageHook = Arc<dyn Fn(JsonRpcMessage) + Send + Sync>;
/// Hook invoked on transport-level errors.
pub type ErrorHook = Arc<dyn Fn(&TransportError) + Send + Sync>;
/// Hook invoked once when the channel closes terminally on the stream side.
pub type CloseHook = Arc<dyn Fn() + Send + Sync>;
/// Internal lifecycle observer (used by the transport registry).
pub type StatusHook = Arc<dyn Fn(ChannelStatus) + Send + Sync>;

enum Conn {
    Disconnected,
    Connected { post_url: String, session_id: String },
}

#[derive(Default)]
struct Hooks {
    message: Mutex<Option<MessageHook>>,
    error: Mutex<Option<ErrorHook>>,
    close: Mutex<Option<CloseHook>>,
    status: Mutex<Option<StatusHook>>,
}

struct Shared {
    name: String,
    base_url: String,
    http: reqwest::Client,
    opts: TransportOptions,
    conn: Mutex<Conn>,
    queue: Mutex<VecDeque<JsonRpcMessage>>,
    pending: Mutex<HashMap<JsonRpcId, oneshot::Sender<TransportResult<serde_json::Value>>>>,
    hooks: Hooks,
}

struct Lifecycle {
    task: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

/// A correlated JSON-RPC channel to one upstream MCP server.
pub struct SseTransport {
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

enum ReadOutcome {
    Shutdown,
    StreamLost(String),
}

impl SseTransport {
    /// Create a transport for `base_url`. No I/O happens until `start()`.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, opts: TransportOptions) -> Self {
        // The client carries no global timeout: it would sever the long-lived
        // SSE stream. POSTs get a per-request timeout instead.
        let http = reqwest::Client::builder()
            .connect_timeout(opts.timeout)
            .build()
            .unwrap_or_default();

        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                base_url: base_url.into(),
                http,
                opts,
                conn: Mutex::new(Conn::Disconnected),
                queue: Mutex::new(VecDeque::new()),
                pending: Mutex::new(HashMap::new()),
                hooks: Hooks::default(),
            }),
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                task: None,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register the hook invoked for every inbound message after correlation.
    pub fn set_on_message(&self, hook: MessageHook) {
        *self.shared.hooks.message.lock().unwrap() = Some(hook);
    }

    /// Register the hook invoked on transport errors.
    pub fn set_on_error(&self, hook: ErrorHook) {
        *self.shared.hooks.error.lock().unwrap() = Some(hook);
    }

    /// Register the hook invoked on terminal stream closure.
    pub fn set_on_close(&self, hook: CloseHook) {
        *self.shared.hooks.close.lock().unwrap() = Some(hook);
    }

    /// Register the connectivity observer (registry-internal).
    pub fn set_status_hook(&self, hook: StatusHook) {
        *self.shared.hooks.status.lock().unwrap() = Some(hook);
    }

    /// Whether the SSE channel is currently open.
    pub fn is_connected(&self) -> bool {
        matches!(*self.shared.conn.lock().unwrap(), Conn::Connected { .. })
    }

    /// Session id of the current SSE stream, if connected.
    pub fn session_id(&self) -> Option<String> {
        match &*self.shared.conn.lock().unwrap() {
            Conn::Connected { session_id, .. } => Some(session_id.clone()),
            Conn::Disconnected => None,
        }
    }

    /// Open the SSE stream and wait for the `endpoint` handshake.
    ///
    /// Idempotent while the channel task is alive. Completes within the
    /// configured timeout or fails with `ConnectionTimeout`.
    pub async fn start(&self) -> TransportResult<()> {
        let ready = {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.task.as_ref().is_some_and(|t| !t.is_finished()) {
                return Ok(());
            }
            Self::spawn_channel(&self.shared, &mut lifecycle)
        };

        match ready.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectionFailed(
                "channel task exited before handshake".to_string(),
            )),
        }
    }

    /// Send a message without waiting for any reply.
    ///
    /// Posts immediately when connected; otherwise the message is queued (and
    /// the channel task started if it is not running) and flushed in FIFO
    /// order once the stream comes up.
    pub async fn send(&self, message: JsonRpcMessage) -> TransportResult<()> {
        let post_url = match &*self.shared.conn.lock().unwrap() {
            Conn::Connected { post_url, .. } => Some(post_url.clone()),
            Conn::Disconnected => None,
        };

        match post_url {
            Some(url) => self.shared.post_message(&url, &message).await,
            None => {
                self.shared.enqueue(message)?;
                self.ensure_channel().await;
                Ok(())
            }
        }
    }

    /// Send a request and await its correlated response.
    ///
    /// The message must carry an id. Resolves with the upstream `result`
    /// value, or fails with `Rpc` (upstream error object), `Timeout`, or a
    /// connection error if the stream drops before the reply arrives.
    pub async fn request(&self, request: JsonRpcRequest) -> TransportResult<serde_json::Value> {
        let id = match request.id.clone() {
            Some(id) => id,
            None => {
                return Err(TransportError::InvalidMessage(
                    "request requires an id".to_string(),
                ))
            }
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().unwrap();
            if pending.contains_key(&id) {
                return Err(TransportError::InvalidMessage(format!(
                    "request id already in flight: {}",
                    id
                )));
            }
            pending.insert(id.clone(), tx);
        }

        if let Err(e) = self.send(JsonRpcMessage::Request(request)).await {
            self.shared.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.shared.opts.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without completing: the channel died mid-flight.
            Ok(Err(_)) => Err(TransportError::ConnectionClosed { retryable: true }),
            Err(_) => {
                self.shared.pending.lock().unwrap().remove(&id);
                Err(TransportError::Timeout)
            }
        }
    }

    /// Tear the channel down.
    ///
    /// Clears the queue and completes every pending request with a
    /// non-retryable `ConnectionClosed`. Idempotent.
    pub async fn close(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.shutdown.cancel();
        if let Some(task) = lifecycle.task.take() {
            let _ = task.await;
        }
        lifecycle.shutdown = CancellationToken::new();

        *self.shared.conn.lock().unwrap() = Conn::Disconnected;
        self.shared.queue.lock().unwrap().clear();
        self.shared
            .fail_pending(|| TransportError::ConnectionClosed { retryable: false });
        tracing::debug!(upstream = %self.shared.name, "Transport closed");
    }

    /// Start the channel task if it is not running, without awaiting the
    /// handshake.
    async fn ensure_channel(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let _ready = Self::spawn_channel(&self.shared, &mut lifecycle);
    }

    fn spawn_channel(
        shared: &Arc<Shared>,
        lifecycle: &mut Lifecycle,
    ) -> oneshot::Receiver<TransportResult<()>> {
        let shutdown = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run_channel(shared.clone(), shutdown.clone(), ready_tx));
        lifecycle.task = Some(task);
        lifecycle.shutdown = shutdown;
        ready_rx
    }
}

impl Shared {
    fn emit_status(&self, status: ChannelStatus) {
        if let Some(hook) = self.hooks.status.lock().unwrap().clone() {
            hook(status);
        }
    }

    fn emit_error(&self, error: &TransportError) {
        if let Some(hook) = self.hooks.error.lock().unwrap().clone() {
            hook(error);
        }
    }

    fn emit_close(&self) {
        if let Some(hook) = self.hooks.close.lock().unwrap().clone() {
            hook();
        }
    }

    /// Queue a message for later delivery, enforcing the high-water mark:
    /// requests beyond it fail fast, notifications displace the oldest
    /// queued notification.
    fn enqueue(&self, message: JsonRpcMessage) -> TransportResult<()> {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.opts.queue_capacity {
            if message.expects_response() {
                return Err(TransportError::QueueFull);
            }
            let dropped = queue
                .iter()
                .position(|m| !m.expects_response())
                .map(|i| queue.remove(i));
            if dropped.is_none() {
                // Only requests are queued; drop the incoming notification.
                tracing::warn!(upstream = %self.name, "Outbound queue full, dropping notification");
                return Ok(());
            }
            tracing::warn!(upstream = %self.name, "Outbound queue full, dropped oldest notification");
        }
        queue.push_back(message);
        Ok(())
    }

    async fn post_message(&self, post_url: &str, message: &JsonRpcMessage) -> TransportResult<()> {
        let mut req = self
            .http
            .post(post_url)
            .timeout(self.opts.timeout)
            .header("Content-Type", "application/json")
            .json(message);
        if let Some(token) = &self.opts.auth_token {
            req = req.bearer_auth(token);
        }

        let response = req
            .send()
            .await
            .map_err(|e| TransportError::MessageSendFailed(e.to_string()))?;

        // 202 is the canonical success; tolerate any 2xx.
        if !response.status().is_success() {
            return Err(TransportError::MessageSendFailed(format!(
                "unexpected status {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Flush queued messages in FIFO order. Stops on the first failure and
    /// puts the message back at the front.
    async fn flush_queue(&self, post_url: &str) {
        loop {
            let message = match self.queue.lock().unwrap().pop_front() {
                Some(m) => m,
                None => return,
            };
            if let Err(e) = self.post_message(post_url, &message).await {
                tracing::warn!(upstream = %self.name, error = %e, "Failed to flush queued message");
                self.queue.lock().unwrap().push_front(message);
                self.emit_error(&e);
                return;
            }
        }
    }

    /// Complete a pending request if the inbound message correlates, then
    /// always hand the raw message to the user hook. The completion is
    /// delivered first, so callers observing both see the completion before
    /// the hook.
    fn dispatch_inbound(&self, message: JsonRpcMessage) {
        if let JsonRpcMessage::Response(response) = &message {
            if let Some(id) = &response.id {
                let entry = self.pending.lock().unwrap().remove(id);
                if let Some(tx) = entry {
                    let outcome = match &response.error {
                        Some(err) => Err(TransportError::Rpc(err.clone())),
                        None => Ok(response
                            .result
                            .clone()
                            .unwrap_or(serde_json::Value::Null)),
                    };
                    let _ = tx.send(outcome);
                }
            }
        }

        if let Some(hook) = self.hooks.message.lock().unwrap().clone() {
            hook(message);
        }
    }

    fn fail_pending(&self, error: impl Fn() -> TransportError) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(error()));
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based): `retry_delay * 2^(k-1)`.
fn backoff_delay(retry_delay: Duration, attempt: u32) -> Duration {
    retry_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

/// The channel task: connect, pump events, reconnect with backoff.
async fn run_channel(
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    ready: oneshot::Sender<TransportResult<()>>,
) {
    let mut ready = Some(ready);
    let mut attempt: u32 = 0;

    loop {
        let opened = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = open_stream(&shared) => result,
        };
        match opened {
            Ok(es) => {
                attempt = 0;
                tracing::info!(upstream = %shared.name, "SSE channel established");
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
                shared.emit_status(ChannelStatus::Online);

                let post_url = match &*shared.conn.lock().unwrap() {
                    Conn::Connected { post_url, .. } => post_url.clone(),
                    Conn::Disconnected => continue,
                };
                shared.flush_queue(&post_url).await;

                let outcome = read_events(&shared, es, &shutdown).await;
                *shared.conn.lock().unwrap() = Conn::Disconnected;

                match outcome {
                    ReadOutcome::Shutdown => return,
                    ReadOutcome::StreamLost(reason) => {
                        tracing::warn!(upstream = %shared.name, reason = %reason, "SSE stream lost");
                        // Correlation ids die with the session; in-flight
                        // requests fail retryable rather than being replayed.
                        shared.fail_pending(|| TransportError::ConnectionClosed { retryable: true });
                        shared.emit_error(&TransportError::MessageReceiveFailed(reason));
                        shared.emit_status(ChannelStatus::Offline);
                    }
                }
            }
            Err(e) => {
                if let Some(tx) = ready.take() {
                    // Initial start: fail fast, no reconnect loop.
                    let _ = tx.send(Err(e));
                    return;
                }
                tracing::warn!(upstream = %shared.name, error = %e, attempt, "Reconnect attempt failed");
            }
        }

        attempt += 1;
        if attempt > shared.opts.max_retries {
            let error = TransportError::ReconnectionFailed {
                attempts: shared.opts.max_retries,
            };
            tracing::error!(upstream = %shared.name, error = %error, "Giving up on channel");
            shared.fail_pending(|| TransportError::ConnectionClosed { retryable: true });
            shared.emit_error(&error);
            shared.emit_status(ChannelStatus::Errored);
            shared.emit_close();
            return;
        }

        let delay = backoff_delay(shared.opts.retry_delay, attempt);
        tracing::info!(
            upstream = %shared.name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Open the SSE stream and drive it up to (and including) the `endpoint`
/// event. On success the connection state is set and the live stream is
/// returned for the read loop.
async fn open_stream(shared: &Arc<Shared>) -> TransportResult<EventSource> {
    let url = format!("{}/sse", shared.base_url.trim_end_matches('/'));
    let mut req = shared.http.get(&url).header("Accept", "text/event-stream");
    if let Some(token) = &shared.opts.auth_token {
        req = req.bearer_auth(token);
    }

    let mut es =
        EventSource::new(req).map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

    let handshake = async {
        while let Some(event) = es.next().await {
            match event {
                Ok(SseEvent::Open) => continue,
                Ok(SseEvent::Message(msg)) if msg.event == "endpoint" => {
                    let payload: EndpointEvent = serde_json::from_str(&msg.data)
                        .map_err(|e| TransportError::InvalidMessage(e.to_string()))?;
                    return Ok(payload);
                }
                // Anything before the endpoint event is protocol noise.
                Ok(SseEvent::Message(_)) => continue,
                Err(e) => return Err(TransportError::ConnectionFailed(e.to_string())),
            }
        }
        Err(TransportError::ConnectionClosed { retryable: true })
    };

    let payload = match tokio::time::timeout(shared.opts.timeout, handshake).await {
        Ok(Ok(payload)) => payload,
        Ok(Err(e)) => {
            es.close();
            return Err(e);
        }
        Err(_) => {
            es.close();
            return Err(TransportError::ConnectionTimeout);
        }
    };

    let post_url = format!(
        "{}{}?sessionId={}",
        shared.base_url.trim_end_matches('/'),
        payload.endpoint,
        payload.session_id
    );
    tracing::debug!(
        upstream = %shared.name,
        session_id = %payload.session_id,
        "Endpoint handshake complete"
    );
    *shared.conn.lock().unwrap() = Conn::Connected {
        post_url,
        session_id: payload.session_id,
    };
    Ok(es)
}

/// Pump SSE events into correlation + hooks until shutdown or stream loss.
async fn read_events(
    shared: &Arc<Shared>,
    mut es: EventSource,
    shutdown: &CancellationToken,
) -> ReadOutcome {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                es.close();
                return ReadOutcome::Shutdown;
            }
            event = es.next() => match event {
                None => return ReadOutcome::StreamLost("stream ended".to_string()),
                Some(Ok(SseEvent::Open)) => {}
                Some(Ok(SseEvent::Message(msg))) => {
                    if msg.event != "message" {
                        tracing::debug!(upstream = %shared.name, event = %msg.event, "Ignoring SSE event");
                        continue;
                    }
                    match JsonRpcMessage::parse(&msg.data) {
                        Ok(message) => shared.dispatch_inbound(message),
                        Err(e) => {
                            tracing::warn!(upstream = %shared.name, error = %e, "Undecodable SSE payload");
                            shared.emit_error(&TransportError::InvalidMessage(e.to_string()));
                        }
                    }
                }
                Some(Err(e)) => {
                    // The EventSource would retry internally; close it and let
                    // the channel task own the backoff schedule.
                    es.close();
                    return ReadOutcome::StreamLost(e.to_string());
                }
            }
        }
    }
}
