//! Virtual-Server Instance
//!
//! The per-vMCP runtime: an HTTP listener on the definition's port serving
//! the same SSE + POST protocol the gateway consumes upstream. Clients open
//! `GET /sse`, receive the `endpoint` event, and POST JSON-RPC to
//! `/message?sessionId=…`; replies are delivered on their SSE stream.
//!
//! List/get requests are answered from the aggregated view frozen at start;
//! invocations are proxied through the transport registry to the source the
//! routing map names. Source-health transitions drive the
//! running / partially_degraded / error ladder, and requests to an unhealthy
//! source fail fast instead of waiting out a timeout.

use std::collections::HashSet;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::Router;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use nexus_shared::{SourceHealth, SourceStatus, VirtualServerDefinition, VmcpId, VmcpStatus};

use crate::mcp::catalog::CapabilityCatalog;
use crate::mcp::registry::{RegistryError, TransportEvent, TransportRegistry};
use crate::mcp::transport::TransportError;
use crate::mcp::types::{
    CapabilityKind, JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    PromptGetParams, ResourceGetParams, ToolCallParams,
};

use super::aggregator::{self, AggregatedView};
use super::runtime::{VmcpError, VmcpResult, VmcpRuntime};
use super::session::SessionTable;

/// Interval of SSE keep-alive comments on client streams.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Budget for one `health/check` probe against a source.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of `check_health` and of the served `health/check` method.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub underlying_servers_status: Vec<SourceStatus>,
}

struct InstanceShared {
    id: VmcpId,
    name: String,
    port: u16,
    source_ids: Vec<String>,
    view: AggregatedView,
    /// Methods the dispatcher answers; depends on which kinds are non-empty.
    methods: HashSet<&'static str>,
    sessions: SessionTable,
    registry: Arc<TransportRegistry>,
    runtime: Arc<VmcpRuntime>,
    proxy_seq: AtomicU64,
}

struct ServerHandle {
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

/// One running virtual server.
pub struct VmcpInstance {
    shared: Arc<InstanceShared>,
    handle: Mutex<Option<ServerHandle>>,
}

impl VmcpInstance {
    /// Aggregate, bind, and serve.
    ///
    /// Fails with `StartupNoCapabilities` when the rules match nothing and
    /// with `PortUnavailable` when the bind loses the race for the port; in
    /// both cases nothing is left running.
    pub async fn start(
        definition: &VirtualServerDefinition,
        catalog: &CapabilityCatalog,
        registry: Arc<TransportRegistry>,
        runtime: Arc<VmcpRuntime>,
    ) -> VmcpResult<VmcpInstance> {
        let view = aggregator::aggregate(definition, catalog).await;
        if view.is_empty() {
            return Err(VmcpError::StartupNoCapabilities);
        }
        if view.duplicates.total() > 0 {
            tracing::warn!(
                vmcp = %definition.name,
                tools = view.duplicates.tools,
                prompts = view.duplicates.prompts,
                resources = view.duplicates.resources,
                "Dropped duplicate identifiers while merging"
            );
        }

        let mut methods: HashSet<&'static str> =
            ["initialize", "ping", "health/check"].into_iter().collect();
        if !view.tools.is_empty() {
            methods.extend(["tools/list", "tools/call"]);
        }
        if !view.prompts.is_empty() {
            methods.extend(["prompts/list", "prompts/get"]);
        }
        if !view.resources.is_empty() {
            methods.extend(["resources/list", "resources/get"]);
        }

        let shared = Arc::new(InstanceShared {
            id: definition.id,
            name: definition.name.clone(),
            port: definition.port,
            source_ids: definition.source_server_ids.clone(),
            view,
            methods,
            sessions: SessionTable::new(),
            registry: registry.clone(),
            runtime: runtime.clone(),
            proxy_seq: AtomicU64::new(1),
        });

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", definition.port))
            .await
            .map_err(|e| {
                tracing::error!(vmcp = %definition.name, port = definition.port, error = %e, "Bind failed");
                VmcpError::PortUnavailable(definition.port)
            })?;

        let app = Router::new()
            .route("/sse", get(sse_handler))
            .route("/message", post(message_handler))
            .layer(CorsLayer::permissive())
            .with_state(shared.clone());

        let shutdown = CancellationToken::new();
        let server = {
            let token = shutdown.clone();
            let name = definition.name.clone();
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(token.cancelled_owned())
                    .await
                {
                    tracing::error!(vmcp = %name, error = %e, "Virtual server terminated");
                }
            })
        };
        let watcher = tokio::spawn(watch_sources(shared.clone(), registry.subscribe()));

        runtime.mark_running(&shared.source_ids);
        tracing::info!(
            vmcp = %shared.name,
            port = shared.port,
            tools = shared.view.tools.len(),
            prompts = shared.view.prompts.len(),
            resources = shared.view.resources.len(),
            "Virtual server running"
        );

        Ok(VmcpInstance {
            shared,
            handle: Mutex::new(Some(ServerHandle {
                shutdown,
                server,
                watcher,
            })),
        })
    }

    /// Close every client session, stop the listener, and mark the runtime
    /// stopped. Idempotent.
    pub async fn stop(&self) {
        let handle = self.handle.lock().await.take();
        let Some(handle) = handle else { return };

        // Ending the session streams first lets in-flight SSE responses
        // complete, which graceful shutdown waits for.
        let sessions = self.shared.sessions.count();
        self.shared.sessions.close_all();
        handle.shutdown.cancel();
        handle.watcher.abort();
        if tokio::time::timeout(Duration::from_secs(5), handle.server)
            .await
            .is_err()
        {
            tracing::warn!(vmcp = %self.shared.name, "Listener did not shut down in time");
        }

        self.shared.runtime.set_status(VmcpStatus::Stopped);
        tracing::info!(
            vmcp = %self.shared.name,
            port = self.shared.port,
            sessions,
            "Virtual server stopped"
        );
    }

    pub fn id(&self) -> VmcpId {
        self.shared.id
    }

    pub fn port(&self) -> u16 {
        self.shared.port
    }

    pub fn session_count(&self) -> usize {
        self.shared.sessions.count()
    }

    /// The merged view served by this instance (frozen at start).
    pub fn capabilities(&self) -> Value {
        json!({
            "tools": self.shared.view.tools,
            "prompts": self.shared.view.prompts,
            "resources": self.shared.view.resources,
            "duplicatesDropped": self.shared.view.duplicates.total(),
        })
    }

    /// Probe each source and report overall health.
    ///
    /// A source is probed with `health/check` when its transport is up; an
    /// upstream that answers method-not-found is taken at its transport
    /// status. Results update the runtime's per-source health.
    pub async fn check_health(&self) -> HealthReport {
        for source in &self.shared.source_ids {
            match self.probe_source(source).await {
                Ok(()) => {
                    self.shared
                        .runtime
                        .set_source_health(source, SourceHealth::Ok, None)
                }
                Err(reason) => {
                    tracing::warn!(vmcp = %self.shared.name, source = %source, reason = %reason, "Source unhealthy");
                    self.shared
                        .runtime
                        .set_source_health(source, SourceHealth::Error, Some(reason))
                }
            }
        }

        let (_, sources, _) = self.shared.runtime.snapshot();
        HealthReport {
            healthy: !sources.is_empty() && sources.iter().all(|s| s.status == SourceHealth::Ok),
            underlying_servers_status: sources,
        }
    }

    async fn probe_source(&self, source: &str) -> Result<(), String> {
        if !self.shared.registry.is_connected(source).await {
            return Err("transport disconnected".to_string());
        }

        let request = JsonRpcRequest::new(
            JsonRpcId::String(format!("health-{}", Uuid::new_v4())),
            "health/check",
            Some(json!({})),
        );
        match tokio::time::timeout(
            HEALTH_PROBE_TIMEOUT,
            self.shared.registry.request(source, request),
        )
        .await
        {
            Err(_) => Err("health probe timed out".to_string()),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(RegistryError::Transport(TransportError::Rpc(e))))
                if e.code == JsonRpcError::METHOD_NOT_FOUND =>
            {
                Ok(())
            }
            Ok(Err(e)) => Err(e.to_string()),
        }
    }
}

/// Track connectivity of this instance's sources through registry events.
async fn watch_sources(
    shared: Arc<InstanceShared>,
    mut events: broadcast::Receiver<TransportEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let name = event.name().to_string();
                if !shared.source_ids.iter().any(|s| *s == name) {
                    continue;
                }
                match event {
                    TransportEvent::Online { .. } => {
                        shared.runtime.set_source_health(&name, SourceHealth::Ok, None);
                    }
                    TransportEvent::Offline { .. } => {
                        shared.runtime.set_source_health(
                            &name,
                            SourceHealth::Error,
                            Some("transport offline".to_string()),
                        );
                    }
                    TransportEvent::Errored { .. } => {
                        shared.runtime.set_source_health(
                            &name,
                            SourceHealth::Error,
                            Some("transport terminally failed".to_string()),
                        );
                    }
                }
                tracing::debug!(
                    vmcp = %shared.name,
                    source = %name,
                    status = ?shared.runtime.status(),
                    "Source connectivity changed"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(vmcp = %shared.name, skipped, "Missed transport events");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

// =============================================================================
// HTTP surface
// =============================================================================

/// SSE stream that removes its session from the table when the client goes
/// away.
struct SessionStream {
    rx: UnboundedReceiverStream<JsonRpcMessage>,
    shared: Arc<InstanceShared>,
    session_id: Uuid,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_next(cx) {
            Poll::Ready(Some(message)) => {
                let data = serde_json::to_string(&message).unwrap_or_default();
                Poll::Ready(Some(Ok(Event::default().event("message").data(data))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.shared.sessions.remove(&self.session_id);
    }
}

async fn sse_handler(
    State(shared): State<Arc<InstanceShared>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (session_id, rx) = shared.sessions.create();
    tracing::debug!(
        vmcp = %shared.name,
        session_id = %session_id,
        sessions = shared.sessions.count(),
        "Client session established"
    );

    let hello = Event::default().event("endpoint").data(
        json!({"endpoint": "/message", "sessionId": session_id}).to_string(),
    );
    let endpoint = futures::stream::once(std::future::ready(Ok::<_, Infallible>(hello)));
    let messages = SessionStream {
        rx: UnboundedReceiverStream::new(rx),
        shared: shared.clone(),
        session_id,
    };

    Sse::new(endpoint.chain(messages))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("keepalive"))
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Uuid,
}

async fn message_handler(
    State(shared): State<Arc<InstanceShared>>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> StatusCode {
    if !shared.sessions.contains(&query.session_id) {
        return StatusCode::NOT_FOUND;
    }

    let message = match JsonRpcMessage::parse(&body) {
        Ok(m) => m,
        Err(e) => {
            // Protocol errors become JSON-RPC errors on the stream, never a
            // dropped connection.
            shared.sessions.send_to(
                &query.session_id,
                JsonRpcMessage::Response(JsonRpcResponse::error(
                    None,
                    JsonRpcError::parse_error(e.to_string()),
                )),
            );
            return StatusCode::ACCEPTED;
        }
    };

    match message {
        JsonRpcMessage::Request(request) => {
            let session_id = query.session_id;
            let shared = shared.clone();
            tokio::spawn(async move {
                let response = dispatch(&shared, request).await;
                shared
                    .sessions
                    .send_to(&session_id, JsonRpcMessage::Response(response));
            });
        }
        JsonRpcMessage::Notification(n) => {
            tracing::debug!(vmcp = %shared.name, method = %n.method, "Client notification");
        }
        JsonRpcMessage::Response(_) => {
            tracing::debug!(vmcp = %shared.name, "Ignoring response from client");
        }
    }
    StatusCode::ACCEPTED
}

// =============================================================================
// MCP dispatch
// =============================================================================

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

/// An identifier outside the routing map answers method-not-found.
fn unmapped(kind: CapabilityKind, identifier: &str) -> JsonRpcError {
    let error = VmcpError::CapabilityUnmapped {
        kind,
        identifier: identifier.to_string(),
    };
    JsonRpcError {
        code: JsonRpcError::METHOD_NOT_FOUND,
        message: error.to_string(),
        data: None,
    }
}

/// `mcp://<source>/<original-uri>` pass-through shape.
fn parse_scoped_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("mcp://")?;
    let (source, original) = rest.split_once('/')?;
    if source.is_empty() || original.is_empty() {
        return None;
    }
    Some((source, original))
}

fn initialize_result(shared: &InstanceShared) -> Value {
    let mut capabilities = serde_json::Map::new();
    if !shared.view.tools.is_empty() {
        capabilities.insert("tools".to_string(), json!({"listChanged": false}));
    }
    if !shared.view.prompts.is_empty() {
        capabilities.insert("prompts".to_string(), json!({"listChanged": false}));
    }
    if !shared.view.resources.is_empty() {
        capabilities.insert("resources".to_string(), json!({"listChanged": false}));
    }
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": Value::Object(capabilities),
        "serverInfo": {
            "name": shared.name,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

async fn dispatch(shared: &Arc<InstanceShared>, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();
    if !shared.methods.contains(request.method.as_str()) {
        return JsonRpcResponse::error(id, JsonRpcError::method_not_found(&request.method));
    }

    match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(id, initialize_result(shared)),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "health/check" => {
            let (status, sources, _) = shared.runtime.snapshot();
            JsonRpcResponse::success(
                id,
                json!({
                    "healthy": status == VmcpStatus::Running,
                    "underlyingServersStatus": sources,
                }),
            )
        }
        "tools/list" => JsonRpcResponse::success(id, json!({"tools": shared.view.tools})),
        "tools/call" => {
            let params: ToolCallParams = match parse_params(request.params) {
                Ok(p) => p,
                Err(e) => return JsonRpcResponse::error(id, e),
            };
            match shared.view.routing.lookup(CapabilityKind::Tool, &params.name) {
                Some(target) => {
                    let target = target.clone();
                    let upstream_params =
                        json!({"name": target.identifier, "arguments": params.arguments});
                    proxy(shared, &target.source, "tools/call", upstream_params, id).await
                }
                None => JsonRpcResponse::error(id, unmapped(CapabilityKind::Tool, &params.name)),
            }
        }
        "prompts/list" => JsonRpcResponse::success(id, json!({"prompts": shared.view.prompts})),
        "prompts/get" => {
            let params: PromptGetParams = match parse_params(request.params) {
                Ok(p) => p,
                Err(e) => return JsonRpcResponse::error(id, e),
            };
            match shared.view.routing.lookup(CapabilityKind::Prompt, &params.name) {
                Some(target) => {
                    let target = target.clone();
                    let upstream_params =
                        json!({"name": target.identifier, "arguments": params.arguments});
                    proxy(shared, &target.source, "prompts/get", upstream_params, id).await
                }
                None => JsonRpcResponse::error(id, unmapped(CapabilityKind::Prompt, &params.name)),
            }
        }
        "resources/list" => {
            JsonRpcResponse::success(id, json!({"resources": shared.view.resources}))
        }
        "resources/get" => {
            let params: ResourceGetParams = match parse_params(request.params) {
                Ok(p) => p,
                Err(e) => return JsonRpcResponse::error(id, e),
            };
            if let Some(target) = shared.view.routing.lookup(CapabilityKind::Resource, &params.uri)
            {
                let target = target.clone();
                let upstream_params = json!({"uri": target.identifier});
                return proxy(shared, &target.source, "resources/get", upstream_params, id).await;
            }
            // Server-scoped uris pass through when the named source belongs
            // to this virtual server.
            if let Some((source, original)) = parse_scoped_uri(&params.uri) {
                if shared.source_ids.iter().any(|s| s == source) {
                    let source = source.to_string();
                    let upstream_params = json!({"uri": original});
                    return proxy(shared, &source, "resources/get", upstream_params, id).await;
                }
            }
            JsonRpcResponse::error(id, unmapped(CapabilityKind::Resource, &params.uri))
        }
        other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
    }
}

/// Forward an invocation to `source`, minting a fresh correlation id so
/// upstream ids never collide with client-chosen ones.
async fn proxy(
    shared: &Arc<InstanceShared>,
    source: &str,
    method: &str,
    params: Value,
    client_id: Option<JsonRpcId>,
) -> JsonRpcResponse {
    if !shared.runtime.source_is_healthy(source) {
        return JsonRpcResponse::error(
            client_id,
            JsonRpcError::internal_error(format!("upstream '{}' is unavailable", source)),
        );
    }

    let proxy_id = JsonRpcId::String(format!(
        "nexus-{}",
        shared.proxy_seq.fetch_add(1, Ordering::Relaxed)
    ));
    let upstream_request = JsonRpcRequest::new(proxy_id, method, Some(params));

    match shared.registry.request(source, upstream_request).await {
        Ok(result) => JsonRpcResponse::success(client_id, result),
        Err(RegistryError::Transport(TransportError::Rpc(error))) => {
            JsonRpcResponse::error(client_id, error)
        }
        Err(RegistryError::Transport(TransportError::Timeout)) => JsonRpcResponse::error(
            client_id,
            JsonRpcError::internal_error(format!("upstream '{}' timed out", source)),
        ),
        Err(e) => {
            tracing::warn!(vmcp = %shared.name, source = %source, error = %e, "Proxy failure");
            JsonRpcResponse::error(client_id, JsonRpcError::internal_error(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmcp::aggregator::aggregate;
    use nexus_shared::AggregationRule;
    use time::OffsetDateTime;

    async fn shared_with_tools(tools: &[(&str, &str)]) -> Arc<InstanceShared> {
        let catalog = CapabilityCatalog::new();
        for (source, name) in tools {
            catalog
                .register_tool(crate::mcp::types::ToolRecord {
                    source: source.to_string(),
                    name: name.to_string(),
                    description: None,
                    input_schema: json!({"type": "object"}),
                })
                .await
                .unwrap();
        }

        let now = OffsetDateTime::now_utc();
        let mut source_ids: Vec<String> = tools.iter().map(|(s, _)| s.to_string()).collect();
        source_ids.dedup();
        let definition = VirtualServerDefinition {
            id: VmcpId::new(),
            name: "v1".to_string(),
            port: 5001,
            source_server_ids: source_ids.clone(),
            aggregation_rules: vec![AggregationRule::AggregateAll],
            status: VmcpStatus::Stopped,
            underlying_servers_status: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let view = aggregate(&definition, &catalog).await;
        let mut methods: HashSet<&'static str> =
            ["initialize", "ping", "health/check"].into_iter().collect();
        if !view.tools.is_empty() {
            methods.extend(["tools/list", "tools/call"]);
        }

        let runtime = Arc::new(VmcpRuntime::new());
        runtime.mark_running(&source_ids);

        Arc::new(InstanceShared {
            id: definition.id,
            name: definition.name,
            port: definition.port,
            source_ids,
            view,
            methods,
            sessions: SessionTable::new(),
            registry: Arc::new(TransportRegistry::new()),
            runtime,
            proxy_seq: AtomicU64::new(1),
        })
    }

    fn req(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(JsonRpcId::Number(1), method, params)
    }

    #[tokio::test]
    async fn test_unregistered_method_is_method_not_found() {
        let shared = shared_with_tools(&[("u1", "echo")]).await;
        // No prompts in the view, so prompts/* is not registered at all.
        let response = dispatch(&shared, req("prompts/list", None)).await;
        assert_eq!(response.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tools_list_serves_the_frozen_view() {
        let shared = shared_with_tools(&[("u1", "echo")]).await;
        let response = dispatch(&shared, req("tools/list", None)).await;
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "echo");
    }

    #[tokio::test]
    async fn test_unknown_tool_call_is_method_not_found() {
        let shared = shared_with_tools(&[("u1", "echo")]).await;
        let response = dispatch(
            &shared,
            req("tools/call", Some(json!({"name": "b", "arguments": {}}))),
        )
        .await;
        assert_eq!(response.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_call_to_unhealthy_source_fails_fast() {
        let shared = shared_with_tools(&[("u1", "echo")]).await;
        shared
            .runtime
            .set_source_health("u1", SourceHealth::Error, Some("gone".to_string()));

        let response = dispatch(
            &shared,
            req("tools/call", Some(json!({"name": "echo", "arguments": {}}))),
        )
        .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, JsonRpcError::INTERNAL_ERROR);
        assert!(error.message.contains("unavailable"));
    }

    #[tokio::test]
    async fn test_invalid_params_are_reported_as_such() {
        let shared = shared_with_tools(&[("u1", "echo")]).await;
        let response = dispatch(&shared, req("tools/call", Some(json!("not an object")))).await;
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_initialize_advertises_only_present_kinds() {
        let shared = shared_with_tools(&[("u1", "echo")]).await;
        let response = dispatch(&shared, req("initialize", None)).await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert!(result["capabilities"].get("tools").is_some());
        assert!(result["capabilities"].get("prompts").is_none());
    }

    #[tokio::test]
    async fn test_ping_answers_empty_object() {
        let shared = shared_with_tools(&[("u1", "echo")]).await;
        let response = dispatch(&shared, req("ping", None)).await;
        assert_eq!(response.result.unwrap(), json!({}));
    }

    #[test]
    fn test_scoped_uri_parsing() {
        assert_eq!(
            parse_scoped_uri("mcp://u1/file:///tmp/x"),
            Some(("u1", "file:///tmp/x"))
        );
        assert_eq!(parse_scoped_uri("mcp://u1"), None);
        assert_eq!(parse_scoped_uri("file:///tmp/x"), None);
        assert_eq!(parse_scoped_uri("mcp:///orphan"), None);
    }
}
