// crates/virt-gate-mcp/src/server.rs
// ============================================================================
// Module: MCP Server
// Description: MCP server implementations for stdio, HTTP, and SSE transports.
// Purpose: Expose Virt Gate tools via JSON-RPC 2.0.
// Dependencies: virt-gate-core, virt-gate-config, virt-gate-providers, axum, tokio
// ============================================================================

//! ## Overview
//! The MCP server exposes Virt Gate tools using JSON-RPC 2.0. It supports
//! stdio, HTTP, and SSE transports and always routes calls through
//! [`crate::tools::ToolRouter`].
//!
//! Stdio accepts both MCP framings and detects them per message: a line that
//! opens a JSON value is one newline-delimited message, anything else starts
//! a `Content-Length` header block. Each response is written in the framing
//! of the request it answers.
//!
//! Stdio requests run concurrently: each call is a task and all responses
//! funnel through a single writer, so frames never interleave. Closing stdin
//! cancels every in-flight call. `notifications/cancelled` cancels the call
//! with the matching request id on any transport.
//!
//! Security posture: inputs are untrusted; request bodies and stdio frames
//! are bounded by `server.max_body_bytes`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::response::Sse;
use axum::response::sse::Event;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;
use virt_gate_config::BackendConfig;
use virt_gate_config::BackendDriver;
use virt_gate_config::ServerTransport;
use virt_gate_config::VirtGateConfig;
use virt_gate_core::AuditLog;
use virt_gate_core::BackendConnector;
use virt_gate_core::CallerContext;
use virt_gate_core::ConnectionManager;
use virt_gate_core::GatewayError;
use virt_gate_core::OperationGateway;
use virt_gate_providers::InMemoryHypervisor;
use virt_gate_providers::VirshConnector;

use crate::audit::build_audit_sink;
use crate::tools::ToolDefinition;
use crate::tools::ToolError;
use crate::tools::ToolRouter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// JSON-RPC protocol version.
const JSONRPC_VERSION: &str = "2.0";
/// MCP protocol revision advertised when the client does not request one.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
/// Maximum total size of one stdio header block.
const MAX_HEADER_BYTES: usize = 8 * 1024;
/// Outbound stdio frames buffered ahead of the writer.
const OUTBOUND_QUEUE: usize = 64;

/// Invalid JSON payload.
const PARSE_ERROR: i64 = -32700;
/// Payload is not a valid JSON-RPC request.
const INVALID_REQUEST: i64 = -32600;
/// Unknown method or tool.
const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method or tool parameters.
const INVALID_PARAMS: i64 = -32602;
/// Operation not permitted by policy.
const PERMISSION_DENIED: i64 = -32001;
/// Concurrency limit reached.
const LIMIT_EXCEEDED: i64 = -32002;
/// Timed out waiting for an operation slot.
const TIMEOUT: i64 = -32003;
/// Mutating operation refused in read-only mode.
const READ_ONLY: i64 = -32004;
/// Backend connection unavailable.
const BACKEND_UNAVAILABLE: i64 = -32010;
/// Backend reported an operation error.
const BACKEND_ERROR: i64 = -32011;
/// Tool output serialization failed.
const SERIALIZATION_FAILED: i64 = -32060;
/// Request body exceeded the configured limit.
const BODY_TOO_LARGE: i64 = -32070;
/// Request was cancelled by the client.
const REQUEST_CANCELLED: i64 = -32800;

// ============================================================================
// SECTION: MCP Server
// ============================================================================

/// MCP server instance.
pub struct McpServer {
    /// Server configuration.
    config: VirtGateConfig,
    /// JSON-RPC dispatcher shared by all transports.
    handler: RpcHandler,
}

impl McpServer {
    /// Builds a new MCP server from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when validation or initialization fails.
    pub fn from_config(config: VirtGateConfig) -> Result<Self, McpServerError> {
        config.validate().map_err(|err| McpServerError::Config(err.to_string()))?;
        let gateway = build_gateway(&config)?;
        Ok(Self::with_gateway(config, Arc::new(gateway)))
    }

    /// Builds a server around an existing gateway.
    #[must_use]
    pub fn with_gateway(config: VirtGateConfig, gateway: Arc<OperationGateway>) -> Self {
        let handler = RpcHandler::new(ToolRouter::new(gateway), &config.server.name);
        Self {
            config,
            handler,
        }
    }

    /// Returns the gateway behind the server.
    #[must_use]
    pub const fn gateway(&self) -> &Arc<OperationGateway> {
        self.handler.router.gateway()
    }

    /// Builds the HTTP router (`POST /rpc`, `GET /health`).
    #[must_use]
    pub fn http_router(&self) -> Router {
        self.network_router(ServerTransport::Http, CancellationToken::new())
    }

    /// Builds the SSE router (`POST /rpc` answered as one event, `GET /health`).
    #[must_use]
    pub fn sse_router(&self) -> Router {
        self.network_router(ServerTransport::Sse, CancellationToken::new())
    }

    /// Serves requests using the configured transport until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError`] when the transport fails.
    pub async fn serve(self) -> Result<(), McpServerError> {
        if let Err(err) = self.gateway().connect().await {
            warn!(error = %err, "initial backend connection failed; retrying on first call");
        }
        let reload = spawn_reload_listener(self.config.source_path.clone(), Arc::clone(self.gateway()));
        let transport = self.config.server.transport;
        info!(transport = transport_label(transport), name = %self.config.server.name, "mcp server starting");
        let result = match transport {
            ServerTransport::Stdio => self.serve_stdio(tokio::io::stdin(), tokio::io::stdout()).await,
            ServerTransport::Http | ServerTransport::Sse => self.serve_network(transport).await,
        };
        if let Some(reload) = reload {
            reload.abort();
        }
        self.gateway().shutdown().await;
        info!("mcp server stopped");
        result
    }

    /// Serves JSON-RPC over the given byte streams until EOF, accepting
    /// newline-delimited and `Content-Length` framed messages.
    ///
    /// # Errors
    ///
    /// Returns [`McpServerError::Transport`] on malformed framing or write
    /// failure.
    pub async fn serve_stdio<R, W>(&self, reader: R, writer: W) -> Result<(), McpServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let max_body_bytes = self.config.server.max_body_bytes;
        let mut reader = BufReader::new(reader);
        let (tx, rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
        let writer_task = tokio::spawn(write_loop(writer, rx));
        let root = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let outcome = loop {
            while let Some(joined) = tasks.try_join_next() {
                log_join_failure(joined);
            }
            let (framing, payload) = match read_framed(&mut reader, max_body_bytes).await {
                Ok(Frame::Payload(framing, payload)) => (framing, payload),
                Ok(Frame::Oversized(framing, len)) => {
                    warn!(len, max_body_bytes, "stdio frame exceeds body limit");
                    let response =
                        JsonRpcResponse::failure(Value::Null, BODY_TOO_LARGE, "request body too large", None);
                    send_response(&tx, framing, &response).await;
                    continue;
                }
                Ok(Frame::Closed) => break Ok(()),
                Err(err) => break Err(err),
            };
            match decode_request(&payload) {
                Ok(request) => {
                    let handler = self.handler.clone();
                    let tx = tx.clone();
                    let root = root.clone();
                    tasks.spawn(async move {
                        if let Some((_, response)) = handler.handle(request, "stdio", &root).await {
                            send_response(&tx, framing, &response).await;
                        }
                    });
                }
                Err((_, response)) => send_response(&tx, framing, &response).await,
            }
        };

        root.cancel();
        while let Some(joined) = tasks.join_next().await {
            log_join_failure(joined);
        }
        drop(tx);
        let written = match writer_task.await {
            Ok(written) => written,
            Err(err) => Err(McpServerError::Transport(format!("stdio writer failed: {err}"))),
        };
        outcome.and(written)
    }

    /// Serves HTTP or SSE on the configured bind address.
    async fn serve_network(&self, transport: ServerTransport) -> Result<(), McpServerError> {
        let addr = self.config.server.bind_addr().map_err(|err| McpServerError::Config(err.to_string()))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| McpServerError::Transport(format!("bind {addr} failed: {err}")))?;
        info!(%addr, "listening");
        let root = CancellationToken::new();
        let app = self.network_router(transport, root.clone());
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                root.cancel();
            })
            .await
            .map_err(|err| McpServerError::Transport(format!("http server failed: {err}")))
    }

    /// Builds the axum router for a network transport.
    fn network_router(&self, transport: ServerTransport, root: CancellationToken) -> Router {
        let max_body_bytes = self.config.server.max_body_bytes;
        let state = Arc::new(ServerState {
            handler: self.handler.clone(),
            max_body_bytes,
            root,
        });
        let rpc = if transport == ServerTransport::Sse { post(handle_sse) } else { post(handle_http) };
        Router::new()
            .route("/rpc", rpc)
            .route("/health", get(handle_health))
            .layer(DefaultBodyLimit::max(max_body_bytes))
            .with_state(state)
    }
}

// ============================================================================
// SECTION: Construction
// ============================================================================

/// Builds the backend connector selected by configuration.
#[must_use]
pub fn build_connector(backend: &BackendConfig) -> Arc<dyn BackendConnector> {
    match backend.driver {
        BackendDriver::Virsh => Arc::new(VirshConnector::new(backend.virsh_path.clone())),
        BackendDriver::Memory => Arc::new(InMemoryHypervisor::new()),
    }
}

/// Builds the operation gateway described by configuration.
///
/// # Errors
///
/// Returns [`McpServerError`] when the audit sink cannot be opened or the
/// policy does not compile.
pub fn build_gateway(config: &VirtGateConfig) -> Result<OperationGateway, McpServerError> {
    let sink = build_audit_sink(&config.audit).map_err(|err| McpServerError::Init(format!("audit sink: {err}")))?;
    let connection = ConnectionManager::new(build_connector(&config.backend), config.connection_settings());
    OperationGateway::new(config.permission_policy(), connection, AuditLog::new(sink), config.gateway_config())
        .map_err(|err| McpServerError::Config(err.to_string()))
}

/// Reloads the configuration file and swaps in its permission policy.
///
/// Returns the new policy generation. The previous policy stays in force on
/// any error.
///
/// # Errors
///
/// Returns [`McpServerError::Config`] when the file fails to load or
/// validate.
pub fn reload_policy_from(path: Option<&Path>, gateway: &OperationGateway) -> Result<u64, McpServerError> {
    let config = VirtGateConfig::load(path).map_err(|err| McpServerError::Config(err.to_string()))?;
    gateway.reload_policy(config.permission_policy()).map_err(|err| McpServerError::Config(err.to_string()))
}

/// Reloads policy on `SIGHUP`.
#[cfg(unix)]
fn spawn_reload_listener(path: Option<PathBuf>, gateway: Arc<OperationGateway>) -> Option<JoinHandle<()>> {
    use tokio::signal::unix::SignalKind;
    use tokio::signal::unix::signal;

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(err) => {
            warn!(error = %err, "SIGHUP handler unavailable; policy reload disabled");
            return None;
        }
    };
    Some(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match reload_policy_from(path.as_deref(), &gateway) {
                Ok(generation) => info!(generation, "policy reloaded"),
                Err(err) => warn!(error = %err, "policy reload failed; keeping previous policy"),
            }
        }
    }))
}

/// Signal-driven reload is unavailable on this platform.
#[cfg(not(unix))]
fn spawn_reload_listener(_path: Option<PathBuf>, _gateway: Arc<OperationGateway>) -> Option<JoinHandle<()>> {
    None
}

/// Resolves when the process is asked to stop.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Returns the label of a transport for logs.
const fn transport_label(transport: ServerTransport) -> &'static str {
    match transport {
        ServerTransport::Stdio => "stdio",
        ServerTransport::Http => "http",
        ServerTransport::Sse => "sse",
    }
}

// ============================================================================
// SECTION: HTTP Transport
// ============================================================================

/// Shared server state for HTTP/SSE handlers.
struct ServerState {
    /// JSON-RPC dispatcher.
    handler: RpcHandler,
    /// Maximum allowed request body size.
    max_body_bytes: usize,
    /// Parent token for request cancellation; cancelled on shutdown.
    root: CancellationToken,
}

/// Handles HTTP JSON-RPC requests.
async fn handle_http(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    bytes: Bytes,
) -> Response {
    let caller = format!("http:{peer}");
    match parse_request(&state, &caller, &bytes).await {
        (status, Some(response)) => (status, axum::Json(response)).into_response(),
        (status, None) => status.into_response(),
    }
}

/// Handles SSE JSON-RPC requests.
async fn handle_sse(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    bytes: Bytes,
) -> impl IntoResponse {
    let caller = format!("sse:{peer}");
    let (_, response) = parse_request(&state, &caller, &bytes).await;
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(1);
    if let Some(response) = response {
        let payload = String::from_utf8(encode_response(&response)).unwrap_or_default();
        let _ = tx.send(Ok(Event::default().data(payload))).await;
    }
    Sse::new(ReceiverStream::new(rx))
}

/// Reports gateway status.
async fn handle_health(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    axum::Json(state.handler.router.gateway().status())
}

/// Parses and dispatches an HTTP request body.
///
/// Returns `None` as the response for notifications.
async fn parse_request(
    state: &ServerState,
    caller: &str,
    bytes: &Bytes,
) -> (StatusCode, Option<JsonRpcResponse>) {
    if bytes.len() > state.max_body_bytes {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Some(JsonRpcResponse::failure(Value::Null, BODY_TOO_LARGE, "request body too large", None)),
        );
    }
    match decode_request(bytes) {
        Ok(request) => match state.handler.handle(request, caller, &state.root).await {
            Some((status, response)) => (status, Some(response)),
            None => (StatusCode::ACCEPTED, None),
        },
        Err((status, response)) => (status, Some(response)),
    }
}

// ============================================================================
// SECTION: JSON-RPC Types
// ============================================================================

/// Incoming JSON-RPC request payload.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    /// JSON-RPC protocol version.
    jsonrpc: String,
    /// Request identifier; absent for notifications.
    #[serde(default)]
    id: Option<Value>,
    /// Method name.
    method: String,
    /// Optional parameters payload.
    #[serde(default)]
    params: Option<Value>,
}

/// JSON-RPC response envelope.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    /// JSON-RPC protocol version.
    jsonrpc: &'static str,
    /// Request identifier.
    id: Value,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    /// Error payload when the request fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Builds a success response.
    const fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response.
    fn failure(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }
}

/// JSON-RPC error payload.
#[derive(Debug, Serialize)]
struct JsonRpcError {
    /// Error code.
    code: i64,
    /// Human-readable error message.
    message: String,
    /// Structured detail carrying the error kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Tool call parameters for JSON-RPC requests.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    /// Tool name.
    name: String,
    /// Raw JSON arguments.
    #[serde(default)]
    arguments: Value,
}

/// Tool list response payload.
#[derive(Debug, Serialize)]
struct ToolListResult {
    /// Registered tool definitions.
    tools: Vec<ToolDefinition>,
}

/// Tool call response payload.
#[derive(Debug, Serialize)]
struct ToolCallResult {
    /// Tool output content.
    content: Vec<ToolContent>,
    /// Tool output as structured JSON.
    #[serde(rename = "structuredContent")]
    structured_content: Value,
    /// Always false; failures are JSON-RPC errors.
    #[serde(rename = "isError")]
    is_error: bool,
}

/// Tool output payloads for JSON-RPC responses.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ToolContent {
    /// JSON tool output rendered as text.
    Text {
        /// Serialized JSON payload.
        text: String,
    },
}

// ============================================================================
// SECTION: JSON-RPC Handling
// ============================================================================

/// In-flight calls keyed by serialized request id.
type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// JSON-RPC dispatcher shared by all transports.
#[derive(Clone)]
struct RpcHandler {
    /// Tool router for request dispatch.
    router: ToolRouter,
    /// Server name advertised on initialize.
    server_name: Arc<str>,
    /// Cancellation handles for running calls.
    in_flight: InFlight,
}

impl RpcHandler {
    /// Creates a dispatcher.
    fn new(router: ToolRouter, server_name: &str) -> Self {
        Self {
            router,
            server_name: Arc::from(server_name),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Dispatches one request; returns `None` for notifications.
    async fn handle(
        &self,
        request: JsonRpcRequest,
        caller: &str,
        root: &CancellationToken,
    ) -> Option<(StatusCode, JsonRpcResponse)> {
        let Some(id) = request.id else {
            self.handle_notification(&request.method, request.params.as_ref());
            return None;
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return Some((
                StatusCode::BAD_REQUEST,
                JsonRpcResponse::failure(id, INVALID_REQUEST, "invalid json-rpc version", None),
            ));
        }
        let response = match request.method.as_str() {
            "initialize" => (StatusCode::OK, JsonRpcResponse::success(id, self.initialize(request.params.as_ref()))),
            "ping" => (StatusCode::OK, JsonRpcResponse::success(id, json!({}))),
            "tools/list" => {
                let tools = ToolListResult {
                    tools: self.router.list_tools(),
                };
                match serde_json::to_value(tools) {
                    Ok(value) => (StatusCode::OK, JsonRpcResponse::success(id, value)),
                    Err(_) => jsonrpc_error(id, &ToolError::Serialization),
                }
            }
            "tools/call" => self.call_tool(id, request.params, caller, root).await,
            _ => (
                StatusCode::BAD_REQUEST,
                JsonRpcResponse::failure(id, METHOD_NOT_FOUND, "method not found", None),
            ),
        };
        Some(response)
    }

    /// Builds the initialize result, echoing the client's protocol revision.
    fn initialize(&self, params: Option<&Value>) -> Value {
        let protocol = params
            .and_then(|params| params.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);
        json!({
            "protocolVersion": protocol,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": self.server_name.as_ref(),
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    /// Runs a `tools/call` request under a cancellable token.
    async fn call_tool(
        &self,
        id: Value,
        params: Option<Value>,
        caller: &str,
        root: &CancellationToken,
    ) -> (StatusCode, JsonRpcResponse) {
        let Ok(call) = serde_json::from_value::<ToolCallParams>(params.unwrap_or(Value::Null)) else {
            return (
                StatusCode::BAD_REQUEST,
                JsonRpcResponse::failure(id, INVALID_PARAMS, "invalid tool params", None),
            );
        };
        let key = id.to_string();
        let cancel = root.child_token();
        let _registration = InFlightGuard::register(&self.in_flight, key.clone(), cancel.clone());
        let caller = CallerContext::new(format!("{caller}:{key}"));
        debug!(tool = %call.name, %caller, "tool call");
        match self.router.handle_tool_call(caller, &call.name, call.arguments, &cancel).await {
            Ok(output) => {
                let result = ToolCallResult {
                    content: vec![ToolContent::Text {
                        text: output.to_string(),
                    }],
                    structured_content: output,
                    is_error: false,
                };
                match serde_json::to_value(result) {
                    Ok(value) => (StatusCode::OK, JsonRpcResponse::success(id, value)),
                    Err(_) => jsonrpc_error(id, &ToolError::Serialization),
                }
            }
            Err(err) => jsonrpc_error(id, &err),
        }
    }

    /// Handles a notification; notifications never produce a response.
    fn handle_notification(&self, method: &str, params: Option<&Value>) {
        match method {
            "notifications/cancelled" => {
                let Some(request_id) = params.and_then(|params| params.get("requestId")) else {
                    return;
                };
                let key = request_id.to_string();
                let token = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).get(&key).cloned();
                if let Some(token) = token {
                    info!(request_id = %key, "cancelling in-flight call");
                    token.cancel();
                }
            }
            "notifications/initialized" => debug!("client initialized"),
            other => debug!(method = other, "ignoring notification"),
        }
    }
}

/// Removes an in-flight registration when the call finishes or is dropped.
struct InFlightGuard {
    /// Registry the entry lives in.
    in_flight: InFlight,
    /// Serialized request id.
    key: String,
}

impl InFlightGuard {
    /// Registers a call's cancellation token.
    fn register(in_flight: &InFlight, key: String, token: CancellationToken) -> Self {
        in_flight.lock().unwrap_or_else(PoisonError::into_inner).insert(key.clone(), token);
        Self {
            in_flight: Arc::clone(in_flight),
            key,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.key);
    }
}

/// Decodes a JSON-RPC request, or the error response to send instead.
fn decode_request(bytes: &[u8]) -> Result<JsonRpcRequest, (StatusCode, JsonRpcResponse)> {
    let value: Value = serde_json::from_slice(bytes).map_err(|_| {
        (StatusCode::BAD_REQUEST, JsonRpcResponse::failure(Value::Null, PARSE_ERROR, "parse error", None))
    })?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|_| {
        (StatusCode::BAD_REQUEST, JsonRpcResponse::failure(id, INVALID_REQUEST, "invalid json-rpc request", None))
    })
}

/// Builds a JSON-RPC error response for a tool failure.
fn jsonrpc_error(id: Value, error: &ToolError) -> (StatusCode, JsonRpcResponse) {
    let (status, code) = match error {
        ToolError::UnknownTool(_) => (StatusCode::BAD_REQUEST, METHOD_NOT_FOUND),
        ToolError::InvalidArguments(_) | ToolError::Gateway(GatewayError::Validation(_)) => {
            (StatusCode::BAD_REQUEST, INVALID_PARAMS)
        }
        ToolError::Gateway(GatewayError::PermissionDenied { .. }) => (StatusCode::FORBIDDEN, PERMISSION_DENIED),
        ToolError::Gateway(GatewayError::ReadOnly { .. }) => (StatusCode::FORBIDDEN, READ_ONLY),
        ToolError::Gateway(GatewayError::LimitExceeded { .. }) => (StatusCode::OK, LIMIT_EXCEEDED),
        ToolError::Gateway(GatewayError::Timeout { .. }) => (StatusCode::OK, TIMEOUT),
        ToolError::Gateway(GatewayError::BackendUnavailable(_)) => (StatusCode::OK, BACKEND_UNAVAILABLE),
        ToolError::Gateway(GatewayError::Backend { .. }) => (StatusCode::OK, BACKEND_ERROR),
        ToolError::Gateway(GatewayError::Cancelled) => (StatusCode::OK, REQUEST_CANCELLED),
        ToolError::Serialization => (StatusCode::OK, SERIALIZATION_FAILED),
    };
    let data = json!({
        "kind": error.kind(),
        "retryable": error.is_retryable(),
    });
    (status, JsonRpcResponse::failure(id, code, error.to_string(), Some(data)))
}

/// Serializes a response, falling back to a fixed error payload.
fn encode_response(response: &JsonRpcResponse) -> Vec<u8> {
    serde_json::to_vec(response).unwrap_or_else(|_| {
        br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32060,"message":"serialization failed"}}"#.to_vec()
    })
}

// ============================================================================
// SECTION: Framing Helpers
// ============================================================================

/// Stdio message framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// `Content-Length` header block followed by the body.
    ContentLength,
    /// One JSON document per line.
    NewlineDelimited,
}

/// Outcome of reading one stdio frame.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    /// Complete payload.
    Payload(Framing, Vec<u8>),
    /// Payload over the limit; its bytes were discarded.
    Oversized(Framing, usize),
    /// Input closed between frames.
    Closed,
}

/// Response bytes queued for the stdio writer.
struct Outbound {
    /// Framing of the request being answered.
    framing: Framing,
    /// Encoded JSON-RPC response.
    payload: Vec<u8>,
}

/// Builds the stdio read error.
fn read_failed() -> McpServerError {
    McpServerError::Transport("stdio read failed".to_string())
}

/// Reads one stdio message in either framing.
///
/// Blank lines between messages are skipped. The first non-blank line picks
/// the framing: `{` or `[` starts a newline-delimited message, anything else
/// is the first `Content-Length` header line.
async fn read_framed<R>(reader: &mut R, max_body_bytes: usize) -> Result<Frame, McpServerError>
where
    R: AsyncBufRead + Unpin,
{
    let line_limit = max_body_bytes.saturating_add(2).max(MAX_HEADER_BYTES);
    let mut line = Vec::new();
    let (read, truncated) = loop {
        line.clear();
        let (read, truncated) = read_line_bounded(reader, &mut line, line_limit).await?;
        if read == 0 {
            return Ok(Frame::Closed);
        }
        if truncated || !line.trim_ascii().is_empty() {
            break (read, truncated);
        }
    };

    if matches!(line.trim_ascii_start().first(), Some(b'{' | b'[')) {
        if truncated {
            let discarded = discard_line(reader).await?;
            return Ok(Frame::Oversized(Framing::NewlineDelimited, read + discarded));
        }
        let body = line.trim_ascii();
        if body.len() > max_body_bytes {
            return Ok(Frame::Oversized(Framing::NewlineDelimited, body.len()));
        }
        return Ok(Frame::Payload(Framing::NewlineDelimited, body.to_vec()));
    }

    if truncated {
        return Err(McpServerError::Transport("headers too large".to_string()));
    }
    let len = read_content_length(reader, &line, read).await?;
    if len > max_body_bytes {
        let limit = u64::try_from(len).unwrap_or(u64::MAX);
        let discarded = tokio::io::copy(&mut (&mut *reader).take(limit), &mut tokio::io::sink())
            .await
            .map_err(|_| read_failed())?;
        if discarded < limit {
            return Err(McpServerError::Transport("stdio closed mid-frame".to_string()));
        }
        return Ok(Frame::Oversized(Framing::ContentLength, len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(|_| read_failed())?;
    Ok(Frame::Payload(Framing::ContentLength, buf))
}

/// Parses a header block whose first line was already read.
async fn read_content_length<R>(reader: &mut R, first: &[u8], first_len: usize) -> Result<usize, McpServerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut header_bytes = first_len;
    let mut line = first.to_vec();
    loop {
        if header_bytes > MAX_HEADER_BYTES {
            return Err(McpServerError::Transport("headers too large".to_string()));
        }
        let text = std::str::from_utf8(&line)
            .map_err(|_| McpServerError::Transport("invalid header encoding".to_string()))?;
        if text.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = text.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            if content_length.is_some() {
                return Err(McpServerError::Transport("duplicate content length".to_string()));
            }
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| McpServerError::Transport("invalid content length".to_string()))?;
            content_length = Some(parsed);
        }
        line.clear();
        let (read, _) = read_line_bounded(reader, &mut line, MAX_HEADER_BYTES + 1).await?;
        if read == 0 {
            return Err(McpServerError::Transport("stdio closed mid-header".to_string()));
        }
        header_bytes += read;
    }
    content_length.ok_or_else(|| McpServerError::Transport("missing content length".to_string()))
}

/// Reads up to `limit` bytes through the next newline.
///
/// Returns the bytes read and whether the line was cut off at the limit.
async fn read_line_bounded<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    limit: usize,
) -> Result<(usize, bool), McpServerError>
where
    R: AsyncBufRead + Unpin,
{
    let bound = u64::try_from(limit).unwrap_or(u64::MAX);
    let read = (&mut *reader).take(bound).read_until(b'\n', line).await.map_err(|_| read_failed())?;
    Ok((read, read >= limit && line.last() != Some(&b'\n')))
}

/// Consumes input through the next newline and returns the bytes skipped.
async fn discard_line<R>(reader: &mut R) -> Result<usize, McpServerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut discarded = 0usize;
    loop {
        let (consumed, done) = {
            let buf = reader.fill_buf().await.map_err(|_| read_failed())?;
            if buf.is_empty() {
                return Ok(discarded);
            }
            buf.iter().position(|byte| *byte == b'\n').map_or((buf.len(), false), |pos| (pos + 1, true))
        };
        reader.consume(consumed);
        discarded += consumed;
        if done {
            return Ok(discarded);
        }
    }
}

/// Writes one stdio payload in the given framing.
async fn write_framed<W>(writer: &mut W, framing: Framing, payload: &[u8]) -> Result<(), McpServerError>
where
    W: AsyncWrite + Unpin,
{
    let write_failed = |_| McpServerError::Transport("stdio write failed".to_string());
    match framing {
        Framing::ContentLength => {
            let header = format!("Content-Length: {}\r\n\r\n", payload.len());
            writer.write_all(header.as_bytes()).await.map_err(write_failed)?;
            writer.write_all(payload).await.map_err(write_failed)?;
        }
        Framing::NewlineDelimited => {
            writer.write_all(payload).await.map_err(write_failed)?;
            writer.write_all(b"\n").await.map_err(write_failed)?;
        }
    }
    writer.flush().await.map_err(write_failed)
}

/// Drains outbound frames into the writer.
async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Outbound>) -> Result<(), McpServerError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        write_framed(&mut writer, outbound.framing, &outbound.payload).await?;
    }
    Ok(())
}

/// Queues a response for the stdio writer.
async fn send_response(tx: &mpsc::Sender<Outbound>, framing: Framing, response: &JsonRpcResponse) {
    let outbound = Outbound {
        framing,
        payload: encode_response(response),
    };
    if tx.send(outbound).await.is_err() {
        warn!("stdio writer closed; dropping response");
    }
}

/// Logs a request task that panicked or was aborted.
fn log_join_failure(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        warn!(error = %err, "request task failed");
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// MCP server errors.
#[derive(Debug, Error)]
pub enum McpServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
