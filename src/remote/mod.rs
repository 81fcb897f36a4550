mod transport;

pub use transport::{Credentials, Transport};

use crate::config::TimeoutsConfig;
use crate::errors::{Result, ToolError};
use crate::model::ToolMetadata;
use crate::tool::Tool;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

/// States of the per-server state machine (§4.6). `Reconnecting` is a
/// degraded sub-state entered after a transport failure while attempting to
/// recover back to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Disconnected,
    Connecting,
    Initialising,
    Ready,
    Reconnecting,
    Closing,
    Closed,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AdapterState::Disconnected => "DISCONNECTED",
            AdapterState::Connecting => "CONNECTING",
            AdapterState::Initialising => "INITIALISING",
            AdapterState::Ready => "READY",
            AdapterState::Reconnecting => "RECONNECTING",
            AdapterState::Closing => "CLOSING",
            AdapterState::Closed => "CLOSED",
        };
        write!(f, "{label}")
    }
}

/// Invoked once when an OAuth-indicating error is detected. Returns fresh
/// credentials, or an error if refresh itself fails.
pub type RefreshCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<Credentials>> + Send>> + Send + Sync>;

const OAUTH_ERROR_PATTERNS: &[&str] = &["invalid_token", "expired token", "expired_token", "unauthorized"];

fn is_oauth_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    OAUTH_ERROR_PATTERNS.iter().any(|p| lower.contains(p))
}

fn is_transient_transport_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["connection reset", "connection refused", "broken pipe", "reset by peer"]
        .iter()
        .any(|p| lower.contains(p))
}

/// A per-server state machine over an abstract `Transport`: connect,
/// session, call, disconnect, plus error classification and OAuth refresh.
pub struct RemoteAdapter {
    namespace: String,
    transport: Arc<dyn Transport>,
    timeouts: TimeoutsConfig,
    refresh: Option<RefreshCallback>,
    state: Mutex<AdapterState>,
    tools: Mutex<Vec<ToolMetadata>>,
    close_notify: Notify,
}

impl RemoteAdapter {
    pub fn new(namespace: impl Into<String>, transport: Arc<dyn Transport>, timeouts: TimeoutsConfig) -> Self {
        Self {
            namespace: namespace.into(),
            transport,
            timeouts,
            refresh: None,
            state: Mutex::new(AdapterState::Disconnected),
            tools: Mutex::new(Vec::new()),
            close_notify: Notify::new(),
        }
    }

    pub fn with_refresh_callback(mut self, refresh: RefreshCallback) -> Self {
        self.refresh = Some(refresh);
        self
    }

    pub async fn state(&self) -> AdapterState {
        *self.state.lock().await
    }

    /// Opens the transport, performs the protocol handshake, lists
    /// available tools, and caches the list.
    pub async fn initialise(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            *state = AdapterState::Connecting;
        }

        let connect_timeout = std::time::Duration::from_millis(self.timeouts.connect_ms);
        let connected = tokio::time::timeout(connect_timeout, self.transport.connect()).await;
        match connected {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                *self.state.lock().await = AdapterState::Disconnected;
                return Err(ToolError::McpConnectionFailed(e.to_string()));
            }
            Err(_) => {
                *self.state.lock().await = AdapterState::Disconnected;
                return Err(ToolError::McpConnectionFailed("connect timed out".into()));
            }
        }

        *self.state.lock().await = AdapterState::Initialising;

        let handshake = serde_json::json!({"method": "initialize"});
        let response = tokio::time::timeout(connect_timeout, self.transport.send(handshake))
            .await
            .map_err(|_| ToolError::McpTransportError("handshake timed out".into()))?
            .map_err(|e| ToolError::McpTransportError(e.to_string()))?;

        let list_request = serde_json::json!({"method": "list_tools"});
        let list_response = tokio::time::timeout(connect_timeout, self.transport.send(list_request))
            .await
            .map_err(|_| ToolError::McpTransportError("list_tools timed out".into()))?
            .map_err(|e| ToolError::McpTransportError(e.to_string()))?;

        let _ = response;
        let tools = parse_tool_list(&list_response);
        *self.tools.lock().await = tools;
        *self.state.lock().await = AdapterState::Ready;
        info!(namespace = %self.namespace, "remote adapter ready");
        Ok(())
    }

    pub async fn list_tools(&self) -> Vec<ToolMetadata> {
        self.tools.lock().await.clone()
    }

    /// Allowed only in `Ready`. Awaits a response up to `operation` timeout,
    /// retrying exactly once on an OAuth-indicating error if a refresh
    /// callback is configured.
    pub async fn call_tool(&self, name: &str, arguments: Value, timeout_ms: Option<u64>) -> Result<Value> {
        if *self.state.lock().await != AdapterState::Ready {
            return Err(ToolError::Configuration(format!(
                "remote adapter for '{}' is not READY",
                self.namespace
            )));
        }

        let timeout = std::time::Duration::from_millis(timeout_ms.unwrap_or(self.timeouts.operation_ms));
        let request = serde_json::json!({"method": "call_tool", "params": {"name": name, "arguments": arguments}});

        match self.send_with_timeout(request.clone(), timeout).await {
            Ok(value) => Ok(value),
            Err(e) if is_oauth_error(&e.to_string()) && self.refresh.is_some() => {
                warn!(namespace = %self.namespace, tool = name, "oauth error, attempting refresh");
                let refresh = self.refresh.as_ref().unwrap();
                match refresh().await {
                    Ok(_creds) => self.send_with_timeout(request, timeout).await,
                    Err(_) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn send_with_timeout(&self, request: Value, timeout: std::time::Duration) -> Result<Value> {
        let cancelled = self.close_notify.notified();
        tokio::select! {
            biased;
            _ = cancelled => Err(ToolError::Cancelled(format!(
                "remote adapter for '{}' was closed while the call was in flight",
                self.namespace
            ))),
            outcome = tokio::time::timeout(timeout, self.transport.send(request)) => {
                match outcome {
                    Ok(Ok(value)) => {
                        if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
                            return Err(classify_server_error(error));
                        }
                        Ok(value)
                    }
                    Ok(Err(e)) => Err(classify_transport_error(&e.to_string())),
                    Err(_) => Err(ToolError::McpTimeout),
                }
            }
        }
    }

    /// Idempotent shutdown. `notify_waiters` wakes every call currently
    /// parked in `send_with_timeout`'s `select!`, which surfaces
    /// `TOOL_CANCELLED` for each of them; calling `close` twice is a no-op
    /// on the second call.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == AdapterState::Closed {
            return Ok(());
        }
        *state = AdapterState::Closing;
        drop(state);

        self.close_notify.notify_waiters();

        let shutdown_timeout = std::time::Duration::from_millis(self.timeouts.shutdown_ms);
        let _ = tokio::time::timeout(shutdown_timeout, self.transport.close()).await;
        *self.state.lock().await = AdapterState::Closed;
        Ok(())
    }
}

fn parse_tool_list(response: &Value) -> Vec<ToolMetadata> {
    response
        .get("tools")
        .and_then(|t| t.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|entry| {
                    let name = entry.get("name")?.as_str()?.to_string();
                    let description = entry
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let parameters = entry.get("parameters").cloned().unwrap_or(serde_json::json!({}));
                    Some(ToolMetadata::new(name, description, parameters))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn classify_transport_error(message: &str) -> ToolError {
    if is_transient_transport_error(message) {
        ToolError::McpTransportError(message.to_string())
    } else {
        ToolError::McpConnectionFailed(message.to_string())
    }
}

fn classify_server_error(message: &str) -> ToolError {
    if message.to_lowercase().contains("validation") {
        ToolError::Validation(message.to_string())
    } else {
        ToolError::McpServerError(message.to_string())
    }
}

/// A `Tool` that proxies execution to a remote tool server through a
/// `RemoteAdapter`. Constructed by the registry when a deferred remote
/// tool is first loaded.
pub struct RemoteProxyTool {
    adapter: Arc<RemoteAdapter>,
    name: String,
    namespace: String,
}

impl RemoteProxyTool {
    pub fn new(adapter: Arc<RemoteAdapter>, name: String, namespace: String) -> Self {
        Self { adapter, name, namespace }
    }
}

#[async_trait]
impl Tool for RemoteProxyTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        self.adapter.call_tool(&self.name, arguments, None).await
    }
}
