use crate::errors::Result;
use async_trait::async_trait;
use serde_json::Value;

/// The wire protocol to a remote tool server is explicitly out of scope
/// (§1 Non-goals); the core consumes an abstract transport exposing
/// `send`/`close`. Concrete implementations cover the three shapes named in
/// §6: line-delimited JSON-RPC over a subprocess's stdio, an
/// HTTP-streaming transport with bearer-token auth, and a server-sent-events
/// transport with bearer-token auth.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying connection (spawn the subprocess, open the HTTP
    /// stream, etc). Idempotent: calling it again on an already-open
    /// transport is a no-op.
    async fn connect(&self) -> Result<()>;

    /// Send one request and await its matched response.
    async fn send(&self, request: Value) -> Result<Value>;

    /// Close the connection. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Bearer-token credentials for OAuth-bearing transports.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: String,
}
