//! Block height probe.
//!
//! Sends one JSON-RPC `eth_blockNumber` request to an endpoint and turns
//! the outcome into a [`Status`]. The request runs under a timeout; when it
//! fires the request future is dropped and whatever the endpoint eventually
//! sends back is ignored.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use rpcwatch_core::Endpoint;
use rpcwatch_state::Status;

/// Longest error label recorded in a sample.
pub const MAX_LABEL_CHARS: usize = 100;

/// Longest slice of a non-2xx response body kept in the error.
const MAX_BODY_CHARS: usize = 200;

/// Anything that can check an endpoint and report its status.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint) -> Status;
}

/// Why a block height request failed.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to build http client: {0}")]
    Client(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("rpc response missing result")]
    MissingResult,

    #[error("invalid block number {0:?}")]
    InvalidHeight(String),
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// One long-lived HTTP client per RPC target.
///
/// Each `reqwest::Client` keeps its own connection pool, so reusing it
/// avoids a fresh TCP/TLS handshake on every sweep. The endpoint set is
/// static, so entries are never evicted.
#[derive(Default)]
pub struct ClientCache {
    clients: RwLock<HashMap<String, reqwest::Client>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The client for `target`, created on first use.
    pub async fn get(&self, target: &str) -> Result<reqwest::Client, ProbeError> {
        if let Some(client) = self.clients.read().await.get(target) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get(target) {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("rpcwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;
        clients.insert(target.to_string(), client.clone());
        debug!(%target, "rpc client created");
        Ok(client)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

/// Production probe: JSON-RPC over HTTP(S).
pub struct RpcProber {
    clients: ClientCache,
    timeout: Duration,
}

impl RpcProber {
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: ClientCache::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn clients(&self) -> &ClientCache {
        &self.clients
    }

    /// Fetch the current block height from `target` (no timeout applied).
    pub async fn block_number(&self, target: &str) -> Result<u64, ProbeError> {
        let client = self.clients.get(target).await?;
        let response = client
            .post(target)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": "eth_blockNumber",
                "params": [],
                "id": 1
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProbeError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_BODY_CHARS).collect(),
            });
        }

        let body: RpcResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(ProbeError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let hex = body.result.ok_or(ProbeError::MissingResult)?;
        parse_quantity(&hex)
    }
}

#[async_trait]
impl Probe for RpcProber {
    async fn probe(&self, endpoint: &Endpoint) -> Status {
        match tokio::time::timeout(self.timeout, self.block_number(&endpoint.target)).await {
            Ok(Ok(height)) => Status::Height(height),
            Ok(Err(e)) => {
                let label = error_label(&e);
                debug!(%endpoint, target = %endpoint.target, error = %label, "probe failed");
                Status::Error(label)
            }
            Err(_) => {
                debug!(%endpoint, target = %endpoint.target, "probe timed out");
                Status::Timeout
            }
        }
    }
}

/// Parse a JSON-RPC hex quantity such as `"0x1b4"`.
fn parse_quantity(raw: &str) -> Result<u64, ProbeError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| ProbeError::InvalidHeight(raw.to_string()))?;
    if digits.is_empty() {
        return Err(ProbeError::InvalidHeight(raw.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| ProbeError::InvalidHeight(raw.to_string()))
}

/// Turn an error (and its source chain) into a sample label: whitespace
/// runs collapsed to one space, trimmed, at most [`MAX_LABEL_CHARS`] chars.
pub fn error_label(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }

    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_LABEL_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{closed_port, serve_once, serve_silent};

    fn endpoint(target: &str) -> Endpoint {
        Endpoint {
            chain: "eth".to_string(),
            name: "public".to_string(),
            target: target.to_string(),
        }
    }

    #[test]
    fn quantity_parsing() {
        assert_eq!(parse_quantity("0x64").unwrap(), 100);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0X1B4").unwrap(), 436);
        assert!(matches!(parse_quantity("0x"), Err(ProbeError::InvalidHeight(_))));
        assert!(matches!(parse_quantity("100"), Err(ProbeError::InvalidHeight(_))));
        assert!(matches!(parse_quantity("0xzz"), Err(ProbeError::InvalidHeight(_))));
    }

    #[test]
    fn label_collapses_whitespace() {
        let err = ProbeError::Status {
            status: 502,
            body: "  <html>\n\t<body>bad   gateway</body>\n</html>  ".to_string(),
        };
        assert_eq!(error_label(&err), "HTTP 502: <html> <body>bad gateway</body> </html>");
    }

    #[test]
    fn label_is_truncated_on_char_boundaries() {
        let err = ProbeError::Rpc {
            code: -32000,
            message: "é".repeat(300),
        };
        let label = error_label(&err);
        assert_eq!(label.chars().count(), MAX_LABEL_CHARS);
        assert!(label.starts_with("rpc error -32000: é"));
    }

    #[tokio::test]
    async fn probe_reads_block_height() {
        let (url, server) = serve_once(200, r#"{"jsonrpc":"2.0","id":1,"result":"0x64"}"#).await;
        let prober = RpcProber::new(Duration::from_secs(5));

        let status = prober.probe(&endpoint(&url)).await;
        assert_eq!(status, Status::Height(100));

        let captured = server.await.unwrap();
        assert!(captured.head.starts_with("POST / HTTP/1.1"));
        let request: serde_json::Value = serde_json::from_str(&captured.body).unwrap();
        assert_eq!(request["method"], "eth_blockNumber");
        assert_eq!(request["jsonrpc"], "2.0");
    }

    #[tokio::test]
    async fn silent_endpoint_times_out() {
        let url = serve_silent().await;
        let prober = RpcProber::new(Duration::from_millis(200));
        assert_eq!(prober.probe(&endpoint(&url)).await, Status::Timeout);
    }

    #[tokio::test]
    async fn refused_connection_is_an_error_label() {
        let url = closed_port().await;
        let prober = RpcProber::new(Duration::from_secs(5));
        match prober.probe(&endpoint(&url)).await {
            Status::Error(label) => {
                assert!(!label.is_empty());
                assert!(label.chars().count() <= MAX_LABEL_CHARS);
                assert!(!label.contains("  "));
            }
            other => panic!("expected an error label, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_success_reply_is_an_error_label() {
        let (url, _server) = serve_once(502, r#"{"message":"upstream down"}"#).await;
        let prober = RpcProber::new(Duration::from_secs(5));
        assert_eq!(
            prober.probe(&endpoint(&url)).await,
            Status::Error(r#"HTTP 502: {"message":"upstream down"}"#.to_string())
        );
    }

    #[tokio::test]
    async fn rpc_error_object_is_an_error_label() {
        let (url, _server) = serve_once(
            200,
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"rate limited"}}"#,
        )
        .await;
        let prober = RpcProber::new(Duration::from_secs(5));
        assert_eq!(
            prober.probe(&endpoint(&url)).await,
            Status::Error("rpc error -32005: rate limited".to_string())
        );
    }

    #[tokio::test]
    async fn malformed_body_is_an_error_label() {
        let (url, _server) = serve_once(200, "not json").await;
        let prober = RpcProber::new(Duration::from_secs(5));
        assert!(matches!(prober.probe(&endpoint(&url)).await, Status::Error(_)));
    }

    #[tokio::test]
    async fn missing_result_is_an_error_label() {
        let (url, _server) = serve_once(200, r#"{"jsonrpc":"2.0","id":1}"#).await;
        let prober = RpcProber::new(Duration::from_secs(5));
        assert_eq!(
            prober.probe(&endpoint(&url)).await,
            Status::Error("rpc response missing result".to_string())
        );
    }

    #[tokio::test]
    async fn clients_are_reused_per_target() {
        let cache = ClientCache::new();
        assert!(cache.is_empty().await);
        cache.get("https://a.example").await.unwrap();
        cache.get("https://a.example").await.unwrap();
        assert_eq!(cache.len().await, 1);
        cache.get("https://b.example").await.unwrap();
        assert_eq!(cache.len().await, 2);
    }
}
