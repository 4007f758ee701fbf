//! Raw-`TcpListener` HTTP/1.1 server (§2a "HTTP"): a single `POST /` path
//! carrying a JSON-RPC-shaped body, the wire contract being simple enough
//! that a routed REST crate would be overkill. Both listeners (plaintext
//! 3321, TLS 2121) share this framing; the TLS one wraps the accepted
//! socket in a `tokio_rustls::server::TlsStream` first.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::facade::WalletFacade;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    method: String,
    #[serde(default)]
    origin: String,
    #[serde(default = "default_args")]
    args: Value,
}

fn default_args() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Serialize)]
struct RpcSuccess {
    result: Value,
}

#[derive(Debug, Serialize)]
struct RpcFailure {
    error: String,
    code: String,
}

/// Reads a full HTTP/1.1 request off `stream`: headers first, then exactly
/// `Content-Length` bytes of body. Bounded at 16MiB so a malformed or
/// hostile client can't force unbounded buffering.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

async fn read_http_body<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(Vec::new());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_BODY_BYTES {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "request headers too large"));
        }
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]);
    let content_length: usize = header_text
        .lines()
        .find_map(|line| line.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if content_length > MAX_BODY_BYTES {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "request body too large"));
    }

    let body_start = header_end + 4;
    let mut body = buf[body_start.min(buf.len())..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length.max(body.len().min(content_length)));
    Ok(body)
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn write_http_response<S: AsyncWrite + Unpin>(stream: &mut S, status: &str, body: &[u8]) -> std::io::Result<()> {
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

async fn handle_request_body(facade: &WalletFacade, body: &[u8]) -> (String, Vec<u8>) {
    let request: RpcRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            let payload = serde_json::to_vec(&RpcFailure {
                error: format!("malformed request body: {e}"),
                code: "ERR_VALIDATION".to_string(),
            })
            .unwrap_or_default();
            return ("400 Bad Request".to_string(), payload);
        }
    };

    match facade.call(&request.method, &request.origin, request.args).await {
        Ok(result) => {
            let payload = serde_json::to_vec(&RpcSuccess { result }).unwrap_or_default();
            ("200 OK".to_string(), payload)
        }
        Err(e) => {
            let payload = serde_json::to_vec(&RpcFailure {
                error: e.to_string(),
                code: e.code().to_string(),
            })
            .unwrap_or_default();
            ("200 OK".to_string(), payload)
        }
    }
}

async fn serve_connection<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S, facade: Arc<WalletFacade>) {
    let body = match read_http_body(&mut stream).await {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!(error = %e, "rpc connection read failed");
            return;
        }
    };
    if body.is_empty() {
        return;
    }

    let (status, response_body) = handle_request_body(&facade, &body).await;
    if let Err(e) = write_http_response(&mut stream, &status, &response_body).await {
        tracing::debug!(error = %e, "rpc connection write failed");
    }
}

/// Runs the plaintext listener until it is dropped or the socket errors.
/// Pair with `tokio::select!` against a `CancellationToken` in the caller
/// for graceful shutdown, matching this daemon's other background tasks.
pub async fn run_plaintext(listener: TcpListener, facade: Arc<WalletFacade>) {
    loop {
        match listener.accept().await {
            Ok((socket, _addr)) => {
                let facade = facade.clone();
                tokio::spawn(async move {
                    serve_connection(socket, facade).await;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "plaintext rpc accept failed");
            }
        }
    }
}

/// Runs the TLS listener, wrapping each accepted socket with `acceptor`
/// before handing it to the same request handler as the plaintext port.
pub async fn run_tls(listener: TcpListener, acceptor: TlsAcceptor, facade: Arc<WalletFacade>) {
    loop {
        match listener.accept().await {
            Ok((socket, _addr)) => {
                let facade = facade.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor.accept(socket).await {
                        Ok(tls_stream) => serve_connection(tls_stream, facade).await,
                        Err(e) => tracing::debug!(error = %e, "tls handshake failed"),
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "tls rpc accept failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_engine::pending_cache::PendingSignCache;
    use crate::broadcaster::Broadcaster;
    use crate::config::{CommissionConfig, DedupConfig, FeeConfig, PermissionGateConfig};
    use crate::crypto::Secp256k1Crypto;
    use crate::network_type::NetworkType;
    use crate::services::shared_mock;
    use crate::storage::Store;
    use std::time::Duration;

    fn sample_facade() -> WalletFacade {
        let store = Store::open_temporary();
        let services = shared_mock();
        let (broadcaster, _handle) = Broadcaster::spawn(store.clone(), services.clone(), &DedupConfig::default(), 8);
        WalletFacade::new(
            store,
            services,
            broadcaster,
            Arc::new(Secp256k1Crypto::new()),
            PendingSignCache::new(Duration::from_secs(300)),
            PermissionGateConfig {
                bridge_url: "http://127.0.0.1:1".to_string(),
                timeout_secs: 1,
                auto_approve: true,
            },
            CommissionConfig::default(),
            FeeConfig::default(),
            "01".repeat(32),
            "02".repeat(33)[0..66].to_string(),
            NetworkType::Test,
            "test-app".to_string(),
        )
    }

    #[tokio::test]
    async fn unknown_method_returns_error_payload() {
        let facade = sample_facade();
        let body = serde_json::to_vec(&serde_json::json!({
            "method": "noSuchMethod",
            "origin": "test",
            "args": {}
        }))
        .unwrap();
        let (status, payload) = handle_request_body(&facade, &body).await;
        assert_eq!(status, "200 OK");
        let parsed: Value = serde_json::from_slice(&payload).unwrap();
        assert!(parsed.get("error").is_some());
    }

    #[tokio::test]
    async fn malformed_body_yields_400() {
        let facade = sample_facade();
        let (status, _payload) = handle_request_body(&facade, b"not json").await;
        assert_eq!(status, "400 Bad Request");
    }

    #[test]
    fn header_end_finds_crlf_crlf() {
        let buf = b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc";
        assert_eq!(find_header_end(buf), Some(buf.len() - 7));
    }
}
