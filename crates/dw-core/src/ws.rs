//! TLS WebSocket connection helper.
//!
//! Establishing the stream lives here; the read/write loop, reconnect
//! scheduling, and keep-alive are owned by the ingestion engine, which
//! needs them under its connection state machine.

use std::collections::HashMap;

use tokio_tungstenite::tungstenite::http::Request;

/// The connected stream type the engine's loop splits and drives.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Establish a TLS WebSocket connection to `ws_url`.
pub async fn connect(
    ws_url: &str,
    extra_headers: &HashMap<String, String>,
) -> anyhow::Result<WsStream> {
    let mut request = Request::builder()
        .uri(ws_url)
        .header("Host", extract_host(ws_url));

    for (key, value) in extra_headers {
        request = request.header(key.as_str(), value.as_str());
    }

    let request = request.body(())?;

    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

/// Extract the host from a URL string.
fn extract_host(ws_url: &str) -> String {
    url::Url::parse(ws_url)
        .map(|u| u.host_str().unwrap_or("").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction() {
        assert_eq!(extract_host("wss://stream.example.com:443/ws"), "stream.example.com");
        assert_eq!(extract_host("not a url"), "");
    }
}
