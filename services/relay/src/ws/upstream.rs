//! Opens the upstream link to the realtime service.

use crate::config::Config;
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::client::IntoClientRequest,
};
use tracing::info;

pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to `config.realtime_url` with the bearer token and beta header.
pub async fn connect(config: &Config) -> Result<UpstreamStream> {
    let mut request = config.realtime_url.as_str().into_client_request()?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", config.openai_api_key.expose_secret()).parse()?,
    );
    request
        .headers_mut()
        .insert("OpenAI-Beta", "realtime=v1".parse()?);

    let (ws_stream, _) = connect_async(request)
        .await
        .context("Failed to connect to OpenAI Realtime WebSocket")?;
    info!(url = %config.realtime_url, "Connected to OpenAI Realtime API");
    Ok(ws_stream)
}

/// Like [`connect`], bounded by `config.handshake_timeout` when one is set.
pub async fn connect_with_timeout(config: &Config) -> Result<UpstreamStream> {
    match config.handshake_timeout {
        Some(limit) => tokio::time::timeout(limit, connect(config))
            .await
            .with_context(|| format!("Upstream did not open within {:?}", limit))?,
        None => connect(config).await,
    }
}
