//! Tail OKX WebSocket channels to stdout
//!
//! Run with: `cargo run --bin ws-tail --features demo -- trades:BTC-USDT tickers:ETH-USDT`
//!
//! Flags: `--demo` uses the demo-trading endpoints, `--business` the business
//! endpoint (candles and other business channels).

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use okx_sdk::websocket::{ControlKind, SessionConfig, SubscriptionKey, WsClient};
use okx_sdk::{Network, Result, WsEndpoint};

const ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ws_tail=info,okx_sdk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut network = Network::Live;
    let mut endpoint = WsEndpoint::Public;
    let mut keys = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--demo" => network = Network::Demo,
            "--business" => endpoint = WsEndpoint::Business,
            other => keys.push(other.parse::<SubscriptionKey>()?),
        }
    }
    if keys.is_empty() {
        keys.push(SubscriptionKey::trades("BTC-USDT"));
    }

    let root = CancellationToken::new();
    let mut client = WsClient::new(SessionConfig::for_endpoint(network, endpoint));
    client.observe(ControlKind::Notice, |frame| {
        tracing::warn!("Notice: {}", String::from_utf8_lossy(&frame));
    })?;
    client.observe(ControlKind::Status, |frame| {
        tracing::info!("Status: {}", String::from_utf8_lossy(&frame));
    })?;

    client.start(
        &root,
        |frame| println!("{}", String::from_utf8_lossy(&frame)),
        |err| {
            if err.is_fatal() {
                tracing::error!("{err}");
            } else {
                tracing::warn!("{err}");
            }
        },
    )?;
    tracing::info!(url = %client.config().url, "Streaming {} channel(s)", keys.len());

    for key in keys {
        match client.subscribe_and_wait(key.clone(), ACK_TIMEOUT).await {
            Ok(()) => tracing::info!(%key, "Subscribed"),
            Err(e) => tracing::warn!(%key, "Subscribe failed: {e}"),
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, closing session");
            client.close().await?;
        }
        _ = client.done() => {}
    }

    if client.dropped_frames() > 0 {
        tracing::warn!(dropped = client.dropped_frames(), "Frames dropped by slow output");
    }
    Ok(())
}
