//! Price Stream Binary
//!
//! Subscribes to live prices for the stock codes given on the command line
//! and logs every update until interrupted. Subscriptions are restored
//! whenever the connection drops and comes back.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-stream -- 005930 000660
//! ```
//!
//! # Environment Variables
//!
//! - `PRICE_STREAM_BASE_URL`: Backend base URL (default: <http://localhost:8080>)
//! - `PRICE_STREAM_WS_PATH`: STOMP endpoint path (default: /ws/websocket)
//! - `PRICE_STREAM_ACCEPT_VERSION`: STOMP versions offered (default: 1.1,1.2)
//! - `PRICE_STREAM_HEARTBEAT_OUTGOING_MS`: Client heart-beat interval (default: 10000)
//! - `PRICE_STREAM_HEARTBEAT_INCOMING_MS`: Expected server heart-beat interval (default: 10000)
//! - `PRICE_STREAM_RECONNECT_ATTEMPTS`: Retries before giving up (default: 10)
//! - `PRICE_STREAM_RECONNECT_DELAY_MS`: Delay between retries (default: 3000)
//! - `PRICE_STREAM_METRICS_PORT`: Prometheus metrics port (default: 0, disabled)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_stream::domain::market_session::{
    KOREAN_MARKET_SCHEDULE_LABEL, is_korean_market_open_now,
};
use price_stream::infrastructure::telemetry;
use price_stream::{
    StockPriceUpdate, StreamConfig, SubscriptionManager, TransportConfig, Watchlist,
    WebSocketTransport, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Time given to the transport to flush DISCONNECT before exit.
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Already installed is fine
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting price stream");

    let config = StreamConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    init_metrics(config.metrics_port).context("failed to start Prometheus exporter")?;

    let stock_codes = stock_codes_from_args();
    if stock_codes.is_empty() {
        anyhow::bail!("usage: price-stream <stock-code>...");
    }

    if !is_korean_market_open_now() {
        tracing::warn!(
            schedule = KOREAN_MARKET_SCHEDULE_LABEL,
            "Market is closed, no price updates expected"
        );
    }

    let (transport, events) =
        WebSocketTransport::new(TransportConfig::from_stream_config(&config))?;
    let manager = SubscriptionManager::create(Arc::new(transport), config.stomp.session_settings());
    let shutdown_token = CancellationToken::new();

    let pump = {
        let manager = manager.clone();
        let cancel = shutdown_token.clone();
        tokio::spawn(async move { manager.run(events, cancel).await })
    };

    let watchlist = Watchlist::start(&manager, stock_codes, log_update);

    tracing::info!(stocks = ?watchlist.stock_codes(), "Price stream ready");

    await_shutdown(shutdown_token).await;

    watchlist.stop();
    manager.dispose();

    if let Err(e) = pump.await {
        tracing::warn!(error = %e, "Event loop task failed");
    }
    tokio::time::sleep(DISCONNECT_GRACE).await;

    tracing::info!("Price stream stopped");
    Ok(())
}

/// Log one price update.
fn log_update(update: &StockPriceUpdate) {
    let direction = if update.is_rising() {
        "up"
    } else if update.is_falling() {
        "down"
    } else {
        "flat"
    };

    tracing::info!(
        stock_code = %update.stock_code,
        stock_name = %update.stock_name,
        price = %update.current_price,
        change = %update.change_price,
        change_rate = %update.change_rate,
        volume = update.volume,
        direction,
        "Price update"
    );
}

/// Stock codes passed as command line arguments, deduplicated in order.
fn stock_codes_from_args() -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for arg in std::env::args().skip(1) {
        let code = arg.trim();
        if !code.is_empty() && !codes.iter().any(|c| c == code) {
            codes.push(code.to_string());
        }
    }
    codes
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        url = %config.websocket_url,
        accept_version = %config.stomp.accept_version,
        heart_beat = %config.stomp.heartbeat_header(),
        reconnect_attempts = config.reconnect.max_attempts,
        reconnect_delay_ms = u64::try_from(config.reconnect.delay.as_millis()).unwrap_or(u64::MAX),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }

    shutdown_token.cancel();
}
