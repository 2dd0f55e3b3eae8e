//! Bitfinex Market Data Connector
//!
//! Logs a REST snapshot for the configured pairs, then streams trades and
//! candles until interrupted.

use std::net::SocketAddr;

use axum::{http::StatusCode, routing::get, Json, Router};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bfx_market_data::{Config, Connector, MarketEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Bitfinex Market Data Connector");

    let config = Config::load()?;
    info!(
        trade_pairs = ?config.trade_pairs,
        candle_pairs = ?config.candle_pairs,
        period_secs = config.candle_period_secs,
        "Configuration loaded"
    );

    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_port).await {
            warn!(error = %e, "Health server error");
        }
    });

    let connector = Connector::from_config(&config);
    log_rest_snapshot(&connector, &config).await;

    let mut events = connector.events();
    for pair in &config.trade_pairs {
        connector.subscribe_trades(pair, config.trades_limit)?;
    }
    for pair in &config.candle_pairs {
        connector.subscribe_candles(pair, config.candle_period_secs, None, None, None)?;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(MarketEvent::BuyTrade(trade)) | Ok(MarketEvent::SellTrade(trade)) => info!(
                    pair = %trade.pair,
                    side = trade.side().as_str(),
                    price = %trade.price,
                    amount = %trade.amount,
                    "Trade"
                ),
                Ok(MarketEvent::Candle(candle)) => info!(
                    pair = %candle.pair,
                    open_time = %candle.open_time,
                    close = %candle.close,
                    volume = %candle.volume,
                    "Candle"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event receiver lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    for pair in &config.trade_pairs {
        connector.unsubscribe_trades(pair)?;
    }
    for pair in &config.candle_pairs {
        if let Some(candle) = connector.latest_candle(pair) {
            info!(pair = %pair, open_time = %candle.open_time, close = %candle.close, "Last candle");
        }
        connector.unsubscribe_candles(pair)?;
    }

    Ok(())
}

/// Log REST data once at startup; failures are not fatal
async fn log_rest_snapshot(connector: &Connector<bfx_market_data::WebSocketTransport>, config: &Config) {
    for pair in &config.trade_pairs {
        match connector.fetch_ticker(pair).await {
            Ok(ticker) => info!(pair = %pair, last_price = ?ticker.last_price, volume = ?ticker.volume, "Ticker"),
            Err(e) => error!(pair = %pair, error = %e, "Ticker request failed"),
        }
        match connector.fetch_recent_trades(pair, config.trades_limit).await {
            Ok(trades) => info!(pair = %pair, count = trades.len(), "Recent trades fetched"),
            Err(e) => error!(pair = %pair, error = %e, "Trades request failed"),
        }
    }
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "bfx-market-data",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics() -> Result<String, StatusCode> {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
