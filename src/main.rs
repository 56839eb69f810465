use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::Context;
use tracing::{error, info};

use dexpulse::{CandleEvent, DexEngine, EngineConfig, LiveChain};

/// Monitors one pair from the command line and logs its trades, candles,
/// and all-time-high updates until interrupted.
///
/// Usage: dexpulse <token_a> <token_b> [candle_seconds]
///
/// Environment: DEXPULSE_NETWORK (default "ethereum"), DEXPULSE_RPC_URL,
/// DEXPULSE_CONFIG (JSON config file, overrides the built-in network
/// table), DEXPULSE_PRIVATE_KEY (optional; omit for read-only).
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let token_a: Address = args
        .next()
        .context("missing <token_a> argument")?
        .parse()
        .context("invalid <token_a> address")?;
    let token_b: Address = args
        .next()
        .context("missing <token_b> argument")?
        .parse()
        .context("invalid <token_b> address")?;
    let candle_seconds: u64 = args
        .next()
        .map(|s| s.parse())
        .transpose()
        .context("invalid [candle_seconds]")?
        .unwrap_or(60);

    let config = match std::env::var("DEXPULSE_CONFIG") {
        Ok(path) => EngineConfig::from_json_file(&path)?,
        Err(_) => {
            let network =
                std::env::var("DEXPULSE_NETWORK").unwrap_or_else(|_| "ethereum".to_string());
            let mut config = EngineConfig::for_network(&network)?;
            if let Ok(url) = std::env::var("DEXPULSE_RPC_URL") {
                config.rpc_http_url = url;
            }
            config
        }
    };

    let key = std::env::var("DEXPULSE_PRIVATE_KEY").ok();
    let chain = Arc::new(LiveChain::new(config.clone(), key.as_deref())?);
    let engine = DexEngine::new(chain, config);

    info!(%token_a, %token_b, candle_seconds, "monitoring pair");

    let mut trades = engine.subscribe_trades(token_a, token_b, true).await?;
    let mut candles = engine.candles(token_a, token_b, candle_seconds, None).await?;
    let mut highs = engine.pool_info(token_a, token_b, None).await?;

    loop {
        tokio::select! {
            trade = trades.recv() => match trade {
                Ok(trade) => info!(
                    timestamp = trade.timestamp,
                    sender = %trade.sender,
                    volume0 = %trade.volume0(),
                    volume1 = %trade.volume1(),
                    "trade"
                ),
                Err(e) => {
                    error!(error = %e, "trade stream ended");
                    break;
                }
            },
            candle = candles.recv() => match candle {
                Some(CandleEvent::Opened(c)) => info!(bucket = c.bucket_start, open = %c.open, "candle opened"),
                Some(CandleEvent::Updated(c)) => info!(
                    bucket = c.bucket_start,
                    high = %c.high,
                    low = %c.low,
                    close = %c.close,
                    volume = %c.volume,
                    "candle updated"
                ),
                Some(CandleEvent::Closed(c)) => info!(
                    bucket = c.bucket_start,
                    open = %c.open,
                    close = %c.close,
                    average = %c.average,
                    ticks = c.tick_count,
                    "candle closed"
                ),
                None => break,
            },
            info = highs.recv() => match info {
                Some(info) => info!(price = %info.all_time_high, "new all-time high"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}
