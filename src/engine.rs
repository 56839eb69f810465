//! The engine facade: wires the event stream, synthetic router, candle and
//! pool-info pipelines, and the two execution services over one chain client.

use std::sync::Arc;

use alloy::primitives::Address;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use crate::batch::BatchSwapper;
use crate::candles::{candle_stream, Candle, CandleEvent};
use crate::chain::{ChainClient, SwapReceipt};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::{SwapExecutor, SwapOptions};
use crate::pool_info::{pool_info_stream, PoolInfo};
use crate::stream::{PairChange, SwapEventStream, TradeEvent};
use crate::synthetic::SyntheticRouter;

pub struct DexEngine {
    chain: Arc<dyn ChainClient>,
    config: EngineConfig,
    stream: Arc<SwapEventStream>,
    synthetic: SyntheticRouter,
    executor: SwapExecutor,
    batch: BatchSwapper,
}

impl DexEngine {
    pub fn new(chain: Arc<dyn ChainClient>, config: EngineConfig) -> Self {
        let stream = Arc::new(SwapEventStream::new(chain.clone()));
        let synthetic = SyntheticRouter::new(
            chain.clone(),
            stream.clone(),
            config.addresses.base_asset,
        );
        let executor = SwapExecutor::new(chain.clone(), config.clone());
        let batch = BatchSwapper::new(chain.clone(), config.clone());
        info!(network = %config.network, "engine initialized");
        Self {
            chain,
            config,
            stream,
            synthetic,
            executor,
            batch,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    /// Normalized trade events for an unordered pair. With `wait_liquidity`
    /// the subscription survives the pair not existing yet and comes alive
    /// once its pool is created.
    pub async fn subscribe_trades(
        &self,
        token_a: Address,
        token_b: Address,
        wait_liquidity: bool,
    ) -> Result<broadcast::Receiver<TradeEvent>, EngineError> {
        self.stream.subscribe(token_a, token_b, wait_liquidity).await
    }

    /// Oriented price/volume changes for `token_a` quoted in `token_b`,
    /// falling back to a synthetic route through the base asset when the
    /// pair has no direct pool.
    pub async fn observe_prices(
        &self,
        token_a: Address,
        token_b: Address,
    ) -> Result<mpsc::UnboundedReceiver<PairChange>, EngineError> {
        self.synthetic.observe(token_a, token_b).await
    }

    /// Tick-aggregated OHLCV candles of `duration` seconds, optionally
    /// resuming a previously open candle.
    pub async fn candles(
        &self,
        token_a: Address,
        token_b: Address,
        duration: u64,
        initial: Option<Candle>,
    ) -> Result<mpsc::UnboundedReceiver<CandleEvent>, EngineError> {
        let changes = self.observe_prices(token_a, token_b).await?;
        Ok(candle_stream(changes, duration, initial))
    }

    /// All-time-high watermark updates for the pair's price.
    pub async fn pool_info(
        &self,
        token_a: Address,
        token_b: Address,
        initial: Option<PoolInfo>,
    ) -> Result<mpsc::UnboundedReceiver<PoolInfo>, EngineError> {
        let changes = self.observe_prices(token_a, token_b).await?;
        Ok(pool_info_stream(changes, initial))
    }

    /// Read-only router quote, decimal-adjusted on both ends.
    pub async fn quote_amount_out(
        &self,
        input_token: Address,
        output_token: Address,
        amount_in: Decimal,
    ) -> Result<Decimal, EngineError> {
        self.executor
            .quote_amount_out(input_token, output_token, amount_in)
            .await
    }

    pub async fn swap_exact_input(
        &self,
        input_token: Address,
        output_token: Address,
        amount_in: Decimal,
        options: SwapOptions,
    ) -> Result<SwapReceipt, EngineError> {
        self.executor
            .swap_exact_input(input_token, output_token, amount_in, options)
            .await
    }

    pub fn batch(&self) -> &BatchSwapper {
        &self.batch
    }

    /// Tears down every live pair subscription.
    pub async fn shutdown(&self) {
        self.stream.shutdown().await;
        info!("engine shut down");
    }
}
