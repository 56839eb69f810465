//! Synthetic price routing: a best-effort price/volume series for pairs
//! with no direct pool, composed from two legs through the configured base
//! asset.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::amount::from_base_units;
use crate::chain::ChainClient;
use crate::error::EngineError;
use crate::stream::{PairChange, SwapEventStream};

pub struct SyntheticRouter {
    chain: Arc<dyn ChainClient>,
    stream: Arc<SwapEventStream>,
    base_asset: Address,
}

impl SyntheticRouter {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        stream: Arc<SwapEventStream>,
        base_asset: Address,
    ) -> Self {
        Self {
            chain,
            stream,
            base_asset,
        }
    }

    /// Observes a pair's price/volume series oriented `(token_a, token_b)`.
    ///
    /// Prefers the direct pool. Without one, trades on the tokenA↔base leg
    /// are re-expressed in tokenB terms by multiplying volumes and price by
    /// a cached base→tokenB rate that is seeded from a live quote and
    /// refreshed on base-leg trades only.
    ///
    /// When neither a direct pool nor a base-asset route exists the returned
    /// stream simply never yields - absence detection is the caller's job.
    pub async fn observe(
        &self,
        token_a: Address,
        token_b: Address,
    ) -> Result<mpsc::UnboundedReceiver<PairChange>, EngineError> {
        match self.stream.subscribe_changes(token_a, token_b, false).await {
            Ok(changes) => Ok(changes),
            Err(EngineError::PoolNotFound { .. }) => self.observe_via_base(token_a, token_b).await,
            Err(e) => Err(e),
        }
    }

    async fn observe_via_base(
        &self,
        token_a: Address,
        token_b: Address,
    ) -> Result<mpsc::UnboundedReceiver<PairChange>, EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();

        if token_a == self.base_asset || token_b == self.base_asset {
            // The direct pool already failed and no further hop exists.
            warn!(%token_a, %token_b, "no pool and no base-asset route, series stays empty");
            return Ok(rx);
        }

        // Point-in-time seed: how much tokenB one unit of the base asset
        // buys right now.
        let seed = match self.quote_base_rate(token_b).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(%token_a, %token_b, "base-asset leg unquotable, series stays empty: {e}");
                return Ok(rx);
            }
        };
        info!(%token_a, %token_b, %seed, "routing synthetically through base asset");

        let rate = Arc::new(RwLock::new(seed));

        // Refresh leg: base↔tokenB trades keep the cached rate fresh. The
        // (token_b, base) orientation matches the seed quote's units.
        match self
            .stream
            .subscribe_changes(token_b, self.base_asset, false)
            .await
        {
            Ok(mut refresh) => {
                let rate = rate.clone();
                tokio::spawn(async move {
                    while let Some(change) = refresh.recv().await {
                        *rate.write().await = change.price;
                    }
                });
            }
            // Quotable but not yet streamable: keep using the seed.
            Err(EngineError::PoolNotFound { .. }) => {
                debug!(%token_b, "base leg has no pool, rate stays at seed quote")
            }
            Err(e) => return Err(e),
        }

        // Trade leg: every tokenA↔base trade becomes a synthetic
        // tokenA/tokenB observation.
        let mut trades = match self
            .stream
            .subscribe_changes(token_a, self.base_asset, false)
            .await
        {
            Ok(trades) => trades,
            Err(EngineError::PoolNotFound { .. }) => {
                warn!(%token_a, "no tokenA↔base pool, series stays empty");
                return Ok(rx);
            }
            Err(e) => return Err(e),
        };

        tokio::spawn(async move {
            while let Some(change) = trades.recv().await {
                let rate = *rate.read().await;
                let synthetic = PairChange {
                    timestamp: change.timestamp,
                    volume_a: change.volume_a * rate,
                    volume_b: change.volume_b * rate,
                    price: change.price * rate,
                };
                if tx.send(synthetic).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    /// Live quote of one base-asset unit in tokenB terms.
    async fn quote_base_rate(&self, token_b: Address) -> Result<Decimal, EngineError> {
        let base_decimals = self.chain.token_decimals(self.base_asset).await?;
        let out_decimals = self.chain.token_decimals(token_b).await?;
        let one_base = U256::from(10).pow(U256::from(base_decimals));
        let amounts = self
            .chain
            .amounts_out(one_base, &[self.base_asset, token_b])
            .await?;
        let out = amounts
            .last()
            .copied()
            .ok_or_else(|| EngineError::chain("empty quote response"))?;
        from_base_units(out, out_decimals)
    }
}
