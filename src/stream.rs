//! Swap event stream: canonicalizes token pairs, keeps exactly one chain
//! subscription per unordered pair no matter how many listeners attach, and
//! normalizes raw pool events into decimal-adjusted trade records.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::amount::from_base_units;
use crate::chain::{ChainClient, RawSwap};
use crate::error::EngineError;

/// One subscription slot per unordered pair.
const EVENT_BUFFER: usize = 1024;

/// Canonical identity of an unordered token pair: `(min, max)` by byte
/// value, so `PairKey::new(a, b) == PairKey::new(b, a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey(Address, Address);

impl PairKey {
    pub fn new(a: Address, b: Address) -> Self {
        if a <= b {
            PairKey(a, b)
        } else {
            PairKey(b, a)
        }
    }
}

/// A normalized trade, amounts decimal-adjusted and still in the pool's
/// token0/token1 order. Transient - never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub timestamp: u64,
    pub sender: Address,
    pub recipient: Address,
    pub token0: Address,
    pub token1: Address,
    pub amount0_in: Decimal,
    pub amount0_out: Decimal,
    pub amount1_in: Decimal,
    pub amount1_out: Decimal,
}

impl TradeEvent {
    pub fn volume0(&self) -> Decimal {
        self.amount0_in + self.amount0_out
    }

    pub fn volume1(&self) -> Decimal {
        self.amount1_in + self.amount1_out
    }

    /// Re-expresses the trade relative to a requested base token: volumes
    /// ordered (requested, other) and price as `volume_a / volume_b`.
    ///
    /// Returns `None` when the requested token is not part of the pair or
    /// when the quote-side volume is zero (no price can be derived).
    pub fn oriented(&self, token_a: Address) -> Option<PairChange> {
        let (volume_a, volume_b) = if token_a == self.token0 {
            (self.volume0(), self.volume1())
        } else if token_a == self.token1 {
            (self.volume1(), self.volume0())
        } else {
            return None;
        };
        if volume_b.is_zero() {
            return None;
        }
        Some(PairChange {
            timestamp: self.timestamp,
            volume_a,
            volume_b,
            price: volume_a / volume_b,
        })
    }
}

/// A trade re-expressed for one caller-requested (base, quote) orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairChange {
    pub timestamp: u64,
    pub volume_a: Decimal,
    pub volume_b: Decimal,
    pub price: Decimal,
}

struct PairFeed {
    events: broadcast::Sender<TradeEvent>,
    pump: JoinHandle<()>,
}

/// Per-pair subscription registry. One underlying chain subscription per
/// distinct [`PairKey`]; every listener gets a broadcast receiver off the
/// shared feed.
pub struct SwapEventStream {
    chain: Arc<dyn ChainClient>,
    pairs: Arc<RwLock<HashMap<PairKey, PairFeed>>>,
}

impl SwapEventStream {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            pairs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribes to normalized trade events for an unordered pair.
    ///
    /// When no pool exists this fails with [`EngineError::PoolNotFound`],
    /// unless `wait_liquidity` is set, in which case the subscription
    /// attaches itself once the factory reports pool creation.
    ///
    /// The registry write lock is held across pool resolution so that two
    /// racing first subscriptions still create only one chain subscription.
    pub async fn subscribe(
        &self,
        token_a: Address,
        token_b: Address,
        wait_liquidity: bool,
    ) -> Result<broadcast::Receiver<TradeEvent>, EngineError> {
        let key = PairKey::new(token_a, token_b);

        let mut pairs = self.pairs.write().await;
        if let Some(feed) = pairs.get(&key) {
            return Ok(feed.events.subscribe());
        }

        let (events, receiver) = broadcast::channel(EVENT_BUFFER);
        let pump = match self.chain.pool_address(token_a, token_b).await? {
            Some(pool) => {
                let feed = PoolFeed::attach(self.chain.clone(), pool).await?;
                let sink = events.clone();
                tokio::spawn(async move { feed.run(sink).await })
            }
            None if wait_liquidity => {
                info!(%token_a, %token_b, "no pool yet, waiting for liquidity");
                let mut created = self.chain.subscribe_pair_created(token_a, token_b).await?;
                let chain = self.chain.clone();
                let sink = events.clone();
                tokio::spawn(async move {
                    let Some(pool) = created.recv().await else {
                        return;
                    };
                    info!(%pool, "liquidity arrived, attaching swap subscription");
                    match PoolFeed::attach(chain, pool).await {
                        Ok(feed) => feed.run(sink).await,
                        Err(e) => error!(%pool, "failed to attach swap subscription: {e}"),
                    }
                })
            }
            None => return Err(EngineError::PoolNotFound { token_a, token_b }),
        };

        pairs.insert(key, PairFeed { events, pump });
        Ok(receiver)
    }

    /// Like [`subscribe`](Self::subscribe), but delivers trades already
    /// oriented to the requested `(token_a, token_b)` ordering.
    pub async fn subscribe_changes(
        &self,
        token_a: Address,
        token_b: Address,
        wait_liquidity: bool,
    ) -> Result<mpsc::UnboundedReceiver<PairChange>, EngineError> {
        let mut events = self.subscribe(token_a, token_b, wait_liquidity).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Some(change) = event.oriented(token_a) {
                            if tx.send(change).is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "pair change listener lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }

    /// Tears down every pair subscription. Removal is all-or-nothing:
    /// individual listeners just drop their receivers.
    pub async fn shutdown(&self) {
        let mut pairs = self.pairs.write().await;
        for (_, feed) in pairs.drain() {
            feed.pump.abort();
        }
    }
}

/// The per-pool pump: chain subscription plus the token metadata needed to
/// normalize events.
struct PoolFeed {
    chain: Arc<dyn ChainClient>,
    token0: Address,
    token1: Address,
    decimals0: u8,
    decimals1: u8,
    raw: mpsc::UnboundedReceiver<RawSwap>,
}

impl PoolFeed {
    /// Reads the pool's token ordering and decimals once, then opens the
    /// chain subscription. Errors here surface to the subscribing caller.
    async fn attach(chain: Arc<dyn ChainClient>, pool: Address) -> Result<Self, EngineError> {
        let (token0, token1) = chain.pair_tokens(pool).await?;
        let decimals0 = chain.token_decimals(token0).await?;
        let decimals1 = chain.token_decimals(token1).await?;
        let raw = chain.subscribe_swaps(pool).await?;
        debug!(%pool, %token0, %token1, "swap subscription attached");
        Ok(Self {
            chain,
            token0,
            token1,
            decimals0,
            decimals1,
            raw,
        })
    }

    async fn run(mut self, sink: broadcast::Sender<TradeEvent>) {
        // One-entry block timestamp memo: events for the same block resolve
        // the timestamp once.
        let mut last_block: Option<(u64, u64)> = None;

        while let Some(swap) = self.raw.recv().await {
            let timestamp = match last_block {
                Some((number, timestamp)) if number == swap.block_number => timestamp,
                _ => match self.chain.block_timestamp(swap.block_number).await {
                    Ok(timestamp) => {
                        last_block = Some((swap.block_number, timestamp));
                        timestamp
                    }
                    Err(e) => {
                        warn!(block = swap.block_number, "cannot resolve block timestamp: {e}");
                        continue;
                    }
                },
            };

            match self.normalize(timestamp, &swap) {
                Ok(event) => {
                    // No receivers is fine; the subscription stays warm.
                    let _ = sink.send(event);
                }
                Err(e) => warn!(block = swap.block_number, "dropping undecodable swap: {e}"),
            }
        }
    }

    fn normalize(&self, timestamp: u64, swap: &RawSwap) -> Result<TradeEvent, EngineError> {
        Ok(TradeEvent {
            timestamp,
            sender: swap.sender,
            recipient: swap.recipient,
            token0: self.token0,
            token1: self.token1,
            amount0_in: from_base_units(swap.amount0_in, self.decimals0)?,
            amount0_out: from_base_units(swap.amount0_out, self.decimals0)?,
            amount1_in: from_base_units(swap.amount1_in, self.decimals1)?,
            amount1_out: from_base_units(swap.amount1_out, self.decimals1)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn pair_key_is_order_independent() {
        let (a, b) = (addr(0x11), addr(0x22));
        assert_eq!(PairKey::new(a, b), PairKey::new(b, a));
        assert_ne!(PairKey::new(a, b), PairKey::new(a, addr(0x33)));
    }

    fn trade(a0_in: Decimal, a1_out: Decimal) -> TradeEvent {
        TradeEvent {
            timestamp: 1_700_000_000,
            sender: addr(0xaa),
            recipient: addr(0xbb),
            token0: addr(0x11),
            token1: addr(0x22),
            amount0_in: a0_in,
            amount0_out: Decimal::ZERO,
            amount1_in: Decimal::ZERO,
            amount1_out: a1_out,
        }
    }

    #[test]
    fn orientation_follows_requested_base() {
        // 100 token0 in, 50 token1 out
        let event = trade(dec!(100), dec!(50));

        let forward = event.oriented(addr(0x11)).unwrap();
        assert_eq!(forward.volume_a, dec!(100));
        assert_eq!(forward.volume_b, dec!(50));
        assert_eq!(forward.price, dec!(2));

        let reverse = event.oriented(addr(0x22)).unwrap();
        assert_eq!(reverse.price, dec!(0.5));
    }

    #[test]
    fn orientation_rejects_foreign_token_and_zero_quote_volume() {
        let event = trade(dec!(100), dec!(50));
        assert!(event.oriented(addr(0x99)).is_none());

        let degenerate = trade(dec!(100), dec!(0));
        assert!(degenerate.oriented(addr(0x11)).is_none());
    }
}
