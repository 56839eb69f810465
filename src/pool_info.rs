//! All-time-high watermark over a pair's derived price series.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::stream::PairChange;

/// Pool KPI snapshot. Only `all_time_high` is tracked today; the remaining
/// fields reset to zero on every new high and are reserved for richer KPI
/// computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub all_time_high: Decimal,
    pub price: Decimal,
    pub volume: Decimal,
    pub liquidity: Decimal,
    pub capitalization: Decimal,
}

impl PoolInfo {
    fn at_high(price: Decimal) -> Self {
        Self {
            all_time_high: price,
            price: Decimal::ZERO,
            volume: Decimal::ZERO,
            liquidity: Decimal::ZERO,
            capitalization: Decimal::ZERO,
        }
    }
}

/// Watermark tracker: notifies only when a price strictly exceeds the
/// current all-time-high. Equal or lower prices leave the state untouched.
pub struct PoolInfoTracker {
    current: Option<PoolInfo>,
}

impl PoolInfoTracker {
    pub fn new(initial: Option<PoolInfo>) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> Option<&PoolInfo> {
        self.current.as_ref()
    }

    pub fn apply(&mut self, price: Decimal) -> Option<PoolInfo> {
        let is_new_high = self
            .current
            .as_ref()
            .map_or(true, |info| price > info.all_time_high);
        if !is_new_high {
            return None;
        }
        let info = PoolInfo::at_high(price);
        self.current = Some(info.clone());
        Some(info)
    }
}

/// Adapts a pair change stream into a new-high notification stream.
pub fn pool_info_stream(
    mut changes: mpsc::UnboundedReceiver<PairChange>,
    initial: Option<PoolInfo>,
) -> mpsc::UnboundedReceiver<PoolInfo> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut tracker = PoolInfoTracker::new(initial);
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            if let Some(info) = tracker.apply(change.price) {
                if tx.send(info).is_err() {
                    return;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn first_price_always_notifies() {
        let mut tracker = PoolInfoTracker::new(None);
        let info = tracker.apply(dec!(1.5)).unwrap();
        assert_eq!(info.all_time_high, dec!(1.5));
        assert_eq!(info.volume, Decimal::ZERO);
    }

    #[test]
    fn only_strictly_higher_prices_notify() {
        let mut tracker = PoolInfoTracker::new(None);
        tracker.apply(dec!(2));

        assert!(tracker.apply(dec!(2)).is_none());
        assert!(tracker.apply(dec!(1.99)).is_none());
        assert_eq!(tracker.current().unwrap().all_time_high, dec!(2));

        let info = tracker.apply(dec!(2.01)).unwrap();
        assert_eq!(info.all_time_high, dec!(2.01));
    }

    #[test]
    fn seeded_watermark_is_respected() {
        let mut tracker = PoolInfoTracker::new(Some(PoolInfo::at_high(dec!(10))));
        assert!(tracker.apply(dec!(9)).is_none());
        assert!(tracker.apply(dec!(11)).is_some());
    }
}
