//! Time-bucketed OHLCV aggregation over a pair's price/volume stream.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::stream::PairChange;

/// One OHLCV bucket. `average` is the tick-weighted running mean of observed
/// prices, not volume-weighted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub bucket_start: u64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub tick_count: u32,
    pub average: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CandleEvent {
    Opened(Candle),
    Updated(Candle),
    Closed(Candle),
}

/// Candle state machine for one (pair, bucket duration).
///
/// `NoCandle → Open → Update* → Closed`, where closing a bucket and opening
/// the next happen on the same trade. Trades whose bucket precedes the open
/// candle's bucket are dropped - a closed candle is never reopened.
pub struct CandleAggregator {
    duration: u64,
    current: Option<Candle>,
}

impl CandleAggregator {
    /// `duration` is the bucket length in seconds and must be non-zero.
    pub fn new(duration: u64) -> Self {
        assert!(duration > 0, "candle duration must be non-zero");
        Self {
            duration,
            current: None,
        }
    }

    /// Resumes aggregation from a previously open candle.
    pub fn resume(duration: u64, candle: Candle) -> Self {
        let mut aggregator = Self::new(duration);
        aggregator.current = Some(candle);
        aggregator
    }

    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// Folds one trade in and returns the notifications it produced, in
    /// order (a bucket rollover yields `Closed` then `Opened`).
    pub fn apply(&mut self, change: &PairChange) -> Vec<CandleEvent> {
        let bucket_start = change.timestamp - change.timestamp % self.duration;
        let price = change.price;

        match &mut self.current {
            Some(candle) if candle.bucket_start == bucket_start => {
                candle.high = candle.high.max(price);
                candle.low = candle.low.min(price);
                candle.close = price;
                candle.volume += change.volume_a;
                let ticks = Decimal::from(candle.tick_count);
                candle.average = (candle.average * ticks + price) / (ticks + Decimal::ONE);
                candle.tick_count += 1;
                vec![CandleEvent::Updated(candle.clone())]
            }
            Some(candle) if bucket_start < candle.bucket_start => {
                warn!(
                    trade_bucket = bucket_start,
                    open_bucket = candle.bucket_start,
                    "dropping out-of-order trade for an already-closed bucket"
                );
                Vec::new()
            }
            _ => {
                let mut events = Vec::with_capacity(2);
                if let Some(previous) = self.current.take() {
                    events.push(CandleEvent::Closed(previous));
                }
                let candle = Candle {
                    bucket_start,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: change.volume_a,
                    tick_count: 1,
                    average: price,
                };
                self.current = Some(candle.clone());
                events.push(CandleEvent::Opened(candle));
                events
            }
        }
    }
}

/// Adapts a pair change stream into a candle event stream.
pub fn candle_stream(
    mut changes: mpsc::UnboundedReceiver<PairChange>,
    duration: u64,
    initial: Option<Candle>,
) -> mpsc::UnboundedReceiver<CandleEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut aggregator = match initial {
        Some(candle) => CandleAggregator::resume(duration, candle),
        None => CandleAggregator::new(duration),
    };
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            for event in aggregator.apply(&change) {
                if tx.send(event).is_err() {
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

    fn change(timestamp: u64, price: Decimal, volume: Decimal) -> PairChange {
        PairChange {
            timestamp,
            volume_a: volume,
            volume_b: volume / price,
            price,
        }
    }

    fn assert_invariant(candle: &Candle) {
        assert!(candle.low <= candle.open && candle.open <= candle.high);
        assert!(candle.low <= candle.close && candle.close <= candle.high);
    }

    #[test]
    fn first_trade_opens_a_candle() {
        let mut aggregator = CandleAggregator::new(60);
        let events = aggregator.apply(&change(125, dec!(2), dec!(100)));

        assert_eq!(events.len(), 1);
        let CandleEvent::Opened(candle) = &events[0] else {
            panic!("expected Opened, got {events:?}");
        };
        assert_eq!(candle.bucket_start, 120);
        assert_eq!(candle.open, dec!(2));
        assert_eq!(candle.high, dec!(2));
        assert_eq!(candle.low, dec!(2));
        assert_eq!(candle.close, dec!(2));
        assert_eq!(candle.volume, dec!(100));
        assert_eq!(candle.tick_count, 1);
        assert_eq!(candle.average, dec!(2));
    }

    #[test]
    fn updates_accumulate_within_a_bucket() {
        let mut aggregator = CandleAggregator::new(60);
        aggregator.apply(&change(10, dec!(4), dec!(10)));
        aggregator.apply(&change(20, dec!(8), dec!(5)));
        let events = aggregator.apply(&change(30, dec!(3), dec!(1)));

        assert_eq!(events.len(), 1);
        let CandleEvent::Updated(candle) = &events[0] else {
            panic!("expected Updated, got {events:?}");
        };
        assert_eq!(candle.open, dec!(4));
        assert_eq!(candle.high, dec!(8));
        assert_eq!(candle.low, dec!(3));
        assert_eq!(candle.close, dec!(3));
        assert_eq!(candle.volume, dec!(16));
        assert_eq!(candle.tick_count, 3);
        assert_eq!(candle.average, dec!(5)); // (4 + 8 + 3) / 3
        assert_invariant(candle);
    }

    #[test]
    fn bucket_boundary_closes_and_reopens() {
        let mut aggregator = CandleAggregator::new(60);
        aggregator.apply(&change(59, dec!(2), dec!(1)));

        // t = 60 falls into the next bucket: close then open, atomically.
        let events = aggregator.apply(&change(60, dec!(3), dec!(7)));
        assert_eq!(events.len(), 2);
        let CandleEvent::Closed(closed) = &events[0] else {
            panic!("expected Closed first, got {events:?}");
        };
        assert_eq!(closed.bucket_start, 0);
        assert_eq!(closed.close, dec!(2));
        let CandleEvent::Opened(opened) = &events[1] else {
            panic!("expected Opened second, got {events:?}");
        };
        assert_eq!(opened.bucket_start, 60);
        assert_eq!(opened.open, dec!(3));
        assert_eq!(opened.volume, dec!(7));
    }

    #[test]
    fn no_close_before_the_boundary_trade_arrives() {
        let mut aggregator = CandleAggregator::new(60);
        aggregator.apply(&change(0, dec!(2), dec!(1)));
        let events = aggregator.apply(&change(59, dec!(2), dec!(1)));
        assert!(matches!(events.as_slice(), [CandleEvent::Updated(_)]));
        assert_eq!(aggregator.current().unwrap().bucket_start, 0);
    }

    #[test]
    fn late_trades_for_closed_buckets_are_dropped() {
        let mut aggregator = CandleAggregator::new(60);
        aggregator.apply(&change(10, dec!(2), dec!(1)));
        aggregator.apply(&change(70, dec!(3), dec!(1)));

        let events = aggregator.apply(&change(50, dec!(99), dec!(1)));
        assert!(events.is_empty());
        // The open candle is untouched.
        let current = aggregator.current().unwrap();
        assert_eq!(current.bucket_start, 60);
        assert_eq!(current.high, dec!(3));
    }

    #[test]
    fn tick_count_matches_folded_trades() {
        let mut aggregator = CandleAggregator::new(300);
        for i in 0..25u64 {
            aggregator.apply(&change(i, Decimal::from(i + 1), dec!(1)));
            let candle = aggregator.current().unwrap();
            assert_eq!(candle.tick_count, i as u32 + 1);
            assert_invariant(candle);
        }
    }

    #[test]
    fn resume_continues_an_open_candle() {
        let mut aggregator = CandleAggregator::new(60);
        aggregator.apply(&change(10, dec!(2), dec!(1)));
        let snapshot = aggregator.current().unwrap().clone();

        let mut resumed = CandleAggregator::resume(60, snapshot);
        let events = resumed.apply(&change(20, dec!(4), dec!(1)));
        assert!(matches!(events.as_slice(), [CandleEvent::Updated(_)]));
        assert_eq!(resumed.current().unwrap().tick_count, 2);
    }
}
