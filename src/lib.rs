//! Client-side engine for Uniswap-V2-style exchanges: normalized swap
//! event streams, synthetic price routing through a base asset, OHLCV
//! candle aggregation, and safety-checked single and batch swap execution.

pub mod amount;
pub mod batch;
pub mod candles;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod live;
pub mod pool_info;
pub mod stream;
pub mod synthetic;

pub use batch::BatchSwapper;
pub use candles::{Candle, CandleAggregator, CandleEvent};
pub use chain::{
    BatchKind, BatchSwapParams, ChainClient, RawSwap, SubmittedCall, SwapCall, SwapCallParams,
    SwapReceipt, NATIVE_TOKEN,
};
pub use config::{AddressBook, EngineConfig};
pub use engine::DexEngine;
pub use error::EngineError;
pub use executor::{SwapExecutor, SwapOptions};
pub use live::LiveChain;
pub use pool_info::{PoolInfo, PoolInfoTracker};
pub use stream::{PairChange, PairKey, SwapEventStream, TradeEvent};
pub use synthetic::SyntheticRouter;
