//! Chain access port: everything the engine needs from the underlying chain,
//! behind one async trait so tests can substitute an in-memory double.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::EngineError;

/// Pseudo-address for the chain's native currency on the engine's public
/// surface. Routed through the wrapped-native token internally.
pub const NATIVE_TOKEN: Address = Address::ZERO;

/// Decimal places of the native currency and its wrapped representation.
pub const NATIVE_DECIMALS: u8 = 18;

/// A raw pool swap event, amounts still in base units and in the pool's own
/// token0/token1 order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSwap {
    pub block_number: u64,
    pub sender: Address,
    pub recipient: Address,
    pub amount0_in: U256,
    pub amount0_out: U256,
    pub amount1_in: U256,
    pub amount1_out: U256,
}

/// Parameters shared by every single-swap router call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapCallParams {
    pub amount_in: U256,
    pub amount_out_min: U256,
    pub path: Vec<Address>,
    pub recipient: Address,
    pub deadline: u64,
}

/// A fully-formed single swap, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapCall {
    TokensForTokens(SwapCallParams),
    TokensForNative(SwapCallParams),
    NativeForTokens(SwapCallParams),
}

impl SwapCall {
    pub fn params(&self) -> &SwapCallParams {
        match self {
            SwapCall::TokensForTokens(p)
            | SwapCall::TokensForNative(p)
            | SwapCall::NativeForTokens(p) => p,
        }
    }

    pub fn params_mut(&mut self) -> &mut SwapCallParams {
        match self {
            SwapCall::TokensForTokens(p)
            | SwapCall::TokensForNative(p)
            | SwapCall::NativeForTokens(p) => p,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchKind {
    TokensForTokens,
    TokensForNative,
    NativeForTokens,
}

/// Parallel parameter arrays for one batched swap call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSwapParams {
    pub amounts_in: Vec<U256>,
    pub amount_out_mins: Vec<U256>,
    pub paths: Vec<Vec<Address>>,
    pub recipients: Vec<Address>,
    pub deadlines: Vec<u64>,
}

impl BatchSwapParams {
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Total input amount, used as the attached value for native-input
    /// batches.
    pub fn total_amount_in(&self) -> U256 {
        self.amounts_in
            .iter()
            .fold(U256::ZERO, |acc, a| acc.saturating_add(*a))
    }
}

/// The call a failed transaction was built from, retained on
/// [`EngineError::ExecutionReverted`] for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmittedCall {
    Swap(SwapCall),
    Batch {
        kind: BatchKind,
        params: BatchSwapParams,
    },
    BatchTransfer {
        token: Address,
        recipients: Vec<Address>,
        amounts: Vec<U256>,
    },
}

/// Outcome of an awaited transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: u128,
    pub success: bool,
}

/// Everything the engine reads from or submits to the chain.
///
/// Observation methods deliver through unbounded channels; the sender side is
/// owned by the implementation's polling task and dropping the receiver tears
/// the delivery down.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address transactions are signed with. Zero when running read-only.
    fn signer_address(&self) -> Address;

    /// Resolves the pool for an unordered token pair, `None` when no pool
    /// has been created.
    async fn pool_address(&self, token_a: Address, token_b: Address)
        -> Result<Option<Address>, EngineError>;

    /// The pool's internal (token0, token1) ordering.
    async fn pair_tokens(&self, pool: Address) -> Result<(Address, Address), EngineError>;

    async fn token_decimals(&self, token: Address) -> Result<u8, EngineError>;

    async fn token_symbol(&self, token: Address) -> Result<String, EngineError>;

    async fn block_timestamp(&self, block_number: u64) -> Result<u64, EngineError>;

    /// Read-only router quote along `path`; one output amount per hop.
    async fn amounts_out(
        &self,
        amount_in: U256,
        path: &[Address],
    ) -> Result<Vec<U256>, EngineError>;

    /// Delivers every future swap event of `pool`.
    async fn subscribe_swaps(
        &self,
        pool: Address,
    ) -> Result<mpsc::UnboundedReceiver<RawSwap>, EngineError>;

    /// Delivers the pool address once a pool for the unordered pair is
    /// created. One-shot in practice; implementations may keep delivering.
    async fn subscribe_pair_created(
        &self,
        token_a: Address,
        token_b: Address,
    ) -> Result<mpsc::UnboundedReceiver<Address>, EngineError>;

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, EngineError>;

    async fn native_balance(&self, owner: Address) -> Result<U256, EngineError>;

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, EngineError>;

    /// Submits a maximal approval and awaits its inclusion.
    async fn approve_max(&self, token: Address, spender: Address) -> Result<(), EngineError>;

    async fn estimate_swap_gas(&self, call: &SwapCall) -> Result<u64, EngineError>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128, EngineError>;

    async fn send_swap(&self, call: SwapCall) -> Result<SwapReceipt, EngineError>;

    async fn send_batch(
        &self,
        kind: BatchKind,
        params: BatchSwapParams,
    ) -> Result<SwapReceipt, EngineError>;

    async fn send_batch_transfer(
        &self,
        token: Address,
        recipients: Vec<Address>,
        amounts: Vec<U256>,
    ) -> Result<SwapReceipt, EngineError>;

    /// Unwraps `amount` of the wrapped native token held by the signer.
    async fn unwrap_native(&self, amount: U256) -> Result<(), EngineError>;

    /// Plain native-currency transfer from the signer.
    async fn transfer_native(&self, to: Address, amount: U256) -> Result<(), EngineError>;
}
