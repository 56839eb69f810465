use alloy::primitives::{Address, B256};
use thiserror::Error;

use crate::chain::SubmittedCall;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not enough balance for {token}")]
    InsufficientBalance { token: String },
    #[error("Liquidity pool for pair {token_a}/{token_b} not found")]
    PoolNotFound { token_a: Address, token_b: Address },
    #[error("Transaction {transaction_hash} reverted on-chain")]
    ExecutionReverted {
        transaction_hash: B256,
        /// The submitted call, retained so callers can decode its arguments
        /// against the relevant contract interface.
        call: Box<SubmittedCall>,
    },
    #[error("Batch requires a single shared input token, got {count} distinct tokens")]
    RouteAmbiguous { count: usize },
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Chain access failed: {0}")]
    Chain(String),
}

impl EngineError {
    /// Wraps any transport/contract failure from the chain access layer.
    pub fn chain(err: impl std::fmt::Display) -> Self {
        EngineError::Chain(err.to_string())
    }
}
