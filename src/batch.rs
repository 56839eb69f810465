//! Batch swap preparation and execution: per-path validation, base-asset
//! rerouting, shared deadlines, and the native-bound settlement step.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::amount::{apply_slippage, to_base_units};
use crate::chain::{
    BatchKind, BatchSwapParams, ChainClient, SubmittedCall, SwapReceipt, NATIVE_TOKEN,
};
use crate::config::EngineConfig;
use crate::error::EngineError;

pub struct BatchSwapper {
    chain: Arc<dyn ChainClient>,
    config: EngineConfig,
}

impl BatchSwapper {
    pub fn new(chain: Arc<dyn ChainClient>, config: EngineConfig) -> Self {
        Self { chain, config }
    }

    /// Validates a batch of independent swap intents and produces the
    /// parallel parameter arrays for one batched on-chain call.
    ///
    /// Two phases: all balance gates run first so a single underfunded
    /// entry aborts preparation before any approval transaction is sent;
    /// approvals and path rewrites follow.
    pub async fn prepare(
        &self,
        kind: BatchKind,
        amounts_in: &[Decimal],
        amount_out_mins: &[Decimal],
        paths: &[Vec<Address>],
        slippages: &[Option<Decimal>],
        recipients: Option<&[Address]>,
        deadline_delta: u64,
    ) -> Result<BatchSwapParams, EngineError> {
        if amounts_in.len() != paths.len() || amount_out_mins.len() != paths.len() {
            return Err(EngineError::InvalidInput(
                "Batch parameter arrays differ in length".into(),
            ));
        }
        let signer = self.chain.signer_address();
        let native_in = kind == BatchKind::NativeForTokens;
        let wrapped = self.config.addresses.wrapped_native;
        let base = self.config.addresses.base_asset;

        // Recipients are used verbatim only when the caller supplied one per
        // path; anything else defaults every path to the signer.
        let custom_recipients = recipients.filter(|r| r.len() == paths.len());

        // Phase 1: decimal-adjust inputs and gate every balance. Spend is
        // summed per input token so a token appearing in several entries is
        // gated on its combined amount, not each entry alone.
        let mut amounts_wei = Vec::with_capacity(paths.len());
        let mut spend_by_token: HashMap<Address, U256> = HashMap::new();
        let mut native_total = U256::ZERO;
        for (i, path) in paths.iter().enumerate() {
            if path.len() < 2 {
                return Err(EngineError::InvalidInput(format!(
                    "Path {i} has fewer than two tokens"
                )));
            }
            let input = path[0];
            if native_in && input != wrapped {
                return Err(EngineError::InvalidInput(format!(
                    "Path {i} of a native-input batch must start at the wrapped native token"
                )));
            }
            if kind == BatchKind::TokensForNative && *path.last().unwrap() != wrapped {
                return Err(EngineError::InvalidInput(format!(
                    "Path {i} of a native-output batch must end at the wrapped native token"
                )));
            }

            let decimals = self.chain.token_decimals(input).await?;
            let amount_wei = to_base_units(amounts_in[i], decimals)?;

            if native_in {
                native_total = native_total.saturating_add(amount_wei);
            } else {
                let spend = spend_by_token.entry(input).or_insert(U256::ZERO);
                *spend = spend.saturating_add(amount_wei);
                let balance = self.chain.balance_of(input, signer).await?;
                if balance < *spend {
                    return Err(EngineError::InsufficientBalance {
                        token: self.describe_token(input).await,
                    });
                }
            }
            amounts_wei.push(amount_wei);
        }
        if native_in && self.chain.native_balance(signer).await? < native_total {
            return Err(EngineError::InsufficientBalance {
                token: "native".into(),
            });
        }

        // Phase 2: approvals, rerouting, slippage bounds, recipients.
        let deadline = Utc::now().timestamp() as u64 + deadline_delta;
        let mut prepared = BatchSwapParams::default();
        let mut approved: HashSet<Address> = HashSet::new();

        for (i, path) in paths.iter().enumerate() {
            let mut path = path.clone();
            let input = path[0];

            // The allowance must cover every entry spending this token, so
            // it is checked against the token's combined spend.
            if !native_in && !approved.contains(&input) {
                let spender = self.config.addresses.batch_swapper;
                let required = spend_by_token
                    .get(&input)
                    .copied()
                    .unwrap_or(amounts_wei[i]);
                let allowance = self.chain.allowance(input, signer, spender).await?;
                if allowance < required {
                    info!(%input, %spender, "allowance too low, approving maximum");
                    self.chain.approve_max(input, spender).await?;
                }
                approved.insert(input);
            }

            // Reroute through the base asset when the first hop has no
            // pool. With the base asset already at an endpoint there is no
            // further hop to insert.
            if self.chain.pool_address(path[0], path[1]).await?.is_none() {
                if path[0] == base || path[1] == base {
                    return Err(EngineError::PoolNotFound {
                        token_a: path[0],
                        token_b: path[1],
                    });
                }
                debug!(from = %path[0], to = %path[1], "no direct pool, rerouting through base asset");
                path = vec![path[0], base, path[1]];
            }

            let slippage = slippages
                .get(i)
                .copied()
                .flatten()
                .unwrap_or(self.config.default_slippage);
            let output = *path.last().unwrap();
            let output_decimals = self.chain.token_decimals(output).await?;
            let min_wei = apply_slippage(to_base_units(amount_out_mins[i], output_decimals)?, slippage)?;

            prepared.amounts_in.push(amounts_wei[i]);
            prepared.amount_out_mins.push(min_wei);
            prepared.paths.push(path);
            prepared
                .recipients
                .push(custom_recipients.map_or(signer, |r| r[i]));
            prepared.deadlines.push(deadline);
        }

        Ok(prepared)
    }

    pub async fn swap_tokens_for_tokens(
        &self,
        amounts_in: &[Decimal],
        amount_out_mins: &[Decimal],
        paths: &[Vec<Address>],
        slippages: &[Option<Decimal>],
        recipients: Option<&[Address]>,
        deadline_delta: u64,
    ) -> Result<SwapReceipt, EngineError> {
        let params = self
            .prepare(
                BatchKind::TokensForTokens,
                amounts_in,
                amount_out_mins,
                paths,
                slippages,
                recipients,
                deadline_delta,
            )
            .await?;
        self.submit(BatchKind::TokensForTokens, params).await
    }

    /// Tokens-for-native batch. Legs whose input is already the wrapped
    /// native token have nothing to swap; they are excluded from the
    /// batched call and settled by unwrap-and-transfer once the batch
    /// confirms, so their recipients receive native currency.
    ///
    /// Returns `None` when every leg was settled without a batch call.
    pub async fn swap_tokens_for_native(
        &self,
        amounts_in: &[Decimal],
        amount_out_mins: &[Decimal],
        paths: &[Vec<Address>],
        slippages: &[Option<Decimal>],
        recipients: Option<&[Address]>,
        deadline_delta: u64,
    ) -> Result<Option<SwapReceipt>, EngineError> {
        if amounts_in.len() != paths.len() || amount_out_mins.len() != paths.len() {
            return Err(EngineError::InvalidInput(
                "Batch parameter arrays differ in length".into(),
            ));
        }
        let signer = self.chain.signer_address();
        let wrapped = self.config.addresses.wrapped_native;
        let custom_recipients = recipients.filter(|r| r.len() == paths.len());

        let mut kept = Vec::new();
        let mut settlements: Vec<(U256, Address)> = Vec::new();
        for (i, path) in paths.iter().enumerate() {
            if path.first() == Some(&wrapped) {
                let decimals = self.chain.token_decimals(wrapped).await?;
                let amount = to_base_units(amounts_in[i], decimals)?;
                let recipient = custom_recipients.map_or(signer, |r| r[i]);
                settlements.push((amount, recipient));
            } else {
                kept.push(i);
            }
        }

        // Settlement legs spend the signer's wrapped balance; gate it up
        // front alongside the batch's own balance checks.
        let settlement_total = settlements
            .iter()
            .fold(U256::ZERO, |acc, (a, _)| acc.saturating_add(*a));
        if !settlement_total.is_zero()
            && self.chain.balance_of(wrapped, signer).await? < settlement_total
        {
            return Err(EngineError::InsufficientBalance {
                token: self.describe_token(wrapped).await,
            });
        }

        let pick = |src: &[Decimal]| -> Vec<Decimal> { kept.iter().map(|&i| src[i]).collect() };
        let kept_paths: Vec<Vec<Address>> = kept.iter().map(|&i| paths[i].clone()).collect();
        let kept_slippages: Vec<Option<Decimal>> = kept
            .iter()
            .map(|&i| slippages.get(i).copied().flatten())
            .collect();
        let kept_recipients: Option<Vec<Address>> =
            custom_recipients.map(|r| kept.iter().map(|&i| r[i]).collect());

        let receipt = if kept.is_empty() {
            None
        } else {
            let params = self
                .prepare(
                    BatchKind::TokensForNative,
                    &pick(amounts_in),
                    &pick(amount_out_mins),
                    &kept_paths,
                    &kept_slippages,
                    kept_recipients.as_deref(),
                    deadline_delta,
                )
                .await?;
            Some(self.submit(BatchKind::TokensForNative, params).await?)
        };

        for (amount, recipient) in settlements {
            self.chain.unwrap_native(amount).await?;
            if recipient != signer {
                self.chain.transfer_native(recipient, amount).await?;
            }
            info!(%amount, %recipient, "settled wrapped-native leg");
        }

        Ok(receipt)
    }

    pub async fn swap_native_for_tokens(
        &self,
        amounts_in: &[Decimal],
        amount_out_mins: &[Decimal],
        paths: &[Vec<Address>],
        slippages: &[Option<Decimal>],
        recipients: Option<&[Address]>,
        deadline_delta: u64,
    ) -> Result<SwapReceipt, EngineError> {
        let params = self
            .prepare(
                BatchKind::NativeForTokens,
                amounts_in,
                amount_out_mins,
                paths,
                slippages,
                recipients,
                deadline_delta,
            )
            .await?;
        self.submit(BatchKind::NativeForTokens, params).await
    }

    /// Batched transfer of one shared token to many recipients. Supplying
    /// more than one distinct token fails with [`EngineError::RouteAmbiguous`].
    pub async fn transfer_token(
        &self,
        tokens: &[Address],
        recipients: &[Address],
        amounts: &[Decimal],
    ) -> Result<SwapReceipt, EngineError> {
        let distinct: HashSet<Address> = tokens.iter().copied().collect();
        if distinct.len() > 1 {
            return Err(EngineError::RouteAmbiguous {
                count: distinct.len(),
            });
        }
        let Some(&token) = tokens.first() else {
            return Err(EngineError::InvalidInput("No token supplied".into()));
        };
        if recipients.len() != amounts.len() {
            return Err(EngineError::InvalidInput(
                "Recipient and amount arrays differ in length".into(),
            ));
        }
        let signer = self.chain.signer_address();
        info!(%token, count = recipients.len(), "executing batch transfer");

        let decimals = self.chain.token_decimals(token).await?;
        let mut amounts_wei = Vec::with_capacity(amounts.len());
        let mut total = U256::ZERO;
        for amount in amounts {
            let wei = to_base_units(*amount, decimals)?;
            total = total.saturating_add(wei);
            amounts_wei.push(wei);
        }

        if self.chain.balance_of(token, signer).await? < total {
            return Err(EngineError::InsufficientBalance {
                token: self.describe_token(token).await,
            });
        }
        let spender = self.config.addresses.batch_swapper;
        if self.chain.allowance(token, signer, spender).await? < total {
            info!(%token, %spender, "allowance too low, approving maximum");
            self.chain.approve_max(token, spender).await?;
        }

        let receipt = self
            .chain
            .send_batch_transfer(token, recipients.to_vec(), amounts_wei.clone())
            .await?;
        if !receipt.success {
            return Err(EngineError::ExecutionReverted {
                transaction_hash: receipt.transaction_hash,
                call: Box::new(SubmittedCall::BatchTransfer {
                    token,
                    recipients: recipients.to_vec(),
                    amounts: amounts_wei,
                }),
            });
        }
        Ok(receipt)
    }

    async fn submit(
        &self,
        kind: BatchKind,
        params: BatchSwapParams,
    ) -> Result<SwapReceipt, EngineError> {
        info!(?kind, legs = params.len(), "submitting batch swap");
        let receipt = self.chain.send_batch(kind, params.clone()).await?;
        if !receipt.success {
            return Err(EngineError::ExecutionReverted {
                transaction_hash: receipt.transaction_hash,
                call: Box::new(SubmittedCall::Batch { kind, params }),
            });
        }
        info!(hash = %receipt.transaction_hash, "batch swap confirmed");
        Ok(receipt)
    }

    async fn describe_token(&self, token: Address) -> String {
        if token == NATIVE_TOKEN {
            return "native".into();
        }
        self.chain
            .token_symbol(token)
            .await
            .unwrap_or_else(|_| token.to_string())
    }
}
