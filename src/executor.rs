//! Safety-checked single-swap execution: live quote, slippage bound,
//! balance and allowance gates, optional gas netting, deadline stamping.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::amount::{apply_slippage, from_base_units, to_base_units};
use crate::chain::{
    ChainClient, SubmittedCall, SwapCall, SwapCallParams, SwapReceipt, NATIVE_DECIMALS,
    NATIVE_TOKEN,
};
use crate::config::EngineConfig;
use crate::error::EngineError;

/// Optional knobs for [`SwapExecutor::swap_exact_input`].
#[derive(Debug, Clone)]
pub struct SwapOptions {
    /// Fractional tolerance; falls back to the configured default.
    pub slippage: Option<Decimal>,
    /// Defaults to the signer's own address.
    pub recipient: Option<Address>,
    /// Seconds from now until the on-chain deadline.
    pub deadline_delta: u64,
    /// Native-input swaps only: subtract the estimated gas fee from the
    /// attached value so the transaction never overdraws the signer.
    pub nett_gas_from_input: bool,
}

impl Default for SwapOptions {
    fn default() -> Self {
        Self {
            slippage: None,
            recipient: None,
            deadline_delta: 60 * 10,
            nett_gas_from_input: false,
        }
    }
}

pub struct SwapExecutor {
    chain: Arc<dyn ChainClient>,
    config: EngineConfig,
}

impl SwapExecutor {
    pub fn new(chain: Arc<dyn ChainClient>, config: EngineConfig) -> Self {
        Self { chain, config }
    }

    /// Swaps an exact decimal input amount, routing through the base asset
    /// when the endpoints differ from it. Use [`NATIVE_TOKEN`] as either
    /// endpoint to pay with or receive the native currency.
    pub async fn swap_exact_input(
        &self,
        input_token: Address,
        output_token: Address,
        amount_in: Decimal,
        options: SwapOptions,
    ) -> Result<SwapReceipt, EngineError> {
        if input_token == output_token {
            return Err(EngineError::InvalidInput(
                "Input and output token are identical".into(),
            ));
        }
        let native_in = input_token == NATIVE_TOKEN;
        let native_out = output_token == NATIVE_TOKEN;

        // Wrapped against native is a wrap or unwrap, not a swap; mapping
        // the native side to its wrapped form would leave a one-token path.
        let wrapped = self.config.addresses.wrapped_native;
        if (native_in && output_token == wrapped) || (native_out && input_token == wrapped) {
            return Err(EngineError::InvalidInput(
                "Native and wrapped native cannot be swapped against each other".into(),
            ));
        }

        let signer = self.chain.signer_address();
        let slippage = options.slippage.unwrap_or(self.config.default_slippage);
        let recipient = options.recipient.unwrap_or(signer);
        info!(
            %input_token, %output_token, %amount_in, %slippage, %recipient,
            "executing exact-input swap"
        );

        let entry = if native_in {
            self.config.addresses.wrapped_native
        } else {
            input_token
        };
        let exit = if native_out {
            self.config.addresses.wrapped_native
        } else {
            output_token
        };
        let path = route_path(entry, self.config.addresses.base_asset, exit);

        let input_decimals = if native_in {
            NATIVE_DECIMALS
        } else {
            self.chain.token_decimals(input_token).await?
        };
        let mut amount_wei = to_base_units(amount_in, input_decimals)?;
        let mut quoted = self.quote_raw(amount_wei, &path).await?;
        let mut amount_out_min = apply_slippage(quoted, slippage)?;

        // Balance gate, before anything is submitted.
        let balance = if native_in {
            self.chain.native_balance(signer).await?
        } else {
            self.chain.balance_of(input_token, signer).await?
        };
        if balance < amount_wei {
            return Err(EngineError::InsufficientBalance {
                token: self.describe_token(input_token).await,
            });
        }

        // Lazy maximal approval: approve once, then every later swap under
        // the same approval goes straight through.
        if !native_in {
            let router = self.config.addresses.router;
            let allowance = self.chain.allowance(input_token, signer, router).await?;
            if allowance < amount_wei {
                info!(%input_token, %router, "allowance too low, approving maximum");
                self.chain.approve_max(input_token, router).await?;
            }
        }

        let deadline = Utc::now().timestamp() as u64 + options.deadline_delta;
        let params = SwapCallParams {
            amount_in: amount_wei,
            amount_out_min,
            path: path.clone(),
            recipient,
            deadline,
        };
        let mut call = if native_in {
            SwapCall::NativeForTokens(params)
        } else if native_out {
            SwapCall::TokensForNative(params)
        } else {
            SwapCall::TokensForTokens(params)
        };

        if native_in && options.nett_gas_from_input {
            let gas = self.chain.estimate_swap_gas(&call).await?;
            let gas_price = self.chain.gas_price().await?;
            let fee = U256::from(gas) * U256::from(gas_price);
            if fee >= amount_wei {
                return Err(EngineError::InsufficientBalance {
                    token: "native".into(),
                });
            }
            amount_wei -= fee;
            quoted = self.quote_raw(amount_wei, &path).await?;
            amount_out_min = apply_slippage(quoted, slippage)?;
            debug!(%fee, netted = %amount_wei, "netted gas fee from input amount");

            let params = call.params_mut();
            params.amount_in = amount_wei;
            params.amount_out_min = amount_out_min;
        }

        let receipt = self.chain.send_swap(call.clone()).await?;
        if !receipt.success {
            return Err(EngineError::ExecutionReverted {
                transaction_hash: receipt.transaction_hash,
                call: Box::new(SubmittedCall::Swap(call)),
            });
        }
        info!(hash = %receipt.transaction_hash, "swap confirmed");
        Ok(receipt)
    }

    /// Decimal-adjusted read-only quote for `amount_in` along
    /// `[input, base, output]` with duplicate hops elided.
    pub async fn quote_amount_out(
        &self,
        input_token: Address,
        output_token: Address,
        amount_in: Decimal,
    ) -> Result<Decimal, EngineError> {
        let input_decimals = self.chain.token_decimals(input_token).await?;
        let output_decimals = self.chain.token_decimals(output_token).await?;
        let path = route_path(input_token, self.config.addresses.base_asset, output_token);
        let out = self
            .quote_raw(to_base_units(amount_in, input_decimals)?, &path)
            .await?;
        from_base_units(out, output_decimals)
    }

    async fn quote_raw(&self, amount_in: U256, path: &[Address]) -> Result<U256, EngineError> {
        let amounts = self.chain.amounts_out(amount_in, path).await?;
        amounts
            .last()
            .copied()
            .ok_or_else(|| EngineError::chain("empty quote response"))
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

/// `[input, base, output]` with the base hop elided when redundant: each
/// address keeps only its first occurrence.
pub(crate) fn route_path(input: Address, base: Address, output: Address) -> Vec<Address> {
    let mut path = Vec::with_capacity(3);
    for token in [input, base, output] {
        if !path.contains(&token) {
            path.push(token);
        }
    }
    path
}
