//! Live chain client over HTTP JSON-RPC: typed contract bindings, polled
//! log subscriptions, and the signing write path.

use std::str::FromStr;
use std::time::Duration;

use alloy::{
    network::EthereumWallet,
    primitives::{Address, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::eth::{BlockNumberOrTag, Filter, TransactionRequest},
    signers::local::PrivateKeySigner,
    sol,
    sol_types::SolEvent,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chain::{
    BatchKind, BatchSwapParams, ChainClient, RawSwap, SwapCall, SwapReceipt,
};
use crate::config::EngineConfig;
use crate::error::EngineError;

sol! {
    #[sol(rpc)]
    interface IUniswapV2Factory {
        function getPair(address tokenA, address tokenB) external view returns (address pair);
    }

    #[sol(rpc)]
    interface IUniswapV2Pair {
        event Swap(
            address indexed sender,
            uint amount0In,
            uint amount1In,
            uint amount0Out,
            uint amount1Out,
            address indexed to
        );
        function token0() external view returns (address token);
        function token1() external view returns (address token);
    }

    #[sol(rpc)]
    interface IUniswapV2Router {
        function getAmountsOut(
            uint amountIn,
            address[] calldata path
        ) external view returns (uint[] memory amounts);
        function swapExactTokensForTokens(
            uint amountIn,
            uint amountOutMin,
            address[] calldata path,
            address to,
            uint deadline
        ) external returns (uint[] memory amounts);
        function swapExactTokensForETH(
            uint amountIn,
            uint amountOutMin,
            address[] calldata path,
            address to,
            uint deadline
        ) external returns (uint[] memory amounts);
        function swapExactETHForTokens(
            uint amountOutMin,
            address[] calldata path,
            address to,
            uint deadline
        ) external payable returns (uint[] memory amounts);
    }

    #[sol(rpc)]
    interface IERC20 {
        function decimals() external view returns (uint8 value);
        function symbol() external view returns (string memory value);
        function balanceOf(address owner) external view returns (uint256 value);
        function allowance(address owner, address spender) external view returns (uint256 value);
        function approve(address spender, uint256 value) external returns (bool ok);
    }

    #[sol(rpc)]
    interface IWrappedNative {
        function withdraw(uint256 amount) external;
    }

    #[sol(rpc)]
    interface IBatchSwapper {
        function batchSwapExactTokensForTokens(
            uint[] calldata amountsIn,
            uint[] calldata amountOutMins,
            address[][] calldata paths,
            address[] calldata recipients,
            uint[] calldata deadlines
        ) external;
        function batchSwapExactTokensForETH(
            uint[] calldata amountsIn,
            uint[] calldata amountOutMins,
            address[][] calldata paths,
            address[] calldata recipients,
            uint[] calldata deadlines
        ) external;
        function batchSwapExactETHForTokens(
            uint[] calldata amountsIn,
            uint[] calldata amountOutMins,
            address[][] calldata paths,
            address[] calldata recipients,
            uint[] calldata deadlines
        ) external payable;
        function batchTransferToken(
            address token,
            address[] calldata recipients,
            uint[] calldata amounts
        ) external;
    }
}

/// [`ChainClient`] backed by an HTTP endpoint. Event subscriptions poll
/// `eth_getLogs` at the configured interval; writes build a filling,
/// signing provider on demand. Without a signing key the client runs
/// read-only and every write fails with a config error.
pub struct LiveChain {
    provider: RootProvider<Http<Client>>,
    rpc_url: String,
    wallet: Option<PrivateKeySigner>,
    signer: Address,
    config: EngineConfig,
    decimals_cache: DashMap<Address, u8>,
    symbol_cache: DashMap<Address, String>,
    timestamp_cache: DashMap<u64, u64>,
}

impl LiveChain {
    pub fn new(config: EngineConfig, private_key: Option<&str>) -> Result<Self, EngineError> {
        let url = config
            .rpc_http_url
            .parse()
            .map_err(|e| EngineError::ConfigError(format!("Invalid RPC URL: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);

        let wallet = private_key
            .map(|key| {
                PrivateKeySigner::from_str(key)
                    .map_err(|e| EngineError::ConfigError(format!("Invalid signing key: {e}")))
            })
            .transpose()?;
        let signer = wallet.as_ref().map_or(Address::ZERO, |w| w.address());
        if wallet.is_none() {
            info!("no signing key configured, running read-only");
        }

        Ok(Self {
            provider,
            rpc_url: config.rpc_http_url.clone(),
            wallet,
            signer,
            config,
            decimals_cache: DashMap::new(),
            symbol_cache: DashMap::new(),
            timestamp_cache: DashMap::new(),
        })
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    /// Builds the filling, signing provider used for writes.
    fn write_provider(
        &self,
    ) -> Result<impl Provider<Http<Client>> + Clone, EngineError> {
        let wallet = self.wallet.clone().ok_or_else(|| {
            EngineError::ConfigError("No signing key configured, client is read-only".into())
        })?;
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| EngineError::ConfigError(format!("Invalid RPC URL: {e}")))?;
        Ok(ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(EthereumWallet::from(wallet))
            .on_http(url))
    }
}

fn to_receipt(receipt: alloy::rpc::types::eth::TransactionReceipt) -> SwapReceipt {
    SwapReceipt {
        transaction_hash: receipt.transaction_hash,
        block_number: receipt.block_number,
        gas_used: receipt.gas_used,
        success: receipt.status(),
    }
}

#[async_trait]
impl ChainClient for LiveChain {
    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn pool_address(
        &self,
        token_a: Address,
        token_b: Address,
    ) -> Result<Option<Address>, EngineError> {
        let factory = IUniswapV2Factory::new(self.config.addresses.factory, &self.provider);
        let result = factory
            .getPair(token_a, token_b)
            .call()
            .await
            .map_err(EngineError::chain)?;
        if result.pair == Address::ZERO {
            Ok(None)
        } else {
            Ok(Some(result.pair))
        }
    }

    async fn pair_tokens(&self, pool: Address) -> Result<(Address, Address), EngineError> {
        let pair = IUniswapV2Pair::new(pool, &self.provider);
        let token0 = pair.token0().call().await.map_err(EngineError::chain)?.token;
        let token1 = pair.token1().call().await.map_err(EngineError::chain)?.token;
        Ok((token0, token1))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, EngineError> {
        if let Some(cached) = self.decimals_cache.get(&token) {
            return Ok(*cached);
        }
        let value = IERC20::new(token, &self.provider)
            .decimals()
            .call()
            .await
            .map_err(EngineError::chain)?
            .value;
        self.decimals_cache.insert(token, value);
        Ok(value)
    }

    async fn token_symbol(&self, token: Address) -> Result<String, EngineError> {
        if let Some(cached) = self.symbol_cache.get(&token) {
            return Ok(cached.clone());
        }
        let value = IERC20::new(token, &self.provider)
            .symbol()
            .call()
            .await
            .map_err(EngineError::chain)?
            .value;
        self.symbol_cache.insert(token, value.clone());
        Ok(value)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<u64, EngineError> {
        if let Some(cached) = self.timestamp_cache.get(&block_number) {
            return Ok(*cached);
        }
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block_number), false)
            .await
            .map_err(EngineError::chain)?
            .ok_or_else(|| EngineError::Chain(format!("Block {block_number} not found")))?;
        self.timestamp_cache
            .insert(block_number, block.header.timestamp);
        Ok(block.header.timestamp)
    }

    async fn amounts_out(
        &self,
        amount_in: U256,
        path: &[Address],
    ) -> Result<Vec<U256>, EngineError> {
        let router = IUniswapV2Router::new(self.config.addresses.router, &self.provider);
        let result = router
            .getAmountsOut(amount_in, path.to_vec())
            .call()
            .await
            .map_err(EngineError::chain)?;
        Ok(result.amounts)
    }

    async fn subscribe_swaps(
        &self,
        pool: Address,
    ) -> Result<mpsc::UnboundedReceiver<RawSwap>, EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = self.provider.clone();
        let interval = self.poll_interval();
        let mut from_block = self
            .provider
            .get_block_number()
            .await
            .map_err(EngineError::chain)?
            + 1;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let head = match provider.get_block_number().await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(%pool, error = %e, "head poll failed");
                        continue;
                    }
                };
                if head < from_block {
                    continue;
                }
                let filter = Filter::new()
                    .address(pool)
                    .event_signature(IUniswapV2Pair::Swap::SIGNATURE_HASH)
                    .from_block(from_block)
                    .to_block(head);
                let logs = match provider.get_logs(&filter).await {
                    Ok(logs) => logs,
                    Err(e) => {
                        warn!(%pool, error = %e, "log poll failed");
                        continue;
                    }
                };
                for log in logs {
                    let decoded = match log.log_decode::<IUniswapV2Pair::Swap>() {
                        Ok(decoded) => decoded,
                        Err(e) => {
                            warn!(%pool, error = %e, "undecodable swap log");
                            continue;
                        }
                    };
                    let swap = decoded.inner.data;
                    let raw = RawSwap {
                        block_number: log.block_number.unwrap_or(head),
                        sender: swap.sender,
                        recipient: swap.to,
                        amount0_in: swap.amount0In,
                        amount0_out: swap.amount0Out,
                        amount1_in: swap.amount1In,
                        amount1_out: swap.amount1Out,
                    };
                    if tx.send(raw).is_err() {
                        debug!(%pool, "swap receiver dropped, stopping poll");
                        return;
                    }
                }
                from_block = head + 1;
            }
        });
        Ok(rx)
    }

    async fn subscribe_pair_created(
        &self,
        token_a: Address,
        token_b: Address,
    ) -> Result<mpsc::UnboundedReceiver<Address>, EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = self.provider.clone();
        let factory = self.config.addresses.factory;
        let interval = self.poll_interval();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let result = IUniswapV2Factory::new(factory, &provider)
                    .getPair(token_a, token_b)
                    .call()
                    .await;
                match result {
                    Ok(result) if result.pair != Address::ZERO => {
                        let _ = tx.send(result.pair);
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(%token_a, %token_b, error = %e, "pair poll failed"),
                }
                if tx.is_closed() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, EngineError> {
        Ok(IERC20::new(token, &self.provider)
            .balanceOf(owner)
            .call()
            .await
            .map_err(EngineError::chain)?
            .value)
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, EngineError> {
        self.provider
            .get_balance(owner)
            .await
            .map_err(EngineError::chain)
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, EngineError> {
        Ok(IERC20::new(token, &self.provider)
            .allowance(owner, spender)
            .call()
            .await
            .map_err(EngineError::chain)?
            .value)
    }

    async fn approve_max(&self, token: Address, spender: Address) -> Result<(), EngineError> {
        let provider = self.write_provider()?;
        let receipt = IERC20::new(token, &provider)
            .approve(spender, U256::MAX)
            .send()
            .await
            .map_err(EngineError::chain)?
            .get_receipt()
            .await
            .map_err(EngineError::chain)?;
        if !receipt.status() {
            return Err(EngineError::Chain(format!(
                "Approval of {token} for {spender} reverted in {}",
                receipt.transaction_hash
            )));
        }
        Ok(())
    }

    async fn estimate_swap_gas(&self, call: &SwapCall) -> Result<u64, EngineError> {
        let router = IUniswapV2Router::new(self.config.addresses.router, &self.provider);
        let p = call.params().clone();
        let deadline = U256::from(p.deadline);
        let gas = match call {
            SwapCall::TokensForTokens(_) => {
                router
                    .swapExactTokensForTokens(p.amount_in, p.amount_out_min, p.path, p.recipient, deadline)
                    .from(self.signer)
                    .estimate_gas()
                    .await
            }
            SwapCall::TokensForNative(_) => {
                router
                    .swapExactTokensForETH(p.amount_in, p.amount_out_min, p.path, p.recipient, deadline)
                    .from(self.signer)
                    .estimate_gas()
                    .await
            }
            SwapCall::NativeForTokens(_) => {
                router
                    .swapExactETHForTokens(p.amount_out_min, p.path, p.recipient, deadline)
                    .from(self.signer)
                    .value(p.amount_in)
                    .estimate_gas()
                    .await
            }
        }
        .map_err(EngineError::chain)?;
        gas.try_into()
            .map_err(|_| EngineError::Chain("Gas estimate too large".into()))
    }

    async fn gas_price(&self) -> Result<u128, EngineError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(EngineError::chain)
    }

    async fn send_swap(&self, call: SwapCall) -> Result<SwapReceipt, EngineError> {
        let provider = self.write_provider()?;
        let router = IUniswapV2Router::new(self.config.addresses.router, &provider);
        let p = call.params().clone();
        let deadline = U256::from(p.deadline);
        info!(path = ?p.path, amount_in = %p.amount_in, "submitting swap");

        // The pending handle borrows the call builder, so each arm keeps
        // its builder alive until the receipt arrives.
        let receipt = match call {
            SwapCall::TokensForTokens(_) => {
                let builder = router.swapExactTokensForTokens(
                    p.amount_in,
                    p.amount_out_min,
                    p.path,
                    p.recipient,
                    deadline,
                );
                let pending = builder.send().await.map_err(EngineError::chain)?;
                pending.get_receipt().await.map_err(EngineError::chain)?
            }
            SwapCall::TokensForNative(_) => {
                let builder = router.swapExactTokensForETH(
                    p.amount_in,
                    p.amount_out_min,
                    p.path,
                    p.recipient,
                    deadline,
                );
                let pending = builder.send().await.map_err(EngineError::chain)?;
                pending.get_receipt().await.map_err(EngineError::chain)?
            }
            SwapCall::NativeForTokens(_) => {
                let builder = router
                    .swapExactETHForTokens(p.amount_out_min, p.path, p.recipient, deadline)
                    .value(p.amount_in);
                let pending = builder.send().await.map_err(EngineError::chain)?;
                pending.get_receipt().await.map_err(EngineError::chain)?
            }
        };
        Ok(to_receipt(receipt))
    }

    async fn send_batch(
        &self,
        kind: BatchKind,
        params: BatchSwapParams,
    ) -> Result<SwapReceipt, EngineError> {
        let provider = self.write_provider()?;
        let swapper = IBatchSwapper::new(self.config.addresses.batch_swapper, &provider);
        let value = params.total_amount_in();
        let deadlines: Vec<U256> = params.deadlines.iter().map(|d| U256::from(*d)).collect();
        info!(?kind, legs = params.len(), "submitting batch");

        let receipt = match kind {
            BatchKind::TokensForTokens => {
                let builder = swapper.batchSwapExactTokensForTokens(
                    params.amounts_in,
                    params.amount_out_mins,
                    params.paths,
                    params.recipients,
                    deadlines,
                );
                let pending = builder.send().await.map_err(EngineError::chain)?;
                pending.get_receipt().await.map_err(EngineError::chain)?
            }
            BatchKind::TokensForNative => {
                let builder = swapper.batchSwapExactTokensForETH(
                    params.amounts_in,
                    params.amount_out_mins,
                    params.paths,
                    params.recipients,
                    deadlines,
                );
                let pending = builder.send().await.map_err(EngineError::chain)?;
                pending.get_receipt().await.map_err(EngineError::chain)?
            }
            BatchKind::NativeForTokens => {
                let builder = swapper
                    .batchSwapExactETHForTokens(
                        params.amounts_in,
                        params.amount_out_mins,
                        params.paths,
                        params.recipients,
                        deadlines,
                    )
                    .value(value);
                let pending = builder.send().await.map_err(EngineError::chain)?;
                pending.get_receipt().await.map_err(EngineError::chain)?
            }
        };
        Ok(to_receipt(receipt))
    }

    async fn send_batch_transfer(
        &self,
        token: Address,
        recipients: Vec<Address>,
        amounts: Vec<U256>,
    ) -> Result<SwapReceipt, EngineError> {
        let provider = self.write_provider()?;
        let swapper = IBatchSwapper::new(self.config.addresses.batch_swapper, &provider);
        let receipt = swapper
            .batchTransferToken(token, recipients, amounts)
            .send()
            .await
            .map_err(EngineError::chain)?
            .get_receipt()
            .await
            .map_err(EngineError::chain)?;
        Ok(to_receipt(receipt))
    }

    async fn unwrap_native(&self, amount: U256) -> Result<(), EngineError> {
        let provider = self.write_provider()?;
        let wrapped = IWrappedNative::new(self.config.addresses.wrapped_native, &provider);
        let receipt = wrapped
            .withdraw(amount)
            .send()
            .await
            .map_err(EngineError::chain)?
            .get_receipt()
            .await
            .map_err(EngineError::chain)?;
        if !receipt.status() {
            return Err(EngineError::Chain(format!(
                "Unwrap of {amount} reverted in {}",
                receipt.transaction_hash
            )));
        }
        Ok(())
    }

    async fn transfer_native(&self, to: Address, amount: U256) -> Result<(), EngineError> {
        let provider = self.write_provider()?;
        let tx = TransactionRequest::default()
            .from(self.signer)
            .to(to)
            .value(amount);
        let receipt = provider
            .send_transaction(tx)
            .await
            .map_err(EngineError::chain)?
            .get_receipt()
            .await
            .map_err(EngineError::chain)?;
        if !receipt.status() {
            return Err(EngineError::Chain(format!(
                "Native transfer to {to} reverted in {}",
                receipt.transaction_hash
            )));
        }
        Ok(())
    }
}
