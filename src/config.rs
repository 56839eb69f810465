use std::path::Path;
use std::str::FromStr;

use alloy::primitives::Address;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Per-network contract addresses consumed by the engine core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressBook {
    /// V2-style swap router (quotes and single swaps).
    pub router: Address,
    /// Pair factory (pool resolution and PairCreated events).
    pub factory: Address,
    /// Wrapped representation of the chain's native currency.
    pub wrapped_native: Address,
    /// Intermediate hop used when a pair has no direct pool. Usually the
    /// wrapped native token, but configurable per deployment.
    pub base_asset: Address,
    /// Batch swap/transfer helper contract.
    pub batch_swapper: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub network: String,
    pub rpc_http_url: String,
    /// How often the log-polling subscriptions check for new blocks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Fractional slippage tolerance applied when a call does not supply one.
    #[serde(default = "default_slippage")]
    pub default_slippage: Decimal,
    pub addresses: AddressBook,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_slippage() -> Decimal {
    dec!(0.001)
}

impl EngineConfig {
    /// Built-in address table for known deployments. The batch swapper is a
    /// project-deployed contract, so networks without one reuse the zero
    /// address and batch calls fail until it is configured.
    pub fn for_network(network: &str) -> Result<Self, EngineError> {
        let (rpc, router, factory, wrapped) = match network {
            "ethereum" => (
                "https://eth.drpc.org",
                "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D",
                "0x5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f",
                "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
            ),
            "bsc" => (
                "https://bsc.drpc.org",
                "0x10ED43C718714eb63d5aA57B78B54704E256024E",
                "0xcA143Ce32Fe78f1f7019d7d551a6402fC5350c73",
                "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c",
            ),
            "polygon" => (
                "https://polygon.drpc.org",
                "0xedf6066a2b290C185783862C7F4776A2C8077AD1",
                "0x9e5A52f57b3038F1B8EeE45F28b3C1967e22799C",
                "0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270",
            ),
            "base" => (
                "https://base.drpc.org",
                "0x4752ba5dbc23f44d87826276bf6fd6b1c372ad24",
                "0x8909Dc15e40173Ff4699343b6eB8132c65e18eC6",
                "0x4200000000000000000000000000000000000006",
            ),
            other => {
                return Err(EngineError::ConfigError(format!(
                    "Unknown network: {other}"
                )))
            }
        };

        let wrapped = parse_address(wrapped)?;
        Ok(Self {
            network: network.to_string(),
            rpc_http_url: rpc.to_string(),
            poll_interval_ms: default_poll_interval_ms(),
            default_slippage: default_slippage(),
            addresses: AddressBook {
                router: parse_address(router)?,
                factory: parse_address(factory)?,
                wrapped_native: wrapped,
                base_asset: wrapped,
                batch_swapper: Address::ZERO,
            },
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EngineError::ConfigError(format!("Cannot read config file: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| EngineError::ConfigError(format!("Invalid config file: {e}")))
    }
}

fn parse_address(raw: &str) -> Result<Address, EngineError> {
    Address::from_str(raw)
        .map_err(|_| EngineError::ConfigError(format!("Invalid address: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_networks_resolve() {
        for network in ["ethereum", "bsc", "polygon", "base"] {
            let config = EngineConfig::for_network(network).unwrap();
            assert_eq!(config.network, network);
            assert_ne!(config.addresses.router, Address::ZERO);
            assert_eq!(config.addresses.base_asset, config.addresses.wrapped_native);
        }
    }

    #[test]
    fn unknown_network_is_rejected() {
        assert!(matches!(
            EngineConfig::for_network("moonbase"),
            Err(EngineError::ConfigError(_))
        ));
    }
}
