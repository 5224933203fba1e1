//! Environment-driven configuration (spec §6, [AMBIENT]).
//!
//! Loaded with `dotenvy` the way CLI/service binaries in the pack read a
//! `.env` file for local development, then fall back to the process
//! environment in production.

use crate::errors::{EngineError, Result};
use std::collections::{HashMap, HashSet};
use std::env;

fn read_required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| EngineError::ConfigError(format!("missing env var: {key}")))
}

fn read_optional(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Configuration for a client driving the 402 handshake (spec §4.3).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// facilitator base URL the client reports against, when self-verifying
    pub facilitator_url: Option<String>,
}

impl EngineConfig {
    /// Loads from the process environment, first merging a `.env` file if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Ok(EngineConfig {
            facilitator_url: read_optional("FACILITATOR_URL"),
        })
    }
}

/// Facilitator-side configuration: signer key, fee schedule, token whitelist
/// (spec §4.4, §4.9, §6).
#[derive(Debug, Clone)]
pub struct FacilitatorConfig {
    /// facilitator's signing key, used both as `caller` and to pay gas
    pub private_key: String,
    /// fee recipient address; defaults to the signer's own address if unset
    pub fee_to: Option<String>,
    /// `SYMBOL=amount` flat base fee schedule
    pub base_fee: HashMap<String, String>,
    /// optional asset whitelist; `None` means accept any known asset
    pub allowed_tokens: Option<HashSet<String>>,
    /// per-network `MERCHANT_CONTRACT_ADDRESS` overrides
    pub contract_overrides: HashMap<String, String>,
}

impl FacilitatorConfig {
    /// Loads from the process environment.
    ///
    /// Required: `FACILITATOR_PRIVATE_KEY`.
    /// Optional: `FACILITATOR_FEE_TO`, `FACILITATOR_BASE_FEE` (comma-separated
    /// `SYMBOL=amount` pairs), `FACILITATOR_ALLOWED_TOKENS` (comma-separated
    /// addresses), `MERCHANT_CONTRACT_ADDRESS_<NETWORK>` per network.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let private_key = read_required("FACILITATOR_PRIVATE_KEY")?;
        let fee_to = read_optional("FACILITATOR_FEE_TO");

        let mut base_fee = HashMap::new();
        if let Some(raw) = read_optional("FACILITATOR_BASE_FEE") {
            for pair in raw.split(',').filter(|s| !s.trim().is_empty()) {
                let (symbol, amount) = pair.split_once('=').ok_or_else(|| {
                    EngineError::ConfigError(format!("invalid FACILITATOR_BASE_FEE entry: {pair}"))
                })?;
                base_fee.insert(symbol.trim().to_ascii_uppercase(), amount.trim().to_string());
            }
        }

        let allowed_tokens = read_optional("FACILITATOR_ALLOWED_TOKENS").map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<HashSet<_>>()
        });

        let mut contract_overrides = HashMap::new();
        for (key, value) in env::vars() {
            if let Some(network) = key.strip_prefix("MERCHANT_CONTRACT_ADDRESS_") {
                contract_overrides.insert(network.to_ascii_lowercase().replace('_', ":"), value);
            }
        }

        Ok(FacilitatorConfig {
            private_key,
            fee_to,
            base_fee,
            allowed_tokens,
            contract_overrides,
        })
    }

    /// Builds a [`ChainRegistry`](crate::chain_config::ChainRegistry) with
    /// this config's contract overrides applied.
    pub fn chain_registry(&self) -> crate::chain_config::ChainRegistry {
        let mut registry = crate::chain_config::ChainRegistry::new();
        for (network, contract) in &self.contract_overrides {
            registry = registry.with_contract_override(network, contract.clone());
        }
        registry
    }
}

/// Resource-server configuration (spec §4.6, §6).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// facilitator base URL used for `/verify` and `/settle`
    pub facilitator_url: String,
    /// address payments should be made to
    pub pay_to: String,
    /// bind address for the HTTP listener, e.g. `0.0.0.0:8402`
    pub listen_addr: String,
}

impl ServerConfig {
    /// Loads from the process environment.
    ///
    /// Required: `FACILITATOR_URL`, `SERVER_PAY_TO`.
    /// Optional: `SERVER_LISTEN_ADDR` (default `0.0.0.0:8402`).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Ok(ServerConfig {
            facilitator_url: read_required("FACILITATOR_URL")?,
            pay_to: read_required("SERVER_PAY_TO")?,
            listen_addr: read_optional("SERVER_LISTEN_ADDR")
                .unwrap_or_else(|| "0.0.0.0:8402".to_string()),
        })
    }
}
