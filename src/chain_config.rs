//! Network identifiers and the static chain configuration table (spec §4.1).

use crate::address::{AddressFamily, Base58TronFamily, Hex20Family};
use crate::errors::{EngineError, Result};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Address-family tag a network belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// 20-byte hex addresses (EVM-shaped chains).
    Evm,
    /// Base58Check addresses (TRON-shaped chains).
    Tron,
}

impl Family {
    /// Returns the address-family implementation for this chain family.
    pub fn converter(&self) -> &'static dyn AddressFamily {
        match self {
            Family::Evm => &Hex20Family,
            Family::Tron => &Base58TronFamily,
        }
    }
}

/// A parsed `<family>:<name>` network identifier (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkId {
    /// the full lowercase `<family>:<name>` string, e.g. `"tron:nile"`
    raw: String,
}

impl NetworkId {
    /// Parses and lowercases a network identifier.
    pub fn parse(s: &str) -> Self {
        NetworkId {
            raw: s.to_ascii_lowercase(),
        }
    }

    /// The raw `<family>:<name>` string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The family segment before the `:`.
    pub fn family_str(&self) -> &str {
        self.raw.split(':').next().unwrap_or(&self.raw)
    }

    /// True if `pattern` (which may end in `:*`) matches this identifier.
    /// Used only by the client-side mechanism registry (spec §4.6).
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        if let Some(family) = pattern.strip_suffix(":*") {
            self.family_str() == family
        } else {
            self.raw == pattern.to_ascii_lowercase()
        }
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Per-network configuration: chain id, deployed engine contract address,
/// address family, and an optional RPC endpoint override.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// numeric chain id used inside the EIP-712 domain
    pub chain_id: u64,
    /// deployed `PaymentPermit` engine contract address (family-display form)
    pub engine_contract: String,
    /// address family this network belongs to
    pub family: Family,
    /// optional RPC endpoint (families with heterogeneous node providers)
    pub rpc_url: Option<String>,
}

fn static_table() -> &'static HashMap<&'static str, ChainConfig> {
    static TABLE: OnceLock<HashMap<&'static str, ChainConfig>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(
            "tron:nile",
            ChainConfig {
                chain_id: 3448148188,
                engine_contract: "TEdvoHEatmDKvTh3o9vBRB9Vdtbhn4QFhy".to_string(),
                family: Family::Tron,
                rpc_url: Some("https://nile.trongrid.io".to_string()),
            },
        );
        m.insert(
            "tron:mainnet",
            ChainConfig {
                chain_id: 728126428,
                engine_contract: "TEdvoHEatmDKvTh3o9vBRB9Vdtbhn4QFhy".to_string(),
                family: Family::Tron,
                rpc_url: Some("https://api.trongrid.io".to_string()),
            },
        );
        m.insert(
            "eip155:8453",
            ChainConfig {
                chain_id: 8453,
                engine_contract: "0x0000000000000000000000000000000000000001".to_string(),
                family: Family::Evm,
                rpc_url: Some("https://mainnet.base.org".to_string()),
            },
        );
        m.insert(
            "eip155:84532",
            ChainConfig {
                chain_id: 84532,
                engine_contract: "0x0000000000000000000000000000000000000002".to_string(),
                family: Family::Evm,
                rpc_url: Some("https://sepolia.base.org".to_string()),
            },
        );
        m
    })
}

/// Chain configuration registry, a thin wrapper over the static table that
/// also supports the `MERCHANT_CONTRACT_ADDRESS` per-family override from
/// spec §6.
#[derive(Debug, Default, Clone)]
pub struct ChainRegistry {
    overrides: HashMap<String, String>,
}

impl ChainRegistry {
    /// An empty registry with no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `MERCHANT_CONTRACT_ADDRESS` override for a given network.
    pub fn with_contract_override(mut self, network: &str, address: impl Into<String>) -> Self {
        self.overrides
            .insert(network.to_ascii_lowercase(), address.into());
        self
    }

    /// Looks up the configuration for `network`, applying any override.
    pub fn get(&self, network: &NetworkId) -> Result<ChainConfig> {
        let base = static_table()
            .get(network.as_str())
            .cloned()
            .ok_or_else(|| EngineError::UnsupportedNetwork(network.to_string()))?;
        if let Some(contract) = self.overrides.get(network.as_str()) {
            Ok(ChainConfig {
                engine_contract: contract.clone(),
                ..base
            })
        } else {
            Ok(base)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lowercases() {
        let n = NetworkId::parse("TRON:NILE");
        assert_eq!(n.as_str(), "tron:nile");
        assert_eq!(n.family_str(), "tron");
    }

    #[test]
    fn test_wildcard_pattern_matches_family() {
        let n = NetworkId::parse("tron:nile");
        assert!(n.matches_pattern("tron:*"));
        assert!(!n.matches_pattern("eip155:*"));
        assert!(n.matches_pattern("tron:nile"));
    }

    #[test]
    fn test_lookup_known_network() {
        let registry = ChainRegistry::new();
        let cfg = registry.get(&NetworkId::parse("tron:nile")).unwrap();
        assert_eq!(cfg.chain_id, 3448148188);
        assert!(matches!(cfg.family, Family::Tron));
    }

    #[test]
    fn test_unknown_network_fails() {
        let registry = ChainRegistry::new();
        let err = registry.get(&NetworkId::parse("solana:mainnet")).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedNetwork(_)));
    }

    #[test]
    fn test_contract_override() {
        let registry =
            ChainRegistry::new().with_contract_override("tron:nile", "TOverrideAddr111111111111");
        let cfg = registry.get(&NetworkId::parse("tron:nile")).unwrap();
        assert_eq!(cfg.engine_contract, "TOverrideAddr111111111111");
    }
}
