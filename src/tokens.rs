//! Static token registry (spec §4.9, supplemented from
//! `TokenRegistry`-shaped lookups in `original_source`'s facilitator
//! construction, which validates `base_fee`/`allowed_tokens` against a
//! known token table rather than accepting arbitrary addresses blind).

use std::collections::HashMap;
use std::sync::OnceLock;

/// A known token's on-chain identity and display metadata.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    /// ticker symbol, e.g. `"USDT"`
    pub symbol: &'static str,
    /// network this entry applies to, e.g. `"tron:nile"`
    pub network: &'static str,
    /// token contract address, in the network family's display form
    pub address: &'static str,
    /// number of decimals
    pub decimals: u8,
    /// EIP-712 domain name for the transfer-authorization scheme
    pub eip712_name: &'static str,
    /// EIP-712 domain version for the transfer-authorization scheme
    pub eip712_version: &'static str,
}

fn table() -> &'static Vec<TokenInfo> {
    static TABLE: OnceLock<Vec<TokenInfo>> = OnceLock::new();
    TABLE.get_or_init(|| {
        vec![
            TokenInfo {
                symbol: "USDT",
                network: "tron:nile",
                address: "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf",
                decimals: 6,
                eip712_name: "Tether USD",
                eip712_version: "1",
            },
            TokenInfo {
                symbol: "USDT",
                network: "tron:mainnet",
                address: "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf",
                decimals: 6,
                eip712_name: "Tether USD",
                eip712_version: "1",
            },
            TokenInfo {
                symbol: "USDC",
                network: "eip155:8453",
                address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                decimals: 6,
                eip712_name: "USD Coin",
                eip712_version: "2",
            },
            TokenInfo {
                symbol: "USDC",
                network: "eip155:84532",
                address: "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
                decimals: 6,
                eip712_name: "USD Coin",
                eip712_version: "2",
            },
        ]
    })
}

/// Lookup surface over the static token table.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenRegistry;

impl TokenRegistry {
    /// Finds a token by `(network, symbol)`, case-insensitive on the symbol.
    pub fn find_by_symbol(&self, network: &str, symbol: &str) -> Option<&'static TokenInfo> {
        table()
            .iter()
            .find(|t| t.network == network && t.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Finds a token by `(network, address)`, case-insensitive on the address
    /// (hex-20 addresses are not case sensitive for identity; Base58-TRON
    /// addresses are compared verbatim since case carries checksum meaning).
    pub fn find_by_address(&self, network: &str, address: &str) -> Option<&'static TokenInfo> {
        table().iter().find(|t| {
            t.network == network
                && (t.address.eq_ignore_ascii_case(address) || t.address == address)
        })
    }

    /// All symbols known for a given network.
    pub fn all_symbols(&self, network: &str) -> Vec<&'static str> {
        table()
            .iter()
            .filter(|t| t.network == network)
            .map(|t| t.symbol)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_by_symbol() {
        let registry = TokenRegistry;
        let token = registry.find_by_symbol("tron:nile", "usdt").unwrap();
        assert_eq!(token.decimals, 6);
        assert_eq!(token.address, "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf");
    }

    #[test]
    fn test_find_by_address() {
        let registry = TokenRegistry;
        let token = registry
            .find_by_address("eip155:8453", "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913")
            .unwrap();
        assert_eq!(token.symbol, "USDC");
    }

    #[test]
    fn test_unknown_token_returns_none() {
        let registry = TokenRegistry;
        assert!(registry.find_by_symbol("tron:nile", "DOGE").is_none());
    }

    #[test]
    fn test_all_symbols_scoped_to_network() {
        let registry = TokenRegistry;
        let symbols = registry.all_symbols("tron:nile");
        assert_eq!(symbols, vec!["USDT"]);
    }
}
