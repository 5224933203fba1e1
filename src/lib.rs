//! # x402-tron
//!
//! An HTTP 402 "Payment Required" payment protocol engine: a client signs a
//! structured permit authorizing a bounded stablecoin transfer, a
//! facilitator verifies the EIP-712 signature and executes the on-chain
//! settlement, and a resource server releases content once settlement
//! succeeds. Two address families (20-byte hex/EVM-shaped, and TRON's
//! Base58Check) and two payment schemes (a dedicated permit/escrow contract,
//! and EIP-3009-style transfer authorizations) are supported side by side.
//!
//! ## Quick Start
//!
//! ### Client Example
//!
//! ```rust,no_run
//! use x402_tron::client::{get, X402ClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = X402ClientConfig::new("0xYOUR_PRIVATE_KEY");
//! let response = get(&config, "https://api.example.com/weather").await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! ### Server Example
//!
//! ```rust,no_run
//! use x402_tron::server::RouteConfig;
//!
//! let route = RouteConfig::new(
//!     "TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV",
//!     vec!["tron:nile".to_string()],
//!     "0.05 USDT",
//!     "API access fee",
//! );
//! ```
//!
//! ## Protocol Overview
//!
//! 1. **Client requests resource**: standard HTTP request.
//! 2. **Server responds with 402**: payment options, priced and fee-quoted
//!    live against the facilitator.
//! 3. **Client signs a payload**: EIP-712 permit or transfer authorization.
//! 4. **Client retries with `PAYMENT-SIGNATURE`**: the signed payload, Base64/JSON.
//! 5. **Server verifies and settles**: via the facilitator's `/verify` and
//!    `/settle`.
//! 6. **Server responds with the resource**: plus a `PAYMENT-RESPONSE`
//!    settlement receipt.
//!
//! ## Payment Schemes
//!
//! - `exact_permit`: a dedicated engine contract's `permitTransferFrom`,
//!   splitting payment and facilitator fee in one call.
//! - `exact`: the token's own EIP-3009 `transferWithAuthorization`, no
//!   intermediary contract required.
//!
//! ## Security
//!
//! - **Trust-minimized**: payers sign bounded authorizations; the
//!   facilitator cannot move funds beyond what was signed.
//! - **Replay protection**: payment-id/nonce pairs are tracked and the
//!   underlying contracts enforce on-chain nonce uniqueness.
//! - **Time-bounded**: every signed payload carries a validity window.
//! - **Stable failure reasons**: verification failures surface one of a
//!   closed set of reason tags, checked in a fixed priority order.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod address;
pub mod chain_config;
pub mod client;
pub mod config;
pub mod eip712;
pub mod errors;
pub mod facilitator;
pub mod facilitator_http;
pub mod post_verify;
pub mod schemes;
pub mod server;
pub mod telemetry;
pub mod tokens;
pub mod types;
pub mod utils;

pub use address::Address;
pub use chain_config::{ChainConfig, ChainRegistry, NetworkId};
pub use errors::{EngineError, Result, VerifyFailure};
pub use types::{
    PaymentPayload, PaymentRequired, PaymentRequirements, SettleResponse, SupportedKind,
    SupportedResponse, VerifyResponse, X402_VERSION,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert_eq!(X402_VERSION, 2);
    }

    #[test]
    fn test_module_accessibility() {
        let _ = client::X402ClientConfig::new("0xabc");
        let _ = server::RouteConfig::new(
            "TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV",
            vec!["tron:nile".to_string()],
            "0.05 USDT",
            "desc",
        );
        let _ = chain_config::ChainRegistry::new();
    }
}
