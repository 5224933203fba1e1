//! Example x402 facilitator service.
//!
//! A facilitator holds a signing key with on-chain gas, verifies EIP-712
//! signatures, and broadcasts settlement transactions.
//!
//! Run with:
//! ```bash
//! cargo run --example facilitator
//! ```
//!
//! Environment variables: see [`x402_tron::config::FacilitatorConfig`] --
//! `FACILITATOR_PRIVATE_KEY`, `FACILITATOR_FEE_TO`, `FACILITATOR_BASE_FEE`,
//! `FACILITATOR_ALLOWED_TOKENS`, `MERCHANT_CONTRACT_ADDRESS_<NETWORK>`, plus
//! `PORT` (default 3001).

use std::sync::Arc;
use x402_tron::config::FacilitatorConfig;
use x402_tron::facilitator::Facilitator;
use x402_tron::facilitator_http::routes;
use x402_tron::post_verify::EvmChainSettler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    x402_tron::telemetry::init();

    let env_config = FacilitatorConfig::from_env()?;
    let chain_registry = env_config.chain_registry();

    // EvmChainSettler only understands the hex-20/EVM address family; TRON
    // needs its own ChainSettler wired in before "tron:nile" can be listed
    // here safely (spec §9 resolution).
    let settler = Arc::new(EvmChainSettler::new(&env_config.private_key, chain_registry)?);
    let supported_networks = vec!["eip155:8453".to_string(), "eip155:84532".to_string()];

    let facilitator = Arc::new(Facilitator::new(&env_config, settler, supported_networks)?);

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3001".to_string())
        .parse()?;
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(%addr, "facilitator listening");
    axum::serve(listener, routes(facilitator)).await?;

    Ok(())
}
