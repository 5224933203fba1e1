//! Payment scheme implementations (spec §4.3/§4.4).
//!
//! Both schemes share one verification/settlement shape but differ in the
//! EIP-712 struct they sign and the on-chain call they settle through:
//! `permit` drives a dedicated escrow contract's `permitTransferFrom`,
//! `transfer_auth` drives the token's own EIP-3009 `transferWithAuthorization`.

pub mod permit;
pub mod transfer_auth;

use crate::errors::Result;
use crate::types::{PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse};
use async_trait::async_trait;

/// Everything a facilitator-side scheme mechanism needs that isn't carried
/// in the payload or requirements themselves (spec §4.4).
pub struct FacilitatorContext {
    /// facilitator's fee recipient address (display form for the chain family)
    pub fee_to: String,
    /// address allowed to submit the permit on-chain (the facilitator's own signer)
    pub caller: String,
    /// symbol -> flat base fee amount (decimal-string `uint256`), spec §4.9
    pub base_fee: std::collections::HashMap<String, String>,
    /// optional whitelist of accepted asset addresses; `None` means no restriction
    pub allowed_tokens: Option<std::collections::HashSet<String>>,
    /// chain registry used to resolve chain id / engine contract for signature checks
    pub chain_registry: crate::chain_config::ChainRegistry,
}

/// Broadcasts a verified payment on-chain. One implementation per address
/// family, injected by the facilitator at construction time (spec §4.7, §9).
#[async_trait]
pub trait ChainSettler: Send + Sync {
    /// Submits a verified permit to the engine contract, returning the
    /// broadcast transaction hash, or `Ok(None)` if broadcast itself failed.
    async fn settle_permit(
        &self,
        permit: &crate::types::PaymentPermit,
        signature: &str,
        requirements: &PaymentRequirements,
    ) -> Result<Option<String>>;

    /// Submits a verified transfer authorization to the token contract.
    async fn settle_transfer_auth(
        &self,
        auth: &crate::types::TransferAuthorization,
        signature: &str,
        requirements: &PaymentRequirements,
    ) -> Result<Option<String>>;

    /// Polls until the transaction is included, returning its on-chain status.
    async fn wait_for_receipt(&self, tx_hash: &str, network: &str) -> Result<TransactionReceipt>;
}

/// Minimal on-chain receipt shape settlement needs to check.
#[derive(Debug, Clone)]
pub struct TransactionReceipt {
    /// transaction hash
    pub hash: String,
    /// block number, if known
    pub block_number: Option<u64>,
    /// true if the transaction succeeded on-chain
    pub success: bool,
    /// `Transfer` event logs emitted by the transaction, for post-verification
    /// reconciliation against the quoted requirement (spec §4.7)
    pub logs: Vec<TransferLog>,
}

/// One decoded ERC-20-shaped `Transfer(address,address,uint256)` log entry.
#[derive(Debug, Clone)]
pub struct TransferLog {
    /// the token contract that emitted this log, hex-20 signing form
    pub token: String,
    /// sender, hex-20 signing form
    pub from: String,
    /// recipient, hex-20 signing form
    pub to: String,
    /// transferred amount, decimal-string `uint256`
    pub value: String,
}

/// Checks that `receipt.logs` contains a transfer of at least `amount` of
/// `asset` to `to` (spec §4.7: reconcile settlement against the quoted
/// requirement, not just "the transaction didn't revert").
pub fn reconcile_transfer(
    receipt: &TransactionReceipt,
    asset: &str,
    to: &str,
    amount: &str,
) -> Result<()> {
    use crate::address::Address;
    use std::str::FromStr;

    let asset = Address::from_str(asset)?.to_signing_address();
    let to = Address::from_str(to)?.to_signing_address();
    let required = crate::utils::string_to_u256(amount)?;

    let matched = receipt.logs.iter().any(|log| {
        log.token.eq_ignore_ascii_case(&asset)
            && log.to.eq_ignore_ascii_case(&to)
            && crate::utils::string_to_u256(&log.value)
                .map(|v| v >= required)
                .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(crate::errors::EngineError::SettlementMismatch(format!(
            "no transfer log of asset {asset} paying {to} at least {amount}"
        )))
    }
}

/// Facilitator-side scheme mechanism: verify and settle a payload against
/// requirements (spec §4.4).
#[async_trait]
pub trait FacilitatorScheme: Send + Sync {
    /// the wire scheme name, e.g. `"exact_permit"`
    fn name(&self) -> &str;

    /// Checks the payload against requirements and the buyer's signature,
    /// without touching the chain.
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        ctx: &FacilitatorContext,
    ) -> Result<VerifyResponse>;

    /// Re-verifies, then submits and confirms the on-chain settlement.
    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        ctx: &FacilitatorContext,
        settler: &dyn ChainSettler,
    ) -> Result<SettleResponse>;
}

/// Client-side scheme mechanism: build a signed payload from requirements
/// (spec §4.3).
#[async_trait]
pub trait ClientScheme: Send + Sync {
    /// the wire scheme name
    fn name(&self) -> &str;

    /// Signs and builds a `PaymentPayload` satisfying `requirements`.
    async fn generate_payload(
        &self,
        requirements: &PaymentRequirements,
        permit_context: Option<&crate::types::PaymentPermitContext>,
        signer: &ethers::signers::LocalWallet,
        chain_registry: &crate::chain_config::ChainRegistry,
    ) -> Result<PaymentPayload>;
}
