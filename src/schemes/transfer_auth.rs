//! `exact` scheme: payer signs an EIP-3009 `TransferWithAuthorization` and
//! the facilitator submits it directly to the token contract (spec §4.3/§4.4).
//!
//! Grounded on the teacher's `schemes/exact_evm.rs` (manual `encodeType`
//! construction kept, generalized through [`crate::eip712`]) and
//! `original_source`'s `_exact_base/types.py` (domain shape with `version`,
//! `create_nonce`/`create_validity_window` defaults).

use super::{ChainSettler, ClientScheme, FacilitatorContext, FacilitatorScheme};
use crate::address::Address as ChainAddress;
use crate::chain_config::ChainRegistry;
use crate::eip712::{normalize_recovery_id, Domain, StructType, TypeSet, Value};
use crate::errors::{EngineError, Result, VerifyFailure};
use crate::types::{
    PaymentPayload, PaymentPayloadData, PaymentPermitContext, PaymentRequirements, SettleResponse,
    TransferAuthorization, VerifyResponse, X402_VERSION,
};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address as EthAddress, Signature, U256};
use rand::RngCore;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wire scheme name for the transfer-authorization mechanism.
pub const SCHEME_NAME: &str = "exact";

/// Clock-skew tolerance subtracted from `validAfter` (spec §4.3).
const VALIDITY_SKEW_SECONDS: u64 = 30;
/// Default authorization lifetime when requirements don't specify one.
const DEFAULT_VALIDITY_SECONDS: u64 = 3600;

fn transfer_auth_type_set() -> TypeSet {
    TypeSet::new(vec![StructType {
        name: "TransferWithAuthorization",
        fields: vec![
            ("from", "address"),
            ("to", "address"),
            ("value", "uint256"),
            ("validAfter", "uint256"),
            ("validBefore", "uint256"),
            ("nonce", "bytes32"),
        ],
    }])
}

fn to_eth_address(input: &str) -> Result<EthAddress> {
    Ok(ChainAddress::from_str(input)?.to_ethers_address())
}

fn transfer_auth_message(auth: &TransferAuthorization) -> Result<Vec<(&'static str, Value)>> {
    let value = U256::from_dec_str(&auth.value)
        .map_err(|_| EngineError::InvalidAmount(auth.value.clone()))?;
    let valid_after = U256::from_dec_str(&auth.valid_after)
        .map_err(|_| EngineError::InvalidAmount(auth.valid_after.clone()))?;
    let valid_before = U256::from_dec_str(&auth.valid_before)
        .map_err(|_| EngineError::InvalidAmount(auth.valid_before.clone()))?;
    let nonce_bytes = hex::decode(auth.nonce.trim_start_matches("0x"))
        .map_err(|e| EngineError::InvalidPayload(format!("nonce: {e}")))?;

    Ok(vec![
        ("from", Value::Address(to_eth_address(&auth.from_address)?)),
        ("to", Value::Address(to_eth_address(&auth.to)?)),
        ("value", Value::Uint(value)),
        ("validAfter", Value::Uint(valid_after)),
        ("validBefore", Value::Uint(valid_before)),
        ("nonce", Value::FixedBytes(nonce_bytes)),
    ])
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

fn domain_for(
    requirements: &PaymentRequirements,
    chain_registry: &ChainRegistry,
) -> Result<Domain> {
    let network = crate::chain_config::NetworkId::parse(&requirements.network);
    let chain = chain_registry.get(&network)?;
    let extra = requirements.extra.as_ref();
    let name = extra
        .and_then(|e| e.name.clone())
        .ok_or_else(|| EngineError::MissingField("extra.name".to_string()))?;
    let version = extra
        .and_then(|e| e.version.clone())
        .ok_or_else(|| EngineError::MissingField("extra.version".to_string()))?;
    let asset = ChainAddress::from_str(&requirements.asset)?;

    Ok(Domain {
        name,
        version: Some(version),
        chain_id: U256::from(chain.chain_id),
        verifying_contract: asset.to_ethers_address(),
        salt: None,
    })
}

fn parse_signature(signature: &str) -> Result<Signature> {
    let bytes = hex::decode(signature.trim_start_matches("0x"))
        .map_err(|e| EngineError::SignatureVerification(format!("{e}")))?;
    if bytes.len() != 65 {
        return Err(EngineError::SignatureVerification(format!(
            "expected 65-byte signature, got {}",
            bytes.len()
        )));
    }
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[0..32]);
    s.copy_from_slice(&bytes[32..64]);
    let v = normalize_recovery_id(bytes[64]);
    Ok(Signature {
        r: U256::from_big_endian(&r),
        s: U256::from_big_endian(&s),
        v: v as u64,
    })
}

fn validate_auth(
    auth: &TransferAuthorization,
    requirements: &PaymentRequirements,
    ctx: &FacilitatorContext,
) -> std::result::Result<(), VerifyFailure> {
    let normalize = |s: &str| -> String {
        ChainAddress::from_str(s)
            .map(|a| a.to_signing_address())
            .unwrap_or_else(|_| s.to_ascii_lowercase())
    };

    if let Some(allowed) = &ctx.allowed_tokens {
        let normalized_allowed: std::collections::HashSet<String> =
            allowed.iter().map(|a| normalize(a)).collect();
        if !normalized_allowed.contains(&normalize(&requirements.asset)) {
            return Err(VerifyFailure::TokenNotAllowed);
        }
    }

    let value: u128 = auth.value.parse().map_err(|_| VerifyFailure::AmountMismatch)?;
    let required: u128 = requirements
        .amount
        .parse()
        .map_err(|_| VerifyFailure::AmountMismatch)?;
    if value < required {
        return Err(VerifyFailure::AmountMismatch);
    }

    if normalize(&auth.to) != normalize(&requirements.pay_to) {
        return Err(VerifyFailure::PayToMismatch);
    }

    let now = now_unix();
    let valid_before: u64 = auth.valid_before.parse().unwrap_or(0);
    let valid_after: u64 = auth.valid_after.parse().unwrap_or(0);
    if valid_before < now {
        return Err(VerifyFailure::Expired);
    }
    if valid_after > now {
        return Err(VerifyFailure::NotYetValid);
    }

    Ok(())
}

/// `exact` (transfer-authorization) scheme mechanism.
pub struct ExactTransferAuth;

impl ExactTransferAuth {
    /// New instance.
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExactTransferAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FacilitatorScheme for ExactTransferAuth {
    fn name(&self) -> &str {
        SCHEME_NAME
    }

    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        ctx: &FacilitatorContext,
    ) -> Result<VerifyResponse> {
        let Some(auth) = payload.payload.transfer_authorization.as_ref() else {
            return Ok(VerifyResponse::failure(VerifyFailure::MissingPermit));
        };

        if let Err(reason) = validate_auth(auth, requirements, ctx) {
            return Ok(VerifyResponse::failure(reason));
        }

        let domain = domain_for(requirements, &ctx.chain_registry)?;
        let types = transfer_auth_type_set();
        let message = transfer_auth_message(auth)?;
        let digest =
            crate::eip712::signable_digest(&domain, &types, "TransferWithAuthorization", &message)?;
        let sig = parse_signature(&payload.payload.signature)?;
        let recovered = crate::eip712::recover_signer(digest, &sig)?;
        let from = to_eth_address(&auth.from_address)?;
        if recovered != from {
            return Ok(VerifyResponse::failure(VerifyFailure::InvalidSignature));
        }

        Ok(VerifyResponse::ok())
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        ctx: &FacilitatorContext,
        settler: &dyn ChainSettler,
    ) -> Result<SettleResponse> {
        let verify_result = self.verify(payload, requirements, ctx).await?;
        if !verify_result.is_valid {
            return Ok(SettleResponse {
                success: false,
                transaction: None,
                network: Some(requirements.network.clone()),
                error_reason: verify_result.invalid_reason,
            });
        }

        let auth = payload
            .payload
            .transfer_authorization
            .as_ref()
            .expect("verify already checked auth is present");

        let tx_hash = settler
            .settle_transfer_auth(auth, &payload.payload.signature, requirements)
            .await?;

        let Some(tx_hash) = tx_hash else {
            return Ok(SettleResponse {
                success: false,
                transaction: None,
                network: Some(requirements.network.clone()),
                error_reason: Some("transaction_failed".to_string()),
            });
        };

        let receipt = settler.wait_for_receipt(&tx_hash, &requirements.network).await?;
        if !receipt.success {
            return Ok(SettleResponse {
                success: false,
                transaction: Some(tx_hash),
                network: Some(requirements.network.clone()),
                error_reason: Some("transaction_failed_on_chain".to_string()),
            });
        }

        if let Err(e) =
            crate::schemes::reconcile_transfer(&receipt, &requirements.asset, &auth.to, &auth.value)
        {
            tracing::error!(error = %e, "settlement receipt did not reconcile against transfer authorization");
            return Ok(SettleResponse {
                success: false,
                transaction: Some(tx_hash),
                network: Some(requirements.network.clone()),
                error_reason: Some("settlement_mismatch".to_string()),
            });
        }

        Ok(SettleResponse {
            success: true,
            transaction: Some(tx_hash),
            network: Some(requirements.network.clone()),
            error_reason: None,
        })
    }
}

#[async_trait]
impl ClientScheme for ExactTransferAuth {
    fn name(&self) -> &str {
        SCHEME_NAME
    }

    async fn generate_payload(
        &self,
        requirements: &PaymentRequirements,
        _permit_context: Option<&PaymentPermitContext>,
        signer: &LocalWallet,
        chain_registry: &ChainRegistry,
    ) -> Result<PaymentPayload> {
        let now = now_unix();
        let mut nonce_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let auth = TransferAuthorization {
            from_address: format!("{:?}", signer.address()),
            to: requirements.pay_to.clone(),
            value: requirements.amount.clone(),
            valid_after: now.saturating_sub(VALIDITY_SKEW_SECONDS).to_string(),
            valid_before: (now + requirements.max_timeout_seconds.unwrap_or(DEFAULT_VALIDITY_SECONDS))
                .to_string(),
            nonce: format!("0x{}", hex::encode(nonce_bytes)),
        };

        let domain = domain_for(requirements, chain_registry)?;
        let types = transfer_auth_type_set();
        let message = transfer_auth_message(&auth)?;
        let digest =
            crate::eip712::signable_digest(&domain, &types, "TransferWithAuthorization", &message)?;
        let signature = signer
            .sign_hash(digest)
            .map_err(|e| EngineError::SignatureCreation(e.to_string()))?;
        let mut r_bytes = [0u8; 32];
        signature.r.to_big_endian(&mut r_bytes);
        let mut s_bytes = [0u8; 32];
        signature.s.to_big_endian(&mut s_bytes);
        let mut sig_bytes = Vec::with_capacity(65);
        sig_bytes.extend_from_slice(&r_bytes);
        sig_bytes.extend_from_slice(&s_bytes);
        sig_bytes.push(signature.v as u8);

        Ok(PaymentPayload {
            x402_version: X402_VERSION,
            resource: None,
            accepted: requirements.clone(),
            payload: PaymentPayloadData {
                signature: format!("0x{}", hex::encode(sig_bytes)),
                merchant_signature: None,
                payment_permit: None,
                transfer_authorization: Some(auth),
            },
            extensions: None,
        })
    }
}
