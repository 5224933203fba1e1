//! `exact_permit` scheme: payer signs a `PaymentPermit`, the facilitator's
//! own signer submits it to a dedicated engine contract (spec §4.3/§4.4).
//!
//! Grounded on `_exact_permit_base/facilitator.py`'s
//! `BaseExactPermitFacilitatorMechanism`: `_validate_permit`'s check order
//! is reproduced exactly since it is part of the wire contract (spec §7).

use super::{ChainSettler, ClientScheme, FacilitatorContext, FacilitatorScheme};
use crate::address::Address as ChainAddress;
use crate::chain_config::ChainRegistry;
use crate::eip712::{normalize_recovery_id, Domain, StructType, TypeSet, Value};
use crate::errors::{EngineError, Result, VerifyFailure};
use crate::tokens::TokenRegistry;
use crate::types::{
    DeliveryKind, Fee, FeeInfo, Payment, PaymentPayload, PaymentPayloadData, PaymentPermit,
    PaymentPermitContext, PaymentRequirements, PermitMeta, SettleResponse, VerifyResponse,
    X402_VERSION,
};
use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address as EthAddress, Signature, U256};
use rand::RngCore;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

abigen!(
    Erc20Allowance,
    r#"[
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 value) external returns (bool)
    ]"#
);

/// Wire scheme name for the permit mechanism.
pub const SCHEME_NAME: &str = "exact_permit";

/// EIP-712 domain name used for every `PaymentPermit` signature (spec §4.2):
/// a fixed contract name, not the token's own name/version.
const DOMAIN_NAME: &str = "PaymentPermit";

fn permit_type_set() -> TypeSet {
    TypeSet::new(vec![
        StructType {
            name: "Fee",
            fields: vec![("feeTo", "address"), ("feeAmount", "uint256")],
        },
        StructType {
            name: "Payment",
            fields: vec![
                ("payToken", "address"),
                ("payAmount", "uint256"),
                ("payTo", "address"),
            ],
        },
        StructType {
            name: "PermitMeta",
            fields: vec![
                ("kind", "uint8"),
                ("paymentId", "bytes16"),
                ("nonce", "uint256"),
                ("validAfter", "uint256"),
                ("validBefore", "uint256"),
            ],
        },
        StructType {
            name: "PaymentPermitDetails",
            fields: vec![
                ("meta", "PermitMeta"),
                ("buyer", "address"),
                ("caller", "address"),
                ("payment", "Payment"),
                ("fee", "Fee"),
            ],
        },
    ])
}

fn permit_message(permit: &PaymentPermit) -> Result<Vec<(&'static str, Value)>> {
    let meta = &permit.meta;
    let payment_id_bytes = hex::decode(meta.payment_id.trim_start_matches("0x"))
        .map_err(|e| EngineError::InvalidPayload(format!("paymentId: {e}")))?;
    let nonce = U256::from_dec_str(&meta.nonce)
        .map_err(|e| EngineError::InvalidPayload(format!("nonce: {e}")))?;
    let pay_amount = U256::from_dec_str(&permit.payment.pay_amount)
        .map_err(|e| EngineError::InvalidAmount(permit.payment.pay_amount.clone()))?;
    let fee_amount = U256::from_dec_str(&permit.fee.fee_amount)
        .map_err(|e| EngineError::InvalidAmount(permit.fee.fee_amount.clone()))?;

    let meta_value = Value::Struct(
        "PermitMeta",
        vec![
            ("kind", Value::Uint(U256::from(meta.kind.as_u8()))),
            ("paymentId", Value::FixedBytes(payment_id_bytes)),
            ("nonce", Value::Uint(nonce)),
            ("validAfter", Value::Uint(U256::from(meta.valid_after))),
            ("validBefore", Value::Uint(U256::from(meta.valid_before))),
        ],
    );
    let payment_value = Value::Struct(
        "Payment",
        vec![
            ("payToken", Value::Address(to_eth_address(&permit.payment.pay_token)?)),
            ("payAmount", Value::Uint(pay_amount)),
            ("payTo", Value::Address(to_eth_address(&permit.payment.pay_to)?)),
        ],
    );
    let fee_value = Value::Struct(
        "Fee",
        vec![
            ("feeTo", Value::Address(to_eth_address(&permit.fee.fee_to)?)),
            ("feeAmount", Value::Uint(fee_amount)),
        ],
    );

    Ok(vec![
        ("meta", meta_value),
        ("buyer", Value::Address(to_eth_address(&permit.buyer)?)),
        ("caller", Value::Address(to_eth_address(&permit.caller)?)),
        ("payment", payment_value),
        ("fee", fee_value),
    ])
}

/// Parses any accepted address form and projects it to its hex-20 signing
/// address (spec §4.1: addresses always enter EIP-712 messages as hex-20).
fn to_eth_address(input: &str) -> Result<EthAddress> {
    let addr = ChainAddress::from_str(input)?;
    Ok(addr.to_ethers_address())
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

/// Validates `permit` against `requirements` and the facilitator's own
/// configuration, in the exact order required by spec §4.4/§7.
fn validate_permit(
    permit: &PaymentPermit,
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
        if !normalized_allowed.contains(&normalize(&permit.payment.pay_token)) {
            return Err(VerifyFailure::TokenNotAllowed);
        }
    }

    let pay_amount: u128 = permit
        .payment
        .pay_amount
        .parse()
        .map_err(|_| VerifyFailure::AmountMismatch)?;
    let required_amount: u128 = requirements
        .amount
        .parse()
        .map_err(|_| VerifyFailure::AmountMismatch)?;
    if pay_amount < required_amount {
        return Err(VerifyFailure::AmountMismatch);
    }

    if normalize(&permit.payment.pay_to) != normalize(&requirements.pay_to) {
        return Err(VerifyFailure::PayToMismatch);
    }

    if normalize(&permit.payment.pay_token) != normalize(&requirements.asset) {
        return Err(VerifyFailure::TokenMismatch);
    }

    if normalize(&permit.fee.fee_to) != normalize(&ctx.fee_to) {
        return Err(VerifyFailure::FeeToMismatch);
    }

    let token_registry = TokenRegistry;
    let token_info = token_registry
        .find_by_address(&requirements.network, &permit.payment.pay_token)
        .ok_or(VerifyFailure::UnsupportedToken)?;
    let expected_fee: u128 = ctx
        .base_fee
        .get(token_info.symbol)
        .and_then(|s| s.parse().ok())
        .ok_or(VerifyFailure::UnsupportedToken)?;
    let fee_amount: u128 = permit
        .fee
        .fee_amount
        .parse()
        .map_err(|_| VerifyFailure::FeeAmountMismatch)?;
    if fee_amount < expected_fee {
        return Err(VerifyFailure::FeeAmountMismatch);
    }

    let now = now_unix();
    if permit.meta.valid_before < now {
        return Err(VerifyFailure::Expired);
    }
    if permit.meta.valid_after > now {
        return Err(VerifyFailure::NotYetValid);
    }

    Ok(())
}

/// `exact_permit` scheme mechanism.
pub struct ExactPermit;

impl ExactPermit {
    /// New instance.
    pub fn new() -> Self {
        Self
    }

    fn verify_signature(
        permit: &PaymentPermit,
        signature: &str,
        requirements: &PaymentRequirements,
        chain_registry: &ChainRegistry,
    ) -> Result<bool> {
        let network = crate::chain_config::NetworkId::parse(&requirements.network);
        let chain = chain_registry.get(&network)?;
        let engine_contract = ChainAddress::from_str(&chain.engine_contract)?;

        let domain = Domain {
            name: DOMAIN_NAME.to_string(),
            version: None,
            chain_id: U256::from(chain.chain_id),
            verifying_contract: engine_contract.to_ethers_address(),
            salt: None,
        };
        let types = permit_type_set();
        let message = permit_message(permit)?;
        let digest = crate::eip712::signable_digest(&domain, &types, "PaymentPermitDetails", &message)?;

        let sig = parse_signature(signature)?;
        let recovered = crate::eip712::recover_signer(digest, &sig)?;
        let buyer = to_eth_address(&permit.buyer)?;
        Ok(recovered == buyer)
    }
}

impl Default for ExactPermit {
    fn default() -> Self {
        Self::new()
    }
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

#[async_trait]
impl FacilitatorScheme for ExactPermit {
    fn name(&self) -> &str {
        SCHEME_NAME
    }

    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        ctx: &FacilitatorContext,
    ) -> Result<VerifyResponse> {
        let Some(permit) = payload.payload.payment_permit.as_ref() else {
            return Ok(VerifyResponse::failure(VerifyFailure::MissingPermit));
        };

        if let Err(reason) = validate_permit(permit, requirements, ctx) {
            return Ok(VerifyResponse::failure(reason));
        }

        let signature_ok = Self::verify_signature(
            permit,
            &payload.payload.signature,
            requirements,
            &ctx.chain_registry,
        )?;
        if !signature_ok {
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

        let permit = payload
            .payload
            .payment_permit
            .as_ref()
            .expect("verify already checked permit is present");

        let tx_hash = settler
            .settle_permit(permit, &payload.payload.signature, requirements)
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

        if let Err(e) = crate::schemes::reconcile_transfer(
            &receipt,
            &permit.payment.pay_token,
            &permit.payment.pay_to,
            &permit.payment.pay_amount,
        ) {
            tracing::error!(error = %e, "settlement receipt did not reconcile against payment");
            return Ok(SettleResponse {
                success: false,
                transaction: Some(tx_hash),
                network: Some(requirements.network.clone()),
                error_reason: Some("settlement_mismatch".to_string()),
            });
        }

        if permit.fee.fee_amount != "0" {
            if let Err(e) = crate::schemes::reconcile_transfer(
                &receipt,
                &permit.payment.pay_token,
                &permit.fee.fee_to,
                &permit.fee.fee_amount,
            ) {
                tracing::error!(error = %e, "settlement receipt did not reconcile against facilitator fee");
                return Ok(SettleResponse {
                    success: false,
                    transaction: Some(tx_hash),
                    network: Some(requirements.network.clone()),
                    error_reason: Some("settlement_mismatch".to_string()),
                });
            }
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
impl ClientScheme for ExactPermit {
    fn name(&self) -> &str {
        SCHEME_NAME
    }

    async fn generate_payload(
        &self,
        requirements: &PaymentRequirements,
        permit_context: Option<&PaymentPermitContext>,
        signer: &LocalWallet,
        chain_registry: &ChainRegistry,
    ) -> Result<PaymentPayload> {
        let extra = requirements
            .extra
            .as_ref()
            .and_then(|e| e.fee.as_ref())
            .ok_or_else(|| EngineError::MissingField("extra.fee".to_string()))?;

        ensure_allowance(requirements, extra, signer, chain_registry).await?;

        let meta = if let Some(ctx) = permit_context {
            PermitMeta {
                kind: ctx.meta.kind,
                payment_id: ctx.meta.payment_id.clone(),
                nonce: ctx.meta.nonce.clone(),
                valid_after: ctx.meta.valid_after,
                valid_before: ctx.meta.valid_before,
            }
        } else {
            let now = now_unix();
            PermitMeta {
                kind: DeliveryKind::PaymentOnly,
                payment_id: random_payment_id(),
                nonce: random_nonce_u256().to_string(),
                valid_after: now.saturating_sub(30),
                valid_before: now
                    + requirements.max_timeout_seconds.unwrap_or(3600),
            }
        };

        let permit = PaymentPermit {
            meta,
            buyer: signer.address().to_string().to_ascii_lowercase(),
            caller: extra
                .caller
                .clone()
                .unwrap_or_else(|| extra.fee_to.clone()),
            payment: Payment {
                pay_token: requirements.asset.clone(),
                pay_amount: requirements.amount.clone(),
                pay_to: requirements.pay_to.clone(),
            },
            fee: Fee {
                fee_to: extra.fee_to.clone(),
                fee_amount: extra.fee_amount.clone(),
            },
        };

        let network = crate::chain_config::NetworkId::parse(&requirements.network);
        let chain = chain_registry.get(&network)?;
        let engine_contract = ChainAddress::from_str(&chain.engine_contract)?;
        let domain = Domain {
            name: DOMAIN_NAME.to_string(),
            version: None,
            chain_id: U256::from(chain.chain_id),
            verifying_contract: engine_contract.to_ethers_address(),
            salt: None,
        };
        let types = permit_type_set();
        let message = permit_message(&permit)?;
        let digest = crate::eip712::signable_digest(&domain, &types, "PaymentPermitDetails", &message)?;
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
                payment_permit: Some(permit),
                transfer_authorization: None,
            },
            extensions: None,
        })
    }
}

/// Ensures the buyer has granted the engine contract enough allowance to
/// cover `payAmount + feeAmount`, approving it if not (spec §4.3 step 2).
///
/// Only the hex-20/EVM family has a standard ERC-20 allowance model reachable
/// through this stack's RPC client; Base58/TRON assets skip this step.
async fn ensure_allowance(
    requirements: &PaymentRequirements,
    fee: &FeeInfo,
    signer: &LocalWallet,
    chain_registry: &ChainRegistry,
) -> Result<()> {
    let token = ChainAddress::from_str(&requirements.asset)?;
    if !matches!(token, ChainAddress::Hex20(_)) {
        return Ok(());
    }

    let network = crate::chain_config::NetworkId::parse(&requirements.network);
    let chain = chain_registry.get(&network)?;
    let rpc_url = chain
        .rpc_url
        .as_ref()
        .ok_or_else(|| EngineError::AllowanceCheck(format!("no RPC configured for {}", requirements.network)))?;
    let engine_contract = ChainAddress::from_str(&chain.engine_contract)?;

    let provider = Provider::<Http>::try_from(rpc_url.as_str())
        .map_err(|e| EngineError::AllowanceCheck(e.to_string()))?;
    let client = Arc::new(SignerMiddleware::new(
        provider,
        signer.clone().with_chain_id(chain.chain_id),
    ));
    let contract = Erc20Allowance::new(token.to_ethers_address(), client);

    let required = crate::utils::string_to_u256(&requirements.amount)?
        + crate::utils::string_to_u256(&fee.fee_amount)?;

    let current = contract
        .allowance(signer.address(), engine_contract.to_ethers_address())
        .call()
        .await
        .map_err(|e| EngineError::AllowanceCheck(e.to_string()))?;

    if current >= required {
        return Ok(());
    }

    let pending = contract
        .approve(engine_contract.to_ethers_address(), required)
        .send()
        .await
        .map_err(|e| EngineError::InsufficientAllowance(e.to_string()))?;

    let receipt = pending
        .await
        .map_err(|e| EngineError::InsufficientAllowance(e.to_string()))?
        .ok_or_else(|| EngineError::InsufficientAllowance("approve transaction dropped".to_string()))?;

    if receipt.status != Some(1.into()) {
        return Err(EngineError::InsufficientAllowance(
            "approve transaction reverted".to_string(),
        ));
    }

    Ok(())
}

fn random_payment_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

fn random_nonce_u256() -> U256 {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    U256::from_big_endian(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeeInfo, PaymentRequirementsExtra};
    use std::collections::{HashMap, HashSet};

    fn sample_requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: SCHEME_NAME.to_string(),
            network: "tron:nile".to_string(),
            amount: "1000000".to_string(),
            asset: "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf".to_string(),
            pay_to: "TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV".to_string(),
            max_timeout_seconds: Some(3600),
            extra: Some(PaymentRequirementsExtra {
                name: None,
                version: None,
                fee: Some(FeeInfo {
                    facilitator_id: None,
                    fee_to: "TGCAjMXComunWZEXCT1LPBdcYbDVuyexBv".to_string(),
                    fee_amount: "1000".to_string(),
                    caller: Some("THkQfRopincF6emzbk6VMC7jTHqJ8MP8g7".to_string()),
                }),
            }),
        }
    }

    fn sample_ctx() -> FacilitatorContext {
        let mut base_fee = HashMap::new();
        base_fee.insert("USDT".to_string(), "1000".to_string());
        FacilitatorContext {
            fee_to: "TGCAjMXComunWZEXCT1LPBdcYbDVuyexBv".to_string(),
            caller: "THkQfRopincF6emzbk6VMC7jTHqJ8MP8g7".to_string(),
            base_fee,
            allowed_tokens: None,
            chain_registry: ChainRegistry::new(),
        }
    }

    fn sample_permit() -> PaymentPermit {
        let now = now_unix();
        PaymentPermit {
            meta: PermitMeta {
                kind: DeliveryKind::PaymentOnly,
                payment_id: "0x00112233445566778899aabbccddeeff".to_string(),
                nonce: "12345".to_string(),
                valid_after: now - 30,
                valid_before: now + 3600,
            },
            buyer: "TD5gsCwxykWsLN9aPrq2TAfNjByuZKYp4E".to_string(),
            caller: "THkQfRopincF6emzbk6VMC7jTHqJ8MP8g7".to_string(),
            payment: Payment {
                pay_token: "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf".to_string(),
                pay_amount: "1000000".to_string(),
                pay_to: "TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV".to_string(),
            },
            fee: Fee {
                fee_to: "TGCAjMXComunWZEXCT1LPBdcYbDVuyexBv".to_string(),
                fee_amount: "1000".to_string(),
            },
        }
    }

    #[test]
    fn test_validate_permit_happy_path() {
        let permit = sample_permit();
        let requirements = sample_requirements();
        let ctx = sample_ctx();
        assert!(validate_permit(&permit, &requirements, &ctx).is_ok());
    }

    #[test]
    fn test_validate_permit_amount_shortfall() {
        let mut permit = sample_permit();
        permit.payment.pay_amount = "999".to_string();
        let requirements = sample_requirements();
        let ctx = sample_ctx();
        assert_eq!(
            validate_permit(&permit, &requirements, &ctx).unwrap_err(),
            VerifyFailure::AmountMismatch
        );
    }

    #[test]
    fn test_validate_permit_expired() {
        let mut permit = sample_permit();
        permit.meta.valid_before = now_unix() - 10;
        let requirements = sample_requirements();
        let ctx = sample_ctx();
        assert_eq!(
            validate_permit(&permit, &requirements, &ctx).unwrap_err(),
            VerifyFailure::Expired
        );
    }

    #[test]
    fn test_validate_permit_token_not_allowed_checked_first() {
        let mut permit = sample_permit();
        permit.payment.pay_amount = "1".to_string(); // would also fail amount check
        let requirements = sample_requirements();
        let mut ctx = sample_ctx();
        let mut allowed = HashSet::new();
        allowed.insert("TDifferentTokenAddress1111111111111".to_string());
        ctx.allowed_tokens = Some(allowed);
        assert_eq!(
            validate_permit(&permit, &requirements, &ctx).unwrap_err(),
            VerifyFailure::TokenNotAllowed
        );
    }

    #[test]
    fn test_validate_permit_fee_tampering() {
        let mut permit = sample_permit();
        permit.fee.fee_amount = "1".to_string();
        let requirements = sample_requirements();
        let ctx = sample_ctx();
        assert_eq!(
            validate_permit(&permit, &requirements, &ctx).unwrap_err(),
            VerifyFailure::FeeAmountMismatch
        );
    }
}
