//! Facilitator orchestration (spec §4.4/§4.5/§4.9).
//!
//! Dispatches by `(scheme, network)` to the right mechanism, same shape as
//! the teacher's `handle_verify`/`handle_settle`, generalized to the two
//! schemes here and to a facilitator-configured fee schedule/whitelist.
//! Nonce replay tracking follows the teacher's `used_nonces` `HashSet` guard.

use crate::config::FacilitatorConfig as EnvFacilitatorConfig;
use crate::errors::{EngineError, Result};
use crate::schemes::{permit::ExactPermit, transfer_auth::ExactTransferAuth};
use crate::schemes::{ChainSettler, FacilitatorContext, FacilitatorScheme};
use crate::tokens::TokenRegistry;
use crate::types::{
    FeeInfo, FeeQuoteResponse, PaymentPayload, PaymentRequirements, PricingModel, SettleResponse,
    SupportedFee, SupportedKind, SupportedResponse, VerifyResponse, X402_VERSION,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

const FEE_QUOTE_EXPIRY_SECONDS: u64 = 300;

/// Runtime facilitator service: holds the fee/whitelist configuration, a
/// replay-protection nonce set, and the chain settler used for broadcast.
pub struct Facilitator {
    ctx: FacilitatorContext,
    settler: Arc<dyn ChainSettler>,
    used_nonces: RwLock<HashSet<String>>,
    supported: Vec<(&'static str, String)>,
}

impl Facilitator {
    /// Builds a facilitator from loaded environment configuration and a
    /// chain settler (an [`crate::post_verify::EvmChainSettler`] for hex-20
    /// families, or an operator-supplied TRON implementation).
    pub fn new(
        env_config: &EnvFacilitatorConfig,
        settler: Arc<dyn ChainSettler>,
        supported_networks: Vec<String>,
    ) -> Result<Self> {
        let fee_to = env_config
            .fee_to
            .clone()
            .ok_or_else(|| EngineError::ConfigError("FACILITATOR_FEE_TO required".to_string()))?;

        for symbol in env_config.base_fee.keys() {
            let token_registry = TokenRegistry;
            let known = supported_networks
                .iter()
                .any(|n| token_registry.find_by_symbol(n, symbol).is_some());
            if !known {
                return Err(EngineError::UnknownToken(symbol.clone()));
            }
        }

        let mut supported = Vec::new();
        for network in &supported_networks {
            supported.push((crate::schemes::permit::SCHEME_NAME, network.clone()));
            supported.push((crate::schemes::transfer_auth::SCHEME_NAME, network.clone()));
        }

        Ok(Facilitator {
            ctx: FacilitatorContext {
                fee_to: fee_to.clone(),
                caller: fee_to,
                base_fee: env_config.base_fee.clone(),
                allowed_tokens: env_config.allowed_tokens.clone(),
                chain_registry: env_config.chain_registry(),
            },
            settler,
            used_nonces: RwLock::new(HashSet::new()),
            supported,
        })
    }

    fn is_supported(&self, scheme: &str, network: &str) -> bool {
        self.supported.iter().any(|(s, n)| *s == scheme && n == network)
    }

    fn scheme_mechanism(&self, name: &str) -> Result<Box<dyn FacilitatorScheme>> {
        match name {
            crate::schemes::permit::SCHEME_NAME => Ok(Box::new(ExactPermit::new())),
            crate::schemes::transfer_auth::SCHEME_NAME => Ok(Box::new(ExactTransferAuth::new())),
            other => Err(EngineError::UnsupportedNetworkScheme {
                network: "*".to_string(),
                scheme: other.to_string(),
            }),
        }
    }

    /// Extracts the nonce this payload would consume, for replay detection.
    fn payload_nonce(payload: &PaymentPayload) -> Option<String> {
        if let Some(permit) = &payload.payload.payment_permit {
            Some(format!("permit:{}:{}", permit.buyer, permit.meta.nonce))
        } else {
            payload
                .payload
                .transfer_authorization
                .as_ref()
                .map(|auth| format!("auth:{}:{}", auth.from_address, auth.nonce))
        }
    }

    /// Handles `/verify`.
    pub async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse> {
        if !self.is_supported(&requirements.scheme, &requirements.network) {
            return Ok(VerifyResponse::failure_reason(format!(
                "unsupported_network_scheme: {}/{}",
                requirements.network, requirements.scheme
            )));
        }
        if payload.accepted.scheme != requirements.scheme
            || payload.accepted.network != requirements.network
            || payload.accepted.amount != requirements.amount
            || payload.accepted.asset != requirements.asset
            || payload.accepted.pay_to != requirements.pay_to
        {
            return Err(EngineError::PayloadMismatch(
                "accepted requirements do not match the quoted requirements".to_string(),
            ));
        }

        if let Some(nonce) = Self::payload_nonce(payload) {
            let nonces = self.used_nonces.read().await;
            if nonces.contains(&nonce) {
                return Err(EngineError::InvalidPayload("nonce already used".to_string()));
            }
        }

        let mechanism = self.scheme_mechanism(&requirements.scheme)?;
        mechanism.verify(payload, requirements, &self.ctx).await
    }

    /// Handles `/settle`.
    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse> {
        let verify_result = self.verify(payload, requirements).await?;
        if !verify_result.is_valid {
            return Ok(SettleResponse {
                success: false,
                transaction: None,
                network: Some(requirements.network.clone()),
                error_reason: verify_result.invalid_reason,
            });
        }

        let mechanism = self.scheme_mechanism(&requirements.scheme)?;
        let result = mechanism
            .settle(payload, requirements, &self.ctx, self.settler.as_ref())
            .await?;

        if result.success {
            if let Some(nonce) = Self::payload_nonce(payload) {
                self.used_nonces.write().await.insert(nonce);
            }
        }

        Ok(result)
    }

    /// Handles `/supported`.
    pub fn supported(&self) -> SupportedResponse {
        SupportedResponse {
            kinds: self
                .supported
                .iter()
                .map(|(scheme, network)| SupportedKind {
                    x402_version: X402_VERSION,
                    scheme: scheme.to_string(),
                    network: network.clone(),
                })
                .collect(),
            fee: SupportedFee {
                fee_to: self.ctx.fee_to.clone(),
                pricing: PricingModel::Flat,
            },
        }
    }

    /// Handles a fee quote request for one `PaymentRequirements` (spec §4.9).
    pub fn fee_quote(&self, accept: &PaymentRequirements) -> Option<FeeQuoteResponse> {
        let token_registry = TokenRegistry;
        let token = token_registry.find_by_address(&accept.network, &accept.asset)?;
        let fee_amount = self.ctx.base_fee.get(token.symbol)?.clone();

        Some(FeeQuoteResponse {
            fee: FeeInfo {
                facilitator_id: None,
                fee_to: self.ctx.fee_to.clone(),
                fee_amount,
                caller: Some(self.ctx.caller.clone()),
            },
            pricing: PricingModel::Flat,
            scheme: accept.scheme.clone(),
            network: accept.network.clone(),
            asset: accept.asset.clone(),
            expires_at: Some(crate::utils::current_timestamp() + FEE_QUOTE_EXPIRY_SECONDS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemes::TransactionReceipt;
    use crate::types::{PaymentPayloadData, PaymentPermit, TransferAuthorization};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct NoopSettler;

    #[async_trait]
    impl ChainSettler for NoopSettler {
        async fn settle_permit(
            &self,
            _permit: &PaymentPermit,
            _signature: &str,
            _requirements: &PaymentRequirements,
        ) -> Result<Option<String>> {
            Ok(Some("0xtxhash".to_string()))
        }

        async fn settle_transfer_auth(
            &self,
            _auth: &TransferAuthorization,
            _signature: &str,
            _requirements: &PaymentRequirements,
        ) -> Result<Option<String>> {
            Ok(Some("0xtxhash".to_string()))
        }

        async fn wait_for_receipt(&self, tx_hash: &str, _network: &str) -> Result<TransactionReceipt> {
            Ok(TransactionReceipt {
                hash: tx_hash.to_string(),
                block_number: Some(1),
                success: true,
                logs: Vec::new(),
            })
        }
    }

    fn env_config() -> EnvFacilitatorConfig {
        let mut base_fee = HashMap::new();
        base_fee.insert("USDT".to_string(), "1000".to_string());
        EnvFacilitatorConfig {
            private_key: "0xabc".to_string(),
            fee_to: Some("TGCAjMXComunWZEXCT1LPBdcYbDVuyexBv".to_string()),
            base_fee,
            allowed_tokens: None,
            contract_overrides: HashMap::new(),
        }
    }

    #[test]
    fn test_facilitator_rejects_unknown_base_fee_symbol() {
        let mut cfg = env_config();
        cfg.base_fee.insert("DOGE".to_string(), "1".to_string());
        let result = Facilitator::new(&cfg, Arc::new(NoopSettler), vec!["tron:nile".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_supported_lists_both_schemes() {
        let cfg = env_config();
        let facilitator =
            Facilitator::new(&cfg, Arc::new(NoopSettler), vec!["tron:nile".to_string()]).unwrap();
        let resp = facilitator.supported();
        assert_eq!(resp.kinds.len(), 2);
        assert_eq!(resp.fee.fee_to, "TGCAjMXComunWZEXCT1LPBdcYbDVuyexBv");
    }

    #[tokio::test]
    async fn test_verify_rejects_unsupported_scheme_network() {
        let cfg = env_config();
        let facilitator =
            Facilitator::new(&cfg, Arc::new(NoopSettler), vec!["tron:nile".to_string()]).unwrap();

        let requirements = PaymentRequirements {
            scheme: "exact_permit".to_string(),
            network: "eip155:8453".to_string(),
            amount: "1000".to_string(),
            asset: "0x0".to_string(),
            pay_to: "0x0".to_string(),
            max_timeout_seconds: None,
            extra: None,
        };
        let payload = PaymentPayload {
            x402_version: X402_VERSION,
            resource: None,
            accepted: requirements.clone(),
            payload: PaymentPayloadData {
                signature: "0xsig".to_string(),
                merchant_signature: None,
                payment_permit: None,
                transfer_authorization: None,
            },
            extensions: None,
        };
        let resp = facilitator.verify(&payload, &requirements).await.unwrap();
        assert!(!resp.is_valid);
        assert_eq!(
            resp.invalid_reason.as_deref(),
            Some("unsupported_network_scheme: eip155:8453/exact_permit")
        );
    }
}
