//! On-chain settlement submission and post-verification (spec §4.7, §9).
//!
//! A [`ChainSettler`](crate::schemes::ChainSettler) ships here for the
//! hex-20/EVM family, built on `ethers::contract::abigen!` exactly as the
//! teacher's `schemes/exact_evm.rs` does. No Base58-TRON settler ships
//! concretely: TRON settlement needs a TRON-native RPC client that isn't
//! part of this stack, so that family is left to be supplied by an operator
//! implementing the same [`ChainSettler`] trait (spec §9 resolution).

use crate::address::Address as ChainAddress;
use crate::chain_config::ChainRegistry;
use crate::errors::{EngineError, Result};
use crate::schemes::{ChainSettler, TransactionReceipt, TransferLog};
use crate::types::{PaymentPermit, PaymentRequirements, TransferAuthorization};
use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::core::utils::keccak256;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Bytes, U256};
use std::str::FromStr;
use std::sync::Arc;

/// `keccak256("Transfer(address,address,uint256)")`, the standard ERC-20
/// transfer event topic.
fn transfer_event_topic() -> ethers::types::H256 {
    ethers::types::H256::from(keccak256(b"Transfer(address,address,uint256)"))
}

/// Decodes every ERC-20-shaped `Transfer` log in `logs` (spec §4.7
/// post-verification: reconcile settlement against the quoted requirement
/// by scanning transfer logs, not just the receipt status).
fn decode_transfer_logs(logs: &[ethers::types::Log]) -> Vec<TransferLog> {
    let topic = transfer_event_topic();
    logs.iter()
        .filter(|log| log.topics.len() == 3 && log.topics[0] == topic)
        .map(|log| {
            let from = ethers::types::Address::from(log.topics[1]);
            let to = ethers::types::Address::from(log.topics[2]);
            let value = U256::from_big_endian(&log.data);
            TransferLog {
                token: format!("0x{:x}", log.address),
                from: format!("0x{from:x}"),
                to: format!("0x{to:x}"),
                value: value.to_string(),
            }
        })
        .collect()
}

abigen!(
    PaymentPermitEngine,
    r#"[
        function permitTransferFrom((uint8,bytes16,uint256,uint256,uint256) meta, address buyer, address caller, (address,uint256,address) payment, (address,uint256) fee, bytes signature) external
    ]"#
);

abigen!(
    Eip3009Token,
    r#"[
        function transferWithAuthorization(address from, address to, uint256 value, uint256 validAfter, uint256 validBefore, bytes32 nonce, uint8 v, bytes32 r, bytes32 s) external
    ]"#
);

type SignerProvider = SignerMiddleware<Provider<Http>, LocalWallet>;

/// EVM-family on-chain settler: broadcasts through a JSON-RPC provider using
/// the facilitator's own signing key to pay gas.
pub struct EvmChainSettler {
    wallet: LocalWallet,
    chain_registry: ChainRegistry,
}

impl EvmChainSettler {
    /// Builds a settler from the facilitator's private key.
    pub fn new(private_key: &str, chain_registry: ChainRegistry) -> Result<Self> {
        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| EngineError::ConfigError(format!("invalid facilitator key: {e}")))?;
        Ok(EvmChainSettler {
            wallet,
            chain_registry,
        })
    }

    async fn client_for(&self, network: &str) -> Result<Arc<SignerProvider>> {
        let network_id = crate::chain_config::NetworkId::parse(network);
        let chain = self.chain_registry.get(&network_id)?;
        let rpc_url = chain
            .rpc_url
            .ok_or_else(|| EngineError::ConfigError(format!("no RPC configured for {network}")))?;
        let provider = Provider::<Http>::try_from(rpc_url.as_str())
            .map_err(|e| EngineError::ConfigError(e.to_string()))?;
        let wallet = self.wallet.clone().with_chain_id(chain.chain_id);
        Ok(Arc::new(SignerMiddleware::new(provider, wallet)))
    }

    fn to_eth(addr: &str) -> Result<ethers::types::Address> {
        Ok(ChainAddress::from_str(addr)?.to_ethers_address())
    }
}

#[async_trait]
impl ChainSettler for EvmChainSettler {
    async fn settle_permit(
        &self,
        permit: &PaymentPermit,
        signature: &str,
        requirements: &PaymentRequirements,
    ) -> Result<Option<String>> {
        let network_id = crate::chain_config::NetworkId::parse(&requirements.network);
        let chain = self.chain_registry.get(&network_id)?;
        let client = self.client_for(&requirements.network).await?;
        let engine_address = Self::to_eth(&chain.engine_contract)?;
        let contract = PaymentPermitEngine::new(engine_address, client);

        let payment_id = hex::decode(permit.meta.payment_id.trim_start_matches("0x"))
            .map_err(|e| EngineError::InvalidPayload(format!("paymentId: {e}")))?;
        let mut payment_id16 = [0u8; 16];
        let n = payment_id.len().min(16);
        payment_id16[..n].copy_from_slice(&payment_id[..n]);

        let meta = (
            permit.meta.kind.as_u8(),
            payment_id16,
            U256::from_dec_str(&permit.meta.nonce)
                .map_err(|_| EngineError::InvalidAmount(permit.meta.nonce.clone()))?,
            U256::from(permit.meta.valid_after),
            U256::from(permit.meta.valid_before),
        );
        let buyer = Self::to_eth(&permit.buyer)?;
        let caller = Self::to_eth(&permit.caller)?;
        let payment = (
            Self::to_eth(&permit.payment.pay_token)?,
            U256::from_dec_str(&permit.payment.pay_amount)
                .map_err(|_| EngineError::InvalidAmount(permit.payment.pay_amount.clone()))?,
            Self::to_eth(&permit.payment.pay_to)?,
        );
        let fee = (
            Self::to_eth(&permit.fee.fee_to)?,
            U256::from_dec_str(&permit.fee.fee_amount)
                .map_err(|_| EngineError::InvalidAmount(permit.fee.fee_amount.clone()))?,
        );
        let sig_bytes = hex::decode(signature.trim_start_matches("0x"))
            .map_err(|e| EngineError::SignatureVerification(e.to_string()))?;

        let call = contract.permit_transfer_from(
            meta,
            buyer,
            caller,
            payment,
            fee,
            Bytes::from(sig_bytes),
        );
        match call.send().await {
            Ok(pending) => Ok(Some(format!("{:?}", pending.tx_hash()))),
            Err(e) => {
                tracing::error!(error = %e, "permit settlement broadcast failed");
                Ok(None)
            }
        }
    }

    async fn settle_transfer_auth(
        &self,
        auth: &TransferAuthorization,
        signature: &str,
        requirements: &PaymentRequirements,
    ) -> Result<Option<String>> {
        let client = self.client_for(&requirements.network).await?;
        let asset = Self::to_eth(&requirements.asset)?;
        let contract = Eip3009Token::new(asset, client);

        let sig_bytes = hex::decode(signature.trim_start_matches("0x"))
            .map_err(|e| EngineError::SignatureVerification(e.to_string()))?;
        if sig_bytes.len() != 65 {
            return Err(EngineError::SignatureVerification(
                "expected 65-byte signature".to_string(),
            ));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig_bytes[0..32]);
        s.copy_from_slice(&sig_bytes[32..64]);
        let v = sig_bytes[64];

        let nonce_bytes = hex::decode(auth.nonce.trim_start_matches("0x"))
            .map_err(|e| EngineError::InvalidPayload(format!("nonce: {e}")))?;
        let mut nonce32 = [0u8; 32];
        let n = nonce_bytes.len().min(32);
        nonce32[..n].copy_from_slice(&nonce_bytes[..n]);

        let call = contract.transfer_with_authorization(
            Self::to_eth(&auth.from_address)?,
            Self::to_eth(&auth.to)?,
            U256::from_dec_str(&auth.value).map_err(|_| EngineError::InvalidAmount(auth.value.clone()))?,
            U256::from_dec_str(&auth.valid_after)
                .map_err(|_| EngineError::InvalidAmount(auth.valid_after.clone()))?,
            U256::from_dec_str(&auth.valid_before)
                .map_err(|_| EngineError::InvalidAmount(auth.valid_before.clone()))?,
            nonce32,
            v,
            r,
            s,
        );
        match call.send().await {
            Ok(pending) => Ok(Some(format!("{:?}", pending.tx_hash()))),
            Err(e) => {
                tracing::error!(error = %e, "transfer-authorization settlement broadcast failed");
                Ok(None)
            }
        }
    }

    async fn wait_for_receipt(&self, tx_hash: &str, network: &str) -> Result<TransactionReceipt> {
        let network_id = crate::chain_config::NetworkId::parse(network);
        let chain = self.chain_registry.get(&network_id)?;
        let rpc_url = chain
            .rpc_url
            .ok_or_else(|| EngineError::ConfigError(format!("no RPC configured for {network}")))?;
        let provider = Provider::<Http>::try_from(rpc_url.as_str())
            .map_err(|e| EngineError::ConfigError(e.to_string()))?;

        let hash = ethers::types::H256::from_str(tx_hash)
            .map_err(|e| EngineError::BlockchainError(format!("invalid tx hash: {e}")))?;
        let receipt = provider
            .get_transaction_receipt(hash)
            .await?
            .ok_or_else(|| EngineError::TransactionTimeout(Some(tx_hash.to_string())))?;

        let success = receipt
            .status
            .map(|s| s == ethers::types::U64::from(1))
            .unwrap_or(false);

        Ok(TransactionReceipt {
            hash: format!("{:?}", receipt.transaction_hash),
            block_number: receipt.block_number.map(|b| b.as_u64()),
            success,
            logs: decode_transfer_logs(&receipt.logs),
        })
    }
}
