//! End-to-end scenario tests (spec §8): client signs, facilitator verifies
//! and settles, against a `ChainSettler` test double standing in for chain
//! broadcast. Each scenario matches the named case in spec §8 exactly:
//! `tron:nile`, asset USDT, facilitator base fee 1 USDT (`1000000`).

use async_trait::async_trait;
use ethers::signers::LocalWallet;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use x402_tron::address::Address;
use x402_tron::chain_config::ChainRegistry;
use x402_tron::config::FacilitatorConfig;
use x402_tron::errors::Result;
use x402_tron::facilitator::Facilitator;
use x402_tron::schemes::permit::ExactPermit;
use x402_tron::schemes::transfer_auth::ExactTransferAuth;
use x402_tron::schemes::{ChainSettler, ClientScheme, TransactionReceipt, TransferLog};
use x402_tron::types::{
    Fee, FeeInfo, PaymentPermit, PaymentRequirements, PaymentRequirementsExtra,
    TransferAuthorization,
};
use x402_tron::utils::{decode_payment_header, encode_payment_header};

/// Broadcasts nothing for real; stashes the transfer logs a real chain would
/// have emitted for each settlement, keyed by the fake tx hash it hands
/// back, so the reconciliation step in `schemes::permit`/`transfer_auth`
/// (spec §4.7) has something real to scan.
#[derive(Default)]
struct AlwaysSucceedsSettler {
    logs: Mutex<HashMap<String, Vec<TransferLog>>>,
}

#[async_trait]
impl ChainSettler for AlwaysSucceedsSettler {
    async fn settle_permit(
        &self,
        permit: &PaymentPermit,
        _signature: &str,
        _requirements: &PaymentRequirements,
    ) -> Result<Option<String>> {
        let tx_hash = "0xdeadbeef".to_string();
        let token = Address::from_str(&permit.payment.pay_token)?.to_signing_address();
        let from = Address::from_str(&permit.buyer)?.to_signing_address();
        let mut logs = vec![TransferLog {
            token: token.clone(),
            from: from.clone(),
            to: Address::from_str(&permit.payment.pay_to)?.to_signing_address(),
            value: permit.payment.pay_amount.clone(),
        }];
        if permit.fee.fee_amount != "0" {
            logs.push(TransferLog {
                token,
                from,
                to: Address::from_str(&permit.fee.fee_to)?.to_signing_address(),
                value: permit.fee.fee_amount.clone(),
            });
        }
        self.logs.lock().unwrap().insert(tx_hash.clone(), logs);
        Ok(Some(tx_hash))
    }

    async fn settle_transfer_auth(
        &self,
        auth: &TransferAuthorization,
        _signature: &str,
        requirements: &PaymentRequirements,
    ) -> Result<Option<String>> {
        let tx_hash = "0xfeedface".to_string();
        let logs = vec![TransferLog {
            token: Address::from_str(&requirements.asset)?.to_signing_address(),
            from: Address::from_str(&auth.from_address)?.to_signing_address(),
            to: Address::from_str(&auth.to)?.to_signing_address(),
            value: auth.value.clone(),
        }];
        self.logs.lock().unwrap().insert(tx_hash.clone(), logs);
        Ok(Some(tx_hash))
    }

    async fn wait_for_receipt(&self, tx_hash: &str, _network: &str) -> Result<TransactionReceipt> {
        let logs = self.logs.lock().unwrap().get(tx_hash).cloned().unwrap_or_default();
        Ok(TransactionReceipt {
            hash: tx_hash.to_string(),
            block_number: Some(42),
            success: true,
            logs,
        })
    }
}

fn buyer_wallet() -> LocalWallet {
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff8"
        .parse()
        .unwrap()
}

fn facilitator_config() -> FacilitatorConfig {
    let mut base_fee = HashMap::new();
    base_fee.insert("USDT".to_string(), "1000000".to_string());
    FacilitatorConfig {
        private_key: "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff9".to_string(),
        fee_to: Some("TGCAjMXComunWZEXCT1LPBdcYbDVuyexBv".to_string()),
        base_fee,
        allowed_tokens: None,
        contract_overrides: HashMap::new(),
    }
}

fn facilitator(config: &FacilitatorConfig) -> Facilitator {
    Facilitator::new(
        config,
        Arc::new(AlwaysSucceedsSettler::default()),
        vec!["tron:nile".to_string(), "eip155:8453".to_string()],
    )
    .unwrap()
}

fn permit_requirements() -> PaymentRequirements {
    PaymentRequirements {
        scheme: "exact_permit".to_string(),
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
                fee_amount: "1000000".to_string(),
                caller: Some("THkQfRopincF6emzbk6VMC7jTHqJ8MP8g7".to_string()),
            }),
        }),
    }
}

fn transfer_auth_requirements() -> PaymentRequirements {
    PaymentRequirements {
        scheme: "exact".to_string(),
        network: "eip155:8453".to_string(),
        amount: "1000000".to_string(),
        asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
        pay_to: "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb".to_string(),
        max_timeout_seconds: Some(3600),
        extra: Some(PaymentRequirementsExtra {
            name: Some("USD Coin".to_string()),
            version: Some("2".to_string()),
            fee: None,
        }),
    }
}

/// Scenario 1: happy path, permit scheme.
#[tokio::test]
async fn test_happy_path_permit_settles() {
    let config = facilitator_config();
    let facilitator = facilitator(&config);
    let requirements = permit_requirements();
    let wallet = buyer_wallet();

    let payload = ExactPermit::new()
        .generate_payload(&requirements, None, &wallet, &ChainRegistry::new())
        .await
        .unwrap();

    let verify_result = facilitator.verify(&payload, &requirements).await.unwrap();
    assert!(verify_result.is_valid);

    let settle_result = facilitator.settle(&payload, &requirements).await.unwrap();
    assert!(settle_result.success);
    assert_eq!(settle_result.transaction.as_deref(), Some("0xdeadbeef"));
}

/// Scenario 2: expired permit fails verify with the `expired` reason tag.
#[tokio::test]
async fn test_expired_permit_fails_verify() {
    let config = facilitator_config();
    let facilitator = facilitator(&config);
    let requirements = permit_requirements();
    let wallet = buyer_wallet();

    let mut payload = ExactPermit::new()
        .generate_payload(&requirements, None, &wallet, &ChainRegistry::new())
        .await
        .unwrap();
    payload.payload.payment_permit.as_mut().unwrap().meta.valid_before =
        x402_tron::utils::current_timestamp() - 3600;

    let verify_result = facilitator.verify(&payload, &requirements).await.unwrap();
    assert!(!verify_result.is_valid);
    assert_eq!(verify_result.invalid_reason.as_deref(), Some("expired"));
}

/// Scenario 4: fee tampering is caught at verify with `fee_amount_mismatch`.
#[tokio::test]
async fn test_fee_tampering_rejected() {
    let config = facilitator_config();
    let facilitator = facilitator(&config);
    let requirements = permit_requirements();
    let wallet = buyer_wallet();

    let mut payload = ExactPermit::new()
        .generate_payload(&requirements, None, &wallet, &ChainRegistry::new())
        .await
        .unwrap();
    payload.payload.payment_permit.as_mut().unwrap().fee = Fee {
        fee_to: "TGCAjMXComunWZEXCT1LPBdcYbDVuyexBv".to_string(),
        fee_amount: "0".to_string(),
    };

    let verify_result = facilitator.verify(&payload, &requirements).await.unwrap();
    assert!(!verify_result.is_valid);
    assert_eq!(
        verify_result.invalid_reason.as_deref(),
        Some("fee_amount_mismatch")
    );
}

/// Scenario 5: transfer-authorization happy path, no facilitator fee.
#[tokio::test]
async fn test_transfer_authorization_happy_path() {
    let config = facilitator_config();
    let facilitator = facilitator(&config);
    let requirements = transfer_auth_requirements();
    let wallet = buyer_wallet();

    let payload = ExactTransferAuth::new()
        .generate_payload(&requirements, None, &wallet, &ChainRegistry::new())
        .await
        .unwrap();

    let verify_result = facilitator.verify(&payload, &requirements).await.unwrap();
    assert!(verify_result.is_valid);

    let settle_result = facilitator.settle(&payload, &requirements).await.unwrap();
    assert!(settle_result.success);
    assert_eq!(settle_result.transaction.as_deref(), Some("0xfeedface"));

    let quote = facilitator.fee_quote(&requirements);
    assert!(quote.is_none(), "USDC on eip155:8453 has no configured base fee in this facilitator");
}

/// Scenario 6: token whitelist enforcement rejects a non-whitelisted asset
/// before any on-chain submission is attempted.
#[tokio::test]
async fn test_token_whitelist_enforcement() {
    let mut config = facilitator_config();
    let mut allowed = std::collections::HashSet::new();
    allowed.insert("TDifferentUSDDAddress111111111111111".to_string());
    config.allowed_tokens = Some(allowed);
    let facilitator = facilitator(&config);
    let requirements = permit_requirements();
    let wallet = buyer_wallet();

    let payload = ExactPermit::new()
        .generate_payload(&requirements, None, &wallet, &ChainRegistry::new())
        .await
        .unwrap();

    let verify_result = facilitator.verify(&payload, &requirements).await.unwrap();
    assert!(!verify_result.is_valid);
    assert_eq!(
        verify_result.invalid_reason.as_deref(),
        Some("token_not_allowed")
    );
}

/// Header round-trip invariant (spec §8): base64(json(x)) decodes back to
/// an identical payload.
#[tokio::test]
async fn test_payment_header_roundtrip_invariant() {
    let requirements = permit_requirements();
    let wallet = buyer_wallet();
    let payload = ExactPermit::new()
        .generate_payload(&requirements, None, &wallet, &ChainRegistry::new())
        .await
        .unwrap();

    let encoded = encode_payment_header(&payload).unwrap();
    let decoded = decode_payment_header(&encoded).unwrap();
    assert_eq!(
        decoded.payload.payment_permit.unwrap().meta.payment_id,
        payload.payload.payment_permit.unwrap().meta.payment_id
    );
}

/// Address canonicalization invariant (spec §8): `to_signing_address` is
/// always 42 characters, lowercase, `0x`-prefixed, for both families.
#[test]
fn test_address_canonicalization_invariant() {
    use x402_tron::Address;
    use std::str::FromStr;

    let hex_addr = Address::from_str("0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb").unwrap();
    let tron_addr = Address::from_str("TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV").unwrap();

    for addr in [hex_addr, tron_addr] {
        let signing = addr.to_signing_address();
        assert_eq!(signing.len(), 42);
        assert!(signing.starts_with("0x"));
        assert_eq!(signing, signing.to_ascii_lowercase());
    }

    assert_eq!(
        Address::ZERO_HEX20.to_signing_address(),
        format!("0x{}", "0".repeat(40))
    );
}
