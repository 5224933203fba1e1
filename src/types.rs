//! Core type definitions for the x402 protocol (spec §3).
//!
//! The shapes mirror the authoritative pydantic model this protocol was
//! distilled from: camelCase on the wire, snake_case in Rust, with `rename`
//! doing what `populate_by_name`/`Field(alias=...)` did there. Amounts and
//! on-chain identifiers travel as decimal-string `U256`-shaped text, never
//! as JSON numbers, to avoid floating-point loss.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Version of the x402 protocol.
pub const X402_VERSION: u32 = 2;

/// Delivery kind for a payment permit. Only `PaymentOnly` is accepted;
/// anything else fails to parse (spec §9 Open Question resolution).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    /// the only supported kind — numeric EIP-712 value `0`
    #[serde(rename = "PAYMENT_ONLY")]
    PaymentOnly,
}

impl DeliveryKind {
    /// The numeric value placed in the `PermitMeta.kind` EIP-712 field.
    pub fn as_u8(&self) -> u8 {
        match self {
            DeliveryKind::PaymentOnly => 0,
        }
    }
}

/// Payment permit metadata (spec §3).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PermitMeta {
    /// delivery kind, currently always `PAYMENT_ONLY`
    pub kind: DeliveryKind,
    /// opaque 16-byte (`bytes16`) payment identifier, hex-encoded
    #[serde(rename = "paymentId")]
    pub payment_id: String,
    /// random nonce, decimal-string `uint256`
    pub nonce: String,
    /// permit becomes valid at this unix timestamp
    #[serde(rename = "validAfter")]
    pub valid_after: u64,
    /// permit expires at this unix timestamp
    #[serde(rename = "validBefore")]
    pub valid_before: u64,
}

/// Payment leg of a permit: asset, amount, recipient.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Payment {
    /// ERC-20-shaped token contract address being paid with
    #[serde(rename = "payToken")]
    pub pay_token: String,
    /// decimal-string `uint256` amount, in the token's smallest unit
    #[serde(rename = "payAmount")]
    pub pay_amount: String,
    /// merchant recipient address
    #[serde(rename = "payTo")]
    pub pay_to: String,
}

/// Facilitator fee leg of a permit.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Fee {
    /// fee recipient address
    #[serde(rename = "feeTo")]
    pub fee_to: String,
    /// decimal-string `uint256` fee amount
    #[serde(rename = "feeAmount")]
    pub fee_amount: String,
}

/// The permit scheme's signed structure (spec §4.2/§4.3): `meta`, `buyer`,
/// `caller`, `payment`, `fee` — the five top-level fields of
/// `PaymentPermitDetails` in the EIP-712 type tree.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentPermit {
    /// delivery/validity metadata
    pub meta: PermitMeta,
    /// the address authorizing the payment
    pub buyer: String,
    /// the only address allowed to submit this permit on-chain
    pub caller: String,
    /// what is being paid and to whom
    pub payment: Payment,
    /// the facilitator's fee
    pub fee: Fee,
}

/// `TransferWithAuthorization` parameters for the transfer-authorization
/// scheme (spec §4.2/§4.4, EIP-3009-shaped).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransferAuthorization {
    /// token holder authorizing the transfer
    #[serde(rename = "from")]
    pub from_address: String,
    /// transfer recipient
    pub to: String,
    /// decimal-string `uint256` transfer amount
    pub value: String,
    /// authorization becomes valid at this unix timestamp
    #[serde(rename = "validAfter")]
    pub valid_after: String,
    /// authorization expires at this unix timestamp
    #[serde(rename = "validBefore")]
    pub valid_before: String,
    /// 32-byte (`bytes32`) hex-encoded nonce, `0x`-prefixed
    pub nonce: String,
}

/// Fee disclosure attached to a `PaymentRequirements.extra` (spec §3).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FeeInfo {
    /// optional facilitator identifier, when multiple are configured
    #[serde(rename = "facilitatorId", skip_serializing_if = "Option::is_none")]
    pub facilitator_id: Option<String>,
    /// fee recipient address
    #[serde(rename = "feeTo")]
    pub fee_to: String,
    /// decimal-string `uint256` fee amount
    #[serde(rename = "feeAmount")]
    pub fee_amount: String,
    /// optional address restriction: only this caller may submit the permit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
}

/// Scheme-specific extra metadata inside `PaymentRequirements` (spec §3).
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PaymentRequirementsExtra {
    /// token name, used to build the EIP-712 domain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// token version, used to build the EIP-712 domain (transfer-auth scheme)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// fee disclosure for the permit scheme
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<FeeInfo>,
}

/// One accepted payment option returned by a 402 response (spec §3).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentRequirements {
    /// `"exact_permit"` or `"exact"`
    pub scheme: String,
    /// `<family>:<name>` network identifier
    pub network: String,
    /// decimal-string `uint256` required amount
    pub amount: String,
    /// asset (token contract) address
    pub asset: String,
    /// merchant recipient address
    #[serde(rename = "payTo")]
    pub pay_to: String,
    /// optional max timeout before the quote expires
    #[serde(rename = "maxTimeoutSeconds", skip_serializing_if = "Option::is_none")]
    pub max_timeout_seconds: Option<u64>,
    /// scheme-specific extra metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<PaymentRequirementsExtra>,
}

/// Permit metadata echoed back inside `PaymentRequired.extensions` so the
/// client does not have to invent its own `paymentId`/`nonce`/validity
/// window (spec §3, §9).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentPermitContextMeta {
    /// delivery kind
    pub kind: DeliveryKind,
    /// payment identifier to echo back in the signed permit
    #[serde(rename = "paymentId")]
    pub payment_id: String,
    /// nonce to echo back in the signed permit
    pub nonce: String,
    /// validity window start
    #[serde(rename = "validAfter")]
    pub valid_after: u64,
    /// validity window end
    #[serde(rename = "validBefore")]
    pub valid_before: u64,
}

/// Wrapper for `PaymentPermitContextMeta` inside `extensions` (spec §3).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentPermitContext {
    /// the actual metadata payload
    pub meta: PaymentPermitContextMeta,
}

/// Extensible, forward-compatible extension bag on `PaymentRequired`
/// (spec §3, §9): unknown keys are preserved rather than rejected.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PaymentRequiredExtensions {
    /// server-issued permit metadata for the permit scheme
    #[serde(rename = "paymentPermitContext", skip_serializing_if = "Option::is_none")]
    pub payment_permit_context: Option<PaymentPermitContext>,
    /// any additional extension keys not modeled explicitly
    #[serde(flatten)]
    pub other: HashMap<String, Value>,
}

/// Human-facing resource description attached to a 402 response (spec §3).
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ResourceInfo {
    /// canonical resource URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// resource MIME type
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// HTTP 402 response body (spec §3).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentRequired {
    /// protocol version
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    /// optional human-readable error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// optional resource description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,
    /// payment options the client may choose from
    pub accepts: Vec<PaymentRequirements>,
    /// optional forward-compatible extension bag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<PaymentRequiredExtensions>,
}

/// The scheme-specific signed envelope inside `PaymentPayload` (spec §3).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentPayloadData {
    /// primary EIP-712 signature (buyer's, for either scheme)
    pub signature: String,
    /// optional merchant counter-signature (unused by either scheme here,
    /// reserved for multi-party extensions)
    #[serde(rename = "merchantSignature", skip_serializing_if = "Option::is_none")]
    pub merchant_signature: Option<String>,
    /// the signed permit structure, present iff scheme is `exact_permit`
    #[serde(rename = "paymentPermit", skip_serializing_if = "Option::is_none")]
    pub payment_permit: Option<PaymentPermit>,
    /// the signed transfer authorization, present iff scheme is `exact`
    #[serde(rename = "transferAuthorization", skip_serializing_if = "Option::is_none")]
    pub transfer_authorization: Option<TransferAuthorization>,
}

/// The `PAYMENT-SIGNATURE` header payload sent by the client (spec §3, §4.6).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentPayload {
    /// protocol version
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    /// echoed resource description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,
    /// the exact `PaymentRequirements` the client is responding to (echoed
    /// back verbatim so the server can detect tampering, spec §4.6)
    pub accepted: PaymentRequirements,
    /// the scheme-specific signed payload
    pub payload: PaymentPayloadData,
    /// free-form extension bag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, Value>>,
}

/// Facilitator `/verify` response (spec §4.4).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VerifyResponse {
    /// whether the payload passed all checks
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    /// stable reason tag, present iff `is_valid` is false
    #[serde(rename = "invalidReason", skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

impl VerifyResponse {
    /// Builds a passing response.
    pub fn ok() -> Self {
        VerifyResponse {
            is_valid: true,
            invalid_reason: None,
        }
    }

    /// Builds a failing response carrying `reason`'s stable wire tag.
    pub fn failure(reason: crate::errors::VerifyFailure) -> Self {
        VerifyResponse {
            is_valid: false,
            invalid_reason: Some(reason.as_str().to_string()),
        }
    }

    /// Builds a failing response carrying a free-form reason string, for
    /// reasons that embed data (e.g. `unsupported_network_scheme: <network>/<scheme>`,
    /// spec §4.6) rather than a fixed [`crate::errors::VerifyFailure`] tag.
    pub fn failure_reason(reason: impl Into<String>) -> Self {
        VerifyResponse {
            is_valid: false,
            invalid_reason: Some(reason.into()),
        }
    }
}

/// On-chain transaction descriptor returned after settlement (spec §4.7).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransactionInfo {
    /// transaction hash
    pub hash: String,
    /// block number it was included in, if known
    #[serde(rename = "blockNumber", skip_serializing_if = "Option::is_none")]
    pub block_number: Option<String>,
    /// chain-reported status string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Facilitator `/settle` response (spec §4.4).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SettleResponse {
    /// whether settlement succeeded
    pub success: bool,
    /// transaction hash, present iff `success`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    /// network the transaction was submitted to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// stable reason tag, present iff settlement failed
    #[serde(rename = "errorReason", skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

/// One `(scheme, network)` pair a facilitator accepts (spec §4.5).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SupportedKind {
    /// protocol version
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    /// scheme name
    pub scheme: String,
    /// network identifier
    pub network: String,
}

/// Fee configuration a facilitator discloses (spec §4.5).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SupportedFee {
    /// fee recipient address
    #[serde(rename = "feeTo")]
    pub fee_to: String,
    /// whether the fee is computed per-accept or is a flat charge
    pub pricing: PricingModel,
}

/// Fee pricing model tag.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PricingModel {
    /// fee computed from each `PaymentRequirements` individually
    PerAccept,
    /// fixed fee regardless of amount
    Flat,
}

/// Facilitator `/supported` response (spec §4.5).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SupportedResponse {
    /// all `(scheme, network)` pairs accepted
    pub kinds: Vec<SupportedKind>,
    /// the facilitator's fee configuration; required, `feeTo` must be non-empty
    pub fee: SupportedFee,
}

/// Facilitator fee-quote response (spec §4.9 supplement).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FeeQuoteResponse {
    /// the quoted fee
    pub fee: FeeInfo,
    /// pricing model used
    pub pricing: PricingModel,
    /// scheme this quote applies to
    pub scheme: String,
    /// network this quote applies to
    pub network: String,
    /// asset this quote applies to
    pub asset: String,
    /// unix timestamp after which this quote should be re-fetched
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_kind_wire_form() {
        let json = serde_json::to_string(&DeliveryKind::PaymentOnly).unwrap();
        assert_eq!(json, "\"PAYMENT_ONLY\"");
        assert_eq!(DeliveryKind::PaymentOnly.as_u8(), 0);
    }

    #[test]
    fn test_permit_meta_camel_case_roundtrip() {
        let meta = PermitMeta {
            kind: DeliveryKind::PaymentOnly,
            payment_id: "0x00112233445566778899aabbccddeeff".to_string(),
            nonce: "123456789".to_string(),
            valid_after: 1000,
            valid_before: 2000,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"paymentId\""));
        assert!(json.contains("\"validAfter\""));
        let back: PermitMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back.valid_before, 2000);
    }

    #[test]
    fn test_payment_payload_data_scheme_exclusivity_is_representable() {
        let data = PaymentPayloadData {
            signature: "0xsig".to_string(),
            merchant_signature: None,
            payment_permit: None,
            transfer_authorization: Some(TransferAuthorization {
                from_address: "0xfrom".to_string(),
                to: "0xto".to_string(),
                value: "1000".to_string(),
                valid_after: "0".to_string(),
                valid_before: "9999999999".to_string(),
                nonce: "0xaabb".to_string(),
            }),
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("transferAuthorization"));
        assert!(!json.contains("paymentPermit"));
    }

    #[test]
    fn test_verify_response_failure_uses_stable_tag() {
        let resp = VerifyResponse::failure(crate::errors::VerifyFailure::AmountMismatch);
        assert!(!resp.is_valid);
        assert_eq!(resp.invalid_reason.as_deref(), Some("amount_mismatch"));
    }

    #[test]
    fn test_supported_response_pricing_serializes_snake_case() {
        let resp = SupportedResponse {
            kinds: vec![SupportedKind {
                x402_version: X402_VERSION,
                scheme: "exact_permit".to_string(),
                network: "tron:nile".to_string(),
            }],
            fee: SupportedFee {
                fee_to: "TFeeToAddress".to_string(),
                pricing: PricingModel::PerAccept,
            },
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["fee"]["pricing"], "per_accept");
    }

    #[test]
    fn test_payment_required_extensions_preserves_unknown_keys() {
        let json = r#"{"someFutureExtension": {"a": 1}}"#;
        let ext: PaymentRequiredExtensions = serde_json::from_str(json).unwrap();
        assert!(ext.payment_permit_context.is_none());
        assert!(ext.other.contains_key("someFutureExtension"));
    }
}
