//! Shared helpers: header envelope, numeric conversions, timestamps.
//!
//! Kept and generalized from the teacher's `utils.rs`; address parsing moved
//! to [`crate::address`] since address handling now spans two families.

use crate::errors::{EngineError, Result};
use crate::types::PaymentPayload;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ethers::types::U256;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

/// Encodes a `PaymentPayload` as Base64 JSON for the `PAYMENT-SIGNATURE` header.
///
/// ```
/// use x402_tron::types::{PaymentPayload, PaymentPayloadData, PaymentRequirements};
/// use x402_tron::utils::encode_payment_header;
///
/// let payload = PaymentPayload {
///     x402_version: 2,
///     resource: None,
///     accepted: PaymentRequirements {
///         scheme: "exact".to_string(),
///         network: "eip155:8453".to_string(),
///         amount: "1000".to_string(),
///         asset: "0x0000000000000000000000000000000000000000".to_string(),
///         pay_to: "0x0000000000000000000000000000000000000000".to_string(),
///         max_timeout_seconds: None,
///         extra: None,
///     },
///     payload: PaymentPayloadData {
///         signature: "0xsig".to_string(),
///         merchant_signature: None,
///         payment_permit: None,
///         transfer_authorization: None,
///     },
///     extensions: None,
/// };
/// let encoded = encode_payment_header(&payload).unwrap();
/// assert!(!encoded.is_empty());
/// ```
pub fn encode_payment_header(payload: &PaymentPayload) -> Result<String> {
    let json = serde_json::to_string(payload)?;
    Ok(BASE64.encode(json.as_bytes()))
}

/// Decodes a Base64 JSON `PaymentPayload` from the `PAYMENT-SIGNATURE` header.
pub fn decode_payment_header(encoded: &str) -> Result<PaymentPayload> {
    let bytes = BASE64.decode(encoded)?;
    let payload = serde_json::from_slice(&bytes)?;
    Ok(payload)
}

/// Parses a decimal-string `uint256`.
pub fn string_to_u256(s: &str) -> Result<U256> {
    U256::from_dec_str(s).map_err(|e| EngineError::InvalidAmount(format!("{s}: {e}")))
}

/// Renders a `U256` as a decimal string, the wire form for amounts.
pub fn u256_to_string(value: U256) -> String {
    value.to_string()
}

/// Generates a random 32-byte nonce as a `0x`-prefixed hex string.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

/// Current unix timestamp.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

/// True if `now` falls within `[valid_after, valid_before]`.
pub fn is_timestamp_valid(valid_after: u64, valid_before: u64) -> bool {
    let now = current_timestamp();
    now >= valid_after && now <= valid_before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PaymentPayloadData, PaymentRequirements};

    fn sample_payload() -> PaymentPayload {
        PaymentPayload {
            x402_version: 2,
            resource: None,
            accepted: PaymentRequirements {
                scheme: "exact".to_string(),
                network: "eip155:8453".to_string(),
                amount: "1000".to_string(),
                asset: "0x0000000000000000000000000000000000000000".to_string(),
                pay_to: "0x0000000000000000000000000000000000000000".to_string(),
                max_timeout_seconds: None,
                extra: None,
            },
            payload: PaymentPayloadData {
                signature: "0xsig".to_string(),
                merchant_signature: None,
                payment_permit: None,
                transfer_authorization: None,
            },
            extensions: None,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let payload = sample_payload();
        let encoded = encode_payment_header(&payload).unwrap();
        let decoded = decode_payment_header(&encoded).unwrap();
        assert_eq!(decoded.accepted.amount, "1000");
    }

    #[test]
    fn test_u256_roundtrip() {
        let value = string_to_u256("123456789").unwrap();
        assert_eq!(u256_to_string(value), "123456789");
    }

    #[test]
    fn test_nonce_is_32_bytes() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 66); // "0x" + 64 hex chars
    }

    #[test]
    fn test_timestamp_validity_window() {
        let now = current_timestamp();
        assert!(is_timestamp_valid(now - 10, now + 10));
        assert!(!is_timestamp_valid(now + 10, now + 20));
        assert!(!is_timestamp_valid(now - 20, now - 10));
    }
}
