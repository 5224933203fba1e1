//! Address family abstraction (spec §4.1, §9).
//!
//! Two address encodings coexist: 20-byte hex (`0x` + 40 lowercase hex
//! digits) and TRON-style Base58Check (`0x41 || 20 bytes`, base58 with a
//! 4-byte double-SHA-256 checksum, display form starting with `T`). Rather
//! than branching on a leading-character prefix throughout the mechanism
//! code, address family is encoded once as a tagged variant and conversion
//! is pushed to the EIP-712 boundary only.

use crate::errors::{EngineError, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// TRON's version byte prefixing the 20-byte payload before Base58Check encoding.
const TRON_VERSION_BYTE: u8 = 0x41;

/// A 20-byte account address carrying the family it was parsed from.
///
/// `Hex20` is its own signing form. `Base58` addresses are displayed in
/// Base58Check but always reduced to their 20-byte body (hex-20) before
/// being placed in an EIP-712 message, per spec §4.1/§4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// `0x`-prefixed 20-byte address (EVM-shaped families).
    Hex20([u8; 20]),
    /// TRON-shaped Base58Check address (`0x41 || body`).
    Base58([u8; 20]),
}

impl Address {
    /// The all-zero address for the hex-20 family.
    pub const ZERO_HEX20: Address = Address::Hex20([0u8; 20]);

    /// The all-zero address for the Base58 (TRON) family — note the 20-byte
    /// body is all zero, but the *display form* is a non-trivial Base58Check
    /// string because of its checksum, see [`AddressFamily::get_zero_address`].
    pub const ZERO_BASE58: Address = Address::Base58([0u8; 20]);

    /// Returns the raw 20-byte body regardless of family.
    pub fn bytes(&self) -> [u8; 20] {
        match self {
            Address::Hex20(b) | Address::Base58(b) => *b,
        }
    }

    /// Converts to the hex-20 signing form used inside EIP-712 messages
    /// (spec §4.1: "always produce hex-20").
    pub fn to_signing_address(&self) -> String {
        format!("0x{}", hex::encode(self.bytes()))
    }

    /// Converts to an `ethers::types::Address` for EIP-712 / ABI encoding.
    pub fn to_ethers_address(&self) -> ethers::types::Address {
        ethers::types::Address::from(self.bytes())
    }
}

/// Per-family behavior: parsing/normalizing, signing-address projection,
/// and the canonical zero address (spec §4.1).
pub trait AddressFamily: Send + Sync {
    /// Maps any accepted input form to the canonical display form,
    /// absorbing the all-zero placeholder quirk (`"T000...0"` etc).
    fn normalize(&self, input: &str) -> Result<Address>;

    /// Renders an address in this family's canonical display form.
    fn display(&self, addr: &Address) -> String;

    /// The canonical zero address for this family.
    fn get_zero_address(&self) -> Address;
}

/// Hex-20 family: display form is the input, zero address is 20 zero bytes,
/// signing form equals the display form.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hex20Family;

impl AddressFamily for Hex20Family {
    fn normalize(&self, input: &str) -> Result<Address> {
        parse_hex20(input)
    }

    fn display(&self, addr: &Address) -> String {
        addr.to_signing_address()
    }

    fn get_zero_address(&self) -> Address {
        Address::ZERO_HEX20
    }
}

fn parse_hex20(input: &str) -> Result<Address> {
    let trimmed = input.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if hex_part.len() != 40 {
        return Err(EngineError::InvalidAddress(format!(
            "expected 40 hex chars, got {}: {}",
            hex_part.len(),
            input
        )));
    }
    let mut bytes = [0u8; 20];
    hex::decode_to_slice(hex_part.to_ascii_lowercase(), &mut bytes)
        .map_err(|e| EngineError::InvalidAddress(format!("{input}: {e}")))?;
    Ok(Address::Hex20(bytes))
}

/// Base58Check (TRON-style) family: display is base58(0x41 || body || checksum4),
/// zero address is the base58 encoding of the all-zero body, signing form is
/// the `0x`-prefixed hex rendering of the 20-byte body.
#[derive(Debug, Default, Clone, Copy)]
pub struct Base58TronFamily;

impl Base58TronFamily {
    /// Computes the 4-byte double-SHA-256 checksum per spec §4.1.
    fn checksum(payload: &[u8]) -> [u8; 4] {
        let first = Sha256::digest(payload);
        let second = Sha256::digest(first);
        let mut out = [0u8; 4];
        out.copy_from_slice(&second[0..4]);
        out
    }

    fn encode(body: [u8; 20]) -> String {
        let mut payload = Vec::with_capacity(21);
        payload.push(TRON_VERSION_BYTE);
        payload.extend_from_slice(&body);
        let checksum = Self::checksum(&payload);
        payload.extend_from_slice(&checksum);
        bs58::encode(payload).into_string()
    }

    fn decode(input: &str) -> Result<[u8; 20]> {
        let decoded = bs58::decode(input)
            .into_vec()
            .map_err(|e| EngineError::InvalidAddress(format!("{input}: {e}")))?;
        if decoded.len() != 25 {
            return Err(EngineError::InvalidAddress(format!(
                "{input}: expected 25-byte Base58Check payload, got {}",
                decoded.len()
            )));
        }
        let (payload, checksum) = decoded.split_at(21);
        if payload[0] != TRON_VERSION_BYTE {
            return Err(EngineError::InvalidAddress(format!(
                "{input}: unexpected version byte {:#04x}",
                payload[0]
            )));
        }
        let expected = Self::checksum(payload);
        if expected != checksum {
            return Err(EngineError::InvalidAddress(format!(
                "{input}: checksum mismatch"
            )));
        }
        let mut body = [0u8; 20];
        body.copy_from_slice(&payload[1..21]);
        Ok(body)
    }

    /// True if `input` is the all-placeholder zero-address quirk (e.g.
    /// `"T000000000000000000000000000000000"`): starts with `T` and every
    /// remaining character is `0` or `T` (spec §4.1, §9).
    fn is_zero_placeholder(input: &str) -> bool {
        input.starts_with('T') && input.chars().all(|c| c == 'T' || c == '0')
    }
}

impl AddressFamily for Base58TronFamily {
    fn normalize(&self, input: &str) -> Result<Address> {
        let trimmed = input.trim();
        if Self::is_zero_placeholder(trimmed) {
            return Ok(self.get_zero_address());
        }
        // Accept hex-20 input too (e.g. received from an EIP-712 message).
        if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
            return parse_hex20(trimmed).map(|a| Address::Base58(a.bytes()));
        }
        let body = Self::decode(trimmed)?;
        Ok(Address::Base58(body))
    }

    fn display(&self, addr: &Address) -> String {
        Self::encode(addr.bytes())
    }

    fn get_zero_address(&self) -> Address {
        Address::ZERO_BASE58
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Hex20(_) => write!(f, "{}", Hex20Family.display(self)),
            Address::Base58(_) => write!(f, "{}", Base58TronFamily.display(self)),
        }
    }
}

impl FromStr for Address {
    type Err = EngineError;

    /// Parses using whichever family the string's shape implies: `0x`
    /// prefix or 40 bare hex chars is hex-20; a leading `T` is Base58-TRON.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.starts_with('T') {
            Base58TronFamily.normalize(trimmed)
        } else {
            Hex20Family.normalize(trimmed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex20_roundtrip() {
        let a = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb";
        let addr = Hex20Family.normalize(a).unwrap();
        assert_eq!(Hex20Family.display(&addr), a.to_lowercase());
    }

    #[test]
    fn test_hex20_signing_form_shape() {
        let addr = Hex20Family.normalize("0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb").unwrap();
        let signing = addr.to_signing_address();
        assert_eq!(signing.len(), 42);
        assert!(signing.starts_with("0x"));
        assert_eq!(signing, signing.to_lowercase());
    }

    #[test]
    fn test_hex20_zero_signing_form() {
        let zero = Hex20Family.get_zero_address();
        assert_eq!(zero.to_signing_address(), format!("0x{}", "0".repeat(40)));
    }

    #[test]
    fn test_base58_zero_address_matches_known_value() {
        // spec-cited zero address for the TRON family.
        let zero = Base58TronFamily.get_zero_address();
        assert_eq!(
            Base58TronFamily.display(&zero),
            "T9yD14Nj9j7xAB4dbGeiX9h8unkKHxuWwb"
        );
    }

    #[test]
    fn test_base58_roundtrip() {
        let addr = Base58TronFamily
            .normalize("TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV")
            .unwrap();
        let rendered = Base58TronFamily.display(&addr);
        assert_eq!(rendered, "TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV");
    }

    #[test]
    fn test_base58_rejects_bad_checksum() {
        // Flip the last character of a valid address to corrupt the checksum.
        let mut corrupt = "TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV".to_string();
        corrupt.pop();
        corrupt.push('9');
        assert!(Base58TronFamily.normalize(&corrupt).is_err());
    }

    #[test]
    fn test_base58_zero_placeholder_canonicalized() {
        let placeholder = "T0000000000000000000000000000000000";
        let addr = Base58TronFamily.normalize(placeholder).unwrap();
        assert_eq!(addr, Base58TronFamily.get_zero_address());
    }

    #[test]
    fn test_normalize_idempotent() {
        let a = Base58TronFamily
            .normalize("TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV")
            .unwrap();
        let displayed = Base58TronFamily.display(&a);
        let b = Base58TronFamily.normalize(&displayed).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_base58_to_signing_address() {
        let addr = Base58TronFamily
            .normalize("TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV")
            .unwrap();
        let signing = addr.to_signing_address();
        assert_eq!(signing.len(), 42);
        assert!(signing.starts_with("0x"));
    }
}
