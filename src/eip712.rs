//! EIP-712 core: domain separator, struct typehash, recursive struct
//! encoding, and the signable digest (spec §4.2).
//!
//! Grounded on the teacher's `schemes/exact_evm.rs::create_domain_separator`/
//! `create_authorization_hash`, generalized from one hard-coded struct shape
//! to an arbitrary, dependency-ordered set of named struct types so both the
//! permit domain (`PaymentPermitDetails`, no `version`) and the
//! transfer-authorization domain (`TransferWithAuthorization`, with
//! `version`) are expressed through the same machinery (spec §4.2 table).

use crate::errors::{EngineError, Result};
use ethers::core::utils::keccak256;
use ethers::types::{Address as EthAddress, H256, U256};
use std::collections::BTreeMap;

/// A single field of an EIP-712 struct type: `(name, solidity type)`.
pub type Field = (&'static str, &'static str);

/// A named EIP-712 struct type definition: ordered field list.
#[derive(Debug, Clone)]
pub struct StructType {
    /// struct name, e.g. `"PermitMeta"`
    pub name: &'static str,
    /// ordered fields, e.g. `[("kind", "uint8"), ...]`
    pub fields: Vec<Field>,
}

/// A concrete encodable value for one field of a message/struct.
#[derive(Debug, Clone)]
pub enum Value {
    /// `uintN` / `intN` encoded as a 32-byte big-endian integer
    Uint(U256),
    /// `address`, left-padded to 32 bytes
    Address(EthAddress),
    /// `bytesN`, right-padded to 32 bytes
    FixedBytes(Vec<u8>),
    /// dynamic `bytes`/`string`, replaced by its keccak256
    Dynamic(Vec<u8>),
    /// a nested struct, replaced by its `hashStruct`
    Struct(&'static str, Vec<(&'static str, Value)>),
}

/// The full set of named struct types a message may reference, plus a
/// primary type to encode from. Mirrors `encodeType`'s dependency-ordering
/// requirement: referenced types are resolved recursively.
pub struct TypeSet {
    types: BTreeMap<&'static str, StructType>,
}

impl TypeSet {
    /// Builds a type set from a list of struct type definitions.
    pub fn new(types: Vec<StructType>) -> Self {
        let mut map = BTreeMap::new();
        for t in types {
            map.insert(t.name, t);
        }
        TypeSet { types: map }
    }

    fn get(&self, name: &str) -> Result<&StructType> {
        self.types
            .get(name)
            .ok_or_else(|| EngineError::Other(format!("unknown EIP-712 type: {name}")))
    }

    /// `encodeType(primary)`: `Name(type1 field1,...)` followed by the
    /// canonical-order concatenation of every transitively referenced
    /// struct type's own encoding (each type appears exactly once).
    fn encode_type(&self, primary: &str) -> Result<String> {
        let mut referenced = Vec::new();
        self.collect_referenced(primary, &mut referenced)?;
        referenced.sort();
        referenced.dedup();

        let head = self.encode_type_head(primary)?;
        let mut out = head;
        for name in referenced {
            if name == primary {
                continue;
            }
            out.push_str(&self.encode_type_head(&name)?);
        }
        Ok(out)
    }

    fn encode_type_head(&self, name: &str) -> Result<String> {
        let t = self.get(name)?;
        let fields = t
            .fields
            .iter()
            .map(|(fname, ftype)| format!("{ftype} {fname}"))
            .collect::<Vec<_>>()
            .join(",");
        Ok(format!("{}({})", t.name, fields))
    }

    fn collect_referenced(&self, name: &str, out: &mut Vec<String>) -> Result<()> {
        let t = self.get(name)?;
        for (_, ftype) in &t.fields {
            let base = strip_array_suffix(ftype);
            if self.types.contains_key(base) && !out.iter().any(|n| n == base) {
                out.push(base.to_string());
                self.collect_referenced(base, out)?;
            }
        }
        Ok(())
    }

    /// `typeHash(T) = keccak256(encodeType(T))`.
    pub fn type_hash(&self, name: &str) -> Result<H256> {
        let encoded = self.encode_type(name)?;
        Ok(H256::from(keccak256(encoded.as_bytes())))
    }

    /// `hashStruct(T, v) = keccak256(typeHash(T) || encodeData(T, v))`.
    pub fn hash_struct(&self, name: &str, values: &[(&'static str, Value)]) -> Result<H256> {
        let t = self.get(name)?;
        let type_hash = self.type_hash(name)?;
        let mut data = Vec::new();
        data.extend_from_slice(type_hash.as_bytes());
        for (fname, _) in &t.fields {
            let (_, value) = values
                .iter()
                .find(|(n, _)| n == fname)
                .ok_or_else(|| EngineError::Other(format!("missing field {fname} for {name}")))?;
            data.extend_from_slice(&self.encode_value(value)?);
        }
        Ok(H256::from(keccak256(&data)))
    }

    fn encode_value(&self, value: &Value) -> Result<[u8; 32]> {
        Ok(match value {
            Value::Uint(u) => {
                let mut buf = [0u8; 32];
                u.to_big_endian(&mut buf);
                buf
            }
            Value::Address(a) => {
                let mut buf = [0u8; 32];
                buf[12..].copy_from_slice(a.as_bytes());
                buf
            }
            Value::FixedBytes(b) => {
                let mut buf = [0u8; 32];
                let n = b.len().min(32);
                buf[..n].copy_from_slice(&b[..n]);
                buf
            }
            Value::Dynamic(b) => keccak256(b),
            Value::Struct(name, fields) => *self.hash_struct(name, fields)?.as_fixed_bytes(),
        })
    }
}

fn strip_array_suffix(ty: &str) -> &str {
    ty.split('[').next().unwrap_or(ty)
}

/// An EIP-712 domain. `version` and `salt` are optional — the `EIP712Domain`
/// type array is built from the keys actually present, in the canonical
/// order `name, version, chainId, verifyingContract, salt` (spec §4.2, §9).
#[derive(Debug, Clone)]
pub struct Domain {
    /// application/contract name
    pub name: String,
    /// optional version string (absent for the permit scheme's domain)
    pub version: Option<String>,
    /// numeric chain id
    pub chain_id: U256,
    /// the contract this signature is scoped to
    pub verifying_contract: EthAddress,
    /// optional domain salt (unused by either scheme here, but supported)
    pub salt: Option<H256>,
}

impl Domain {
    /// Builds the dynamic `EIP712Domain` struct type + value pair for this
    /// domain's actually-present fields, then returns its `hashStruct`.
    pub fn separator(&self) -> H256 {
        let mut fields: Vec<Field> = vec![("name", "string")];
        let mut values: Vec<(&'static str, Value)> =
            vec![("name", Value::Dynamic(self.name.clone().into_bytes()))];

        if let Some(version) = &self.version {
            fields.push(("version", "string"));
            values.push(("version", Value::Dynamic(version.clone().into_bytes())));
        }

        fields.push(("chainId", "uint256"));
        values.push(("chainId", Value::Uint(self.chain_id)));

        fields.push(("verifyingContract", "address"));
        values.push(("verifyingContract", Value::Address(self.verifying_contract)));

        if let Some(salt) = self.salt {
            fields.push(("salt", "bytes32"));
            values.push(("salt", Value::FixedBytes(salt.as_bytes().to_vec())));
        }

        let domain_type = StructType {
            name: "EIP712Domain",
            fields,
        };
        let type_set = TypeSet::new(vec![domain_type]);
        // infallible: the type set contains exactly the type we just built
        type_set.hash_struct("EIP712Domain", &values).expect("domain hash_struct")
    }
}

/// `digest = keccak256(0x1901 || domainSeparator || hashStruct(primaryType, message))`.
pub fn signable_digest(
    domain: &Domain,
    types: &TypeSet,
    primary_type: &str,
    message: &[(&'static str, Value)],
) -> Result<H256> {
    let domain_separator = domain.separator();
    let message_hash = types.hash_struct(primary_type, message)?;
    let mut buf = Vec::with_capacity(2 + 32 + 32);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(domain_separator.as_bytes());
    buf.extend_from_slice(message_hash.as_bytes());
    Ok(H256::from(keccak256(&buf)))
}

/// Re-biases an ECDSA recovery id from `{0,1}` to `{27,28}` if needed, as
/// required before placing it on-chain (spec §4.2).
pub fn normalize_recovery_id(v: u8) -> u8 {
    if v < 27 {
        v + 27
    } else {
        v
    }
}

/// Recovers the signer address from a digest + 65-byte `(r,s,v)` signature.
pub fn recover_signer(digest: H256, signature: &ethers::types::Signature) -> Result<EthAddress> {
    signature
        .recover(digest)
        .map_err(|e| EngineError::SignatureVerification(e.to_string()))
}
