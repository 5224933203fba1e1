//! Error types for the x402 engine.
//!
//! Mirrors the teacher's split between a transport/config error type and a
//! closed set of protocol-level reason tags: `EngineError` carries the former,
//! `VerifyFailure` the latter. Reason tags are the public contract (see
//! spec §4.4/§7) and must keep their exact snake_case `Display` form.

use thiserror::Error;

/// Main error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Error during HTTP request/response handling
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Error during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error during Base64 encoding/decoding
    #[error("Base64 error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    /// Error during blockchain operations
    #[error("Blockchain error: {0}")]
    BlockchainError(String),

    /// Invalid payment payload
    #[error("Invalid payment payload: {0}")]
    InvalidPayload(String),

    /// Signature creation failed (client-side signing)
    #[error("Signature creation failed: {0}")]
    SignatureCreation(String),

    /// Signature verification failed
    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    /// Allowance check failed
    #[error("Allowance check failed: {0}")]
    AllowanceCheck(String),

    /// Insufficient token allowance for the permit scheme
    #[error("Insufficient allowance: {0}")]
    InsufficientAllowance(String),

    /// Settlement transaction broadcast failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Settlement transaction was included but reverted on-chain
    #[error("Transaction failed on-chain: {0}")]
    TransactionFailedOnChain(String),

    /// Settlement transaction succeeded on-chain but its transfer logs don't
    /// reconcile against the quoted requirement (spec §4.7)
    #[error("Settlement mismatch: {0}")]
    SettlementMismatch(String),

    /// Deadline passed while waiting for transaction inclusion
    #[error("Transaction timed out{}", .0.as_ref().map(|h| format!(" (tx {h})")).unwrap_or_default())]
    TransactionTimeout(Option<String>),

    /// Unsupported network identifier
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// Unknown token symbol
    #[error("Unknown token: {0}")]
    UnknownToken(String),

    /// Requirements/payload mismatch caught before contacting the facilitator
    #[error("Payload mismatch: {0}")]
    PayloadMismatch(String),

    /// Invalid address format
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No suitable payment requirement found on the client side
    #[error("No suitable payment requirement found")]
    NoSuitableRequirement,

    /// Unsupported (network, scheme) pair in a mechanism registry
    #[error("unsupported_network_scheme: {network}/{scheme}")]
    UnsupportedNetworkScheme {
        /// network identifier
        network: String,
        /// scheme name
        scheme: String,
    },

    /// The response was not a 402 Payment Required
    #[error("Expected 402 Payment Required, got status: {0}")]
    Not402Response(u16),

    /// Error parsing URL
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<ethers::core::types::SignatureError> for EngineError {
    fn from(err: ethers::core::types::SignatureError) -> Self {
        EngineError::SignatureVerification(err.to_string())
    }
}

impl From<ethers::providers::ProviderError> for EngineError {
    fn from(err: ethers::providers::ProviderError) -> Self {
        EngineError::BlockchainError(err.to_string())
    }
}

/// Stable, wire-visible reason tags produced by `verify`/`settle` (spec §4.4, §7).
///
/// The `Display` impl is the public contract: these strings are what callers
/// see in `VerifyResponse.invalidReason` / `SettleResponse.errorReason`, and
/// must not drift across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyFailure {
    /// asset not in the facilitator's configured whitelist
    TokenNotAllowed,
    /// `payAmount`/`value` below the requirement
    AmountMismatch,
    /// `payTo`/`to` does not match the requirement
    PayToMismatch,
    /// `payToken` does not match the requirement's asset (permit scheme only)
    TokenMismatch,
    /// `fee.feeTo` does not match the facilitator's configured fee recipient
    FeeToMismatch,
    /// `fee.feeAmount` below the facilitator's configured base fee
    FeeAmountMismatch,
    /// asset has no configured base fee
    UnsupportedToken,
    /// `validBefore` has passed
    Expired,
    /// `validAfter` has not yet arrived
    NotYetValid,
    /// recovered signer does not match `buyer`/`from`
    InvalidSignature,
    /// scheme is permit but the payload carries no `paymentPermit`
    MissingPermit,
}

impl VerifyFailure {
    /// Returns the stable wire tag for this failure reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyFailure::TokenNotAllowed => "token_not_allowed",
            VerifyFailure::AmountMismatch => "amount_mismatch",
            VerifyFailure::PayToMismatch => "payto_mismatch",
            VerifyFailure::TokenMismatch => "token_mismatch",
            VerifyFailure::FeeToMismatch => "fee_to_mismatch",
            VerifyFailure::FeeAmountMismatch => "fee_amount_mismatch",
            VerifyFailure::UnsupportedToken => "unsupported_token",
            VerifyFailure::Expired => "expired",
            VerifyFailure::NotYetValid => "not_yet_valid",
            VerifyFailure::InvalidSignature => "invalid_signature",
            VerifyFailure::MissingPermit => "missing_permit",
        }
    }
}

impl std::fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
