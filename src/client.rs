//! Client-side driver for the 402 handshake (spec §4.3, §4.6).
//!
//! Generalized from the teacher's `request_with_payment`: instead of one
//! hard-coded EVM scheme, a `ClientScheme` is looked up by the chosen
//! requirement's `scheme` name, and the signer's wallet key is shared
//! across both supported schemes (permit and transfer-authorization
//! signing are both plain secp256k1 EIP-712 signatures).

use crate::chain_config::ChainRegistry;
use crate::errors::{EngineError, Result};
use crate::schemes::permit::ExactPermit;
use crate::schemes::transfer_auth::ExactTransferAuth;
use crate::schemes::ClientScheme;
use crate::types::{PaymentPayload, PaymentRequired, PaymentRequirements, X402_VERSION};
use crate::utils::{decode_payment_header, encode_payment_header};
use ethers::signers::LocalWallet;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;

/// Client configuration: signing key, HTTP client, and scheme/network
/// preferences for selecting among a server's `accepts` list.
#[derive(Clone)]
pub struct X402ClientConfig {
    /// the payer's private key (drives both the permit and transfer-auth schemes)
    pub private_key: String,
    /// HTTP client used for requests
    pub http_client: Client,
    /// chain registry used to resolve EIP-712 domains
    pub chain_registry: ChainRegistry,
    /// preferred scheme, e.g. `"exact_permit"`
    pub preferred_scheme: Option<String>,
    /// preferred network identifier, supports `<family>:*` wildcards
    pub preferred_network: Option<String>,
}

impl X402ClientConfig {
    /// Creates a new client configuration.
    pub fn new(private_key: impl Into<String>) -> Self {
        Self {
            private_key: private_key.into(),
            http_client: Client::new(),
            chain_registry: ChainRegistry::new(),
            preferred_scheme: None,
            preferred_network: None,
        }
    }

    /// Sets the preferred payment scheme.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.preferred_scheme = Some(scheme.into());
        self
    }

    /// Sets the preferred network.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.preferred_network = Some(network.into());
        self
    }

    /// Sets a custom HTTP client.
    pub fn with_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    fn wallet(&self) -> Result<LocalWallet> {
        self.private_key
            .parse::<LocalWallet>()
            .map_err(|e| EngineError::InvalidPayload(format!("invalid private key: {e}")))
    }
}

/// Picks the scheme mechanism for `requirement.scheme`.
fn scheme_for(name: &str) -> Result<Arc<dyn ClientScheme>> {
    match name {
        crate::schemes::permit::SCHEME_NAME => Ok(Arc::new(ExactPermit::new())),
        crate::schemes::transfer_auth::SCHEME_NAME => Ok(Arc::new(ExactTransferAuth::new())),
        other => Err(EngineError::UnsupportedNetworkScheme {
            network: "*".to_string(),
            scheme: other.to_string(),
        }),
    }
}

/// Selects a payment option from `response.accepts`, honoring the client's
/// scheme/network preferences (spec §4.6).
fn select_requirement<'a>(
    response: &'a PaymentRequired,
    config: &X402ClientConfig,
) -> Result<&'a PaymentRequirements> {
    let mut candidates: Vec<_> = response.accepts.iter().collect();

    if let Some(scheme) = &config.preferred_scheme {
        candidates.retain(|r| &r.scheme == scheme);
    }
    if let Some(network) = &config.preferred_network {
        candidates.retain(|r| {
            crate::chain_config::NetworkId::parse(&r.network).matches_pattern(network)
        });
    }

    candidates.first().copied().ok_or(EngineError::NoSuitableRequirement)
}

/// Builds a signed `PaymentPayload` satisfying `requirement`, using the
/// server-issued permit context from `response.extensions` when present.
async fn generate_payment_payload(
    requirement: &PaymentRequirements,
    response: &PaymentRequired,
    config: &X402ClientConfig,
) -> Result<PaymentPayload> {
    let scheme = scheme_for(&requirement.scheme)?;
    let wallet = config.wallet()?;
    let permit_context = response
        .extensions
        .as_ref()
        .and_then(|e| e.payment_permit_context.as_ref());
    scheme
        .generate_payload(requirement, permit_context, &wallet, &config.chain_registry)
        .await
}

/// Drives the full 402 handshake: send the request, and if a 402 comes back,
/// select a requirement, sign a payload, and retry with `PAYMENT-SIGNATURE` set.
pub async fn request_with_payment(
    config: &X402ClientConfig,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Response> {
    let mut request = config.http_client.request(method.clone(), url);
    if let Some(body) = &body {
        request = request.json(body);
    }
    let response = request.send().await?;

    if response.status() != StatusCode::PAYMENT_REQUIRED {
        return Ok(response);
    }

    let payment_required: PaymentRequired = response.json().await?;
    let requirement = select_requirement(&payment_required, config)?;
    let payload = generate_payment_payload(requirement, &payment_required, config).await?;
    let payment_header = encode_payment_header(&payload)?;

    let mut retry_request = config.http_client.request(method, url);
    retry_request = retry_request.header("PAYMENT-SIGNATURE", payment_header);
    if let Some(body) = body {
        retry_request = retry_request.json(&body);
    }
    let retry_response = retry_request.send().await?;

    if let Some(header) = retry_response.headers().get("PAYMENT-RESPONSE") {
        if let Ok(encoded) = header.to_str() {
            if let Ok(decoded) = decode_payment_header_response(encoded) {
                tracing::debug!(?decoded, "settlement response received");
            }
        }
    }

    Ok(retry_response)
}

fn decode_payment_header_response(encoded: &str) -> Result<crate::types::SettleResponse> {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    let bytes = BASE64.decode(encoded)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Convenience wrapper for a `GET` request with automatic payment handling.
pub async fn get(config: &X402ClientConfig, url: &str) -> Result<Response> {
    request_with_payment(config, Method::GET, url, None).await
}

/// Convenience wrapper for a `POST` request with automatic payment handling.
pub async fn post(config: &X402ClientConfig, url: &str, body: Value) -> Result<Response> {
    request_with_payment(config, Method::POST, url, Some(body)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PaymentRequiredExtensions, ResourceInfo};

    fn sample_response() -> PaymentRequired {
        PaymentRequired {
            x402_version: X402_VERSION,
            error: None,
            resource: Some(ResourceInfo::default()),
            accepts: vec![
                PaymentRequirements {
                    scheme: "exact_permit".to_string(),
                    network: "tron:nile".to_string(),
                    amount: "1000".to_string(),
                    asset: "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf".to_string(),
                    pay_to: "TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV".to_string(),
                    max_timeout_seconds: None,
                    extra: None,
                },
                PaymentRequirements {
                    scheme: "exact".to_string(),
                    network: "eip155:8453".to_string(),
                    amount: "1000".to_string(),
                    asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
                    pay_to: "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb".to_string(),
                    max_timeout_seconds: None,
                    extra: None,
                },
            ],
            extensions: Some(PaymentRequiredExtensions::default()),
        }
    }

    #[test]
    fn test_select_requirement_by_scheme() {
        let response = sample_response();
        let config = X402ClientConfig::new("0xabc").with_scheme("exact");
        let chosen = select_requirement(&response, &config).unwrap();
        assert_eq!(chosen.scheme, "exact");
    }

    #[test]
    fn test_select_requirement_by_network_wildcard() {
        let response = sample_response();
        let config = X402ClientConfig::new("0xabc").with_network("tron:*");
        let chosen = select_requirement(&response, &config).unwrap();
        assert_eq!(chosen.network, "tron:nile");
    }

    #[test]
    fn test_select_requirement_no_match_fails() {
        let response = sample_response();
        let config = X402ClientConfig::new("0xabc").with_scheme("nonexistent");
        assert!(select_requirement(&response, &config).is_err());
    }
}
