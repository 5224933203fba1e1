//! Resource-server orchestration (spec §4.5, §4.8).
//!
//! Generalizes the teacher's single-scheme `PaymentConfig`/
//! `verify_and_settle_payment` into a route that can advertise several
//! `(scheme, network)` options for the same resource, each priced from the
//! same `<decimal> <SYMBOL>` string via the token registry (spec §4.8), and
//! quoted against a live facilitator rather than echoing a canned fee.

use crate::address::Address;
use crate::errors::{EngineError, Result};
use crate::tokens::TokenRegistry;
use crate::types::{
    DeliveryKind, PaymentPayload, PaymentPermit, PaymentPermitContext, PaymentPermitContextMeta,
    PaymentRequired, PaymentRequiredExtensions, PaymentRequirements, PaymentRequirementsExtra,
    ResourceInfo, SettleResponse, VerifyResponse, X402_VERSION,
};
use reqwest::Client;
use std::str::FromStr;
use std::time::Duration;

const PERMIT_VALIDITY_SECONDS: u64 = 3600;

/// One priced route: the asset/network/scheme options a resource accepts,
/// all quoting the same underlying price (spec §4.8).
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// merchant recipient address, in the family-display form for each network
    pub pay_to: String,
    /// networks this route accepts payment on, e.g. `["tron:nile", "eip155:8453"]`
    pub networks: Vec<String>,
    /// schemes offered per network, e.g. `["exact_permit", "exact"]`
    pub schemes: Vec<String>,
    /// price string, `"<decimal> <SYMBOL>"`, e.g. `"0.05 USDT"`
    pub price: String,
    /// human-readable description shown in the 402 body
    pub description: String,
    /// how long a quote stays valid before the client must re-request
    pub max_timeout_seconds: u64,
}

impl RouteConfig {
    /// Creates a route for one or more networks, both schemes offered by default.
    pub fn new(
        pay_to: impl Into<String>,
        networks: Vec<String>,
        price: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        RouteConfig {
            pay_to: pay_to.into(),
            networks,
            schemes: vec![
                crate::schemes::permit::SCHEME_NAME.to_string(),
                crate::schemes::transfer_auth::SCHEME_NAME.to_string(),
            ],
            price: price.into(),
            description: description.into(),
            max_timeout_seconds: 300,
        }
    }

    /// Restricts this route to a specific scheme list.
    pub fn with_schemes(mut self, schemes: Vec<String>) -> Self {
        self.schemes = schemes;
        self
    }

    /// Builds one `PaymentRequirements` per `(network, scheme)` pair this
    /// route offers, pricing each against that network's token registry
    /// entry (spec §4.8).
    pub fn to_requirements(&self) -> Result<Vec<PaymentRequirements>> {
        let mut out = Vec::new();
        for network in &self.networks {
            let (symbol, amount_decimal) = parse_price(&self.price)?;
            let token = TokenRegistry
                .find_by_symbol(network, &symbol)
                .ok_or_else(|| EngineError::UnknownToken(symbol.clone()))?;
            let amount = to_smallest_units(amount_decimal, token.decimals);

            for scheme in &self.schemes {
                let extra = if scheme == crate::schemes::transfer_auth::SCHEME_NAME {
                    Some(PaymentRequirementsExtra {
                        name: Some(token.eip712_name.to_string()),
                        version: Some(token.eip712_version.to_string()),
                        fee: None,
                    })
                } else {
                    None
                };
                out.push(PaymentRequirements {
                    scheme: scheme.clone(),
                    network: network.clone(),
                    amount: amount.clone(),
                    asset: token.address.to_string(),
                    pay_to: self.pay_to.clone(),
                    max_timeout_seconds: Some(self.max_timeout_seconds),
                    extra,
                });
            }
        }
        Ok(out)
    }
}

/// Parses `"<decimal> <SYMBOL>"` into its symbol and decimal value (spec §4.8).
fn parse_price(price: &str) -> Result<(String, f64)> {
    let mut parts = price.split_whitespace();
    let value = parts
        .next()
        .ok_or_else(|| EngineError::InvalidAmount(format!("empty price string: {price}")))?;
    let symbol = parts
        .next()
        .ok_or_else(|| EngineError::InvalidAmount(format!("missing symbol in price: {price}")))?;
    if parts.next().is_some() {
        return Err(EngineError::InvalidAmount(format!("malformed price: {price}")));
    }
    let amount: f64 = value
        .parse()
        .map_err(|_| EngineError::InvalidAmount(format!("not a number: {value}")))?;
    Ok((symbol.to_string(), amount))
}

/// Converts a decimal amount to its smallest-unit decimal-string form,
/// flooring per spec §4.8 rather than rounding.
fn to_smallest_units(value: f64, decimals: u8) -> String {
    let scale = 10f64.powi(decimals as i32);
    let units = (value * scale).floor();
    format!("{units:.0}")
}

/// Thin HTTP client over the facilitator's `/verify`, `/settle`,
/// `/supported`, `/fee/quote` surface (spec §6).
#[derive(Clone)]
pub struct FacilitatorClient {
    http: Client,
    base_url: String,
}

impl FacilitatorClient {
    /// Builds a client against `base_url` (no trailing slash required).
    pub fn new(base_url: impl Into<String>) -> Self {
        FacilitatorClient {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post_json<T: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<R> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        Ok(response.json().await?)
    }

    /// Calls `/fee/quote` for one requirement; `None` if the facilitator
    /// reports it as unsupported (`404`/`{code: "unsupported"}`, spec §6).
    pub async fn fee_quote(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<Option<crate::types::FeeQuoteResponse>> {
        #[derive(serde::Serialize)]
        struct Body<'a> {
            accept: &'a PaymentRequirements,
        }
        let response = self
            .http
            .post(format!("{}/fee/quote", self.base_url))
            .timeout(Duration::from_secs(10))
            .json(&Body { accept: requirements })
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }

    /// Calls `/verify`.
    pub async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse> {
        #[derive(serde::Serialize)]
        struct Body<'a> {
            #[serde(rename = "paymentPayload")]
            payment_payload: &'a PaymentPayload,
            #[serde(rename = "paymentRequirements")]
            payment_requirements: &'a PaymentRequirements,
        }
        self.post_json(
            "/verify",
            &Body {
                payment_payload: payload,
                payment_requirements: requirements,
            },
            Duration::from_secs(30),
        )
        .await
    }

    /// Calls `/settle`.
    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse> {
        #[derive(serde::Serialize)]
        struct Body<'a> {
            #[serde(rename = "paymentPayload")]
            payment_payload: &'a PaymentPayload,
            #[serde(rename = "paymentRequirements")]
            payment_requirements: &'a PaymentRequirements,
        }
        self.post_json(
            "/settle",
            &Body {
                payment_payload: payload,
                payment_requirements: requirements,
            },
            Duration::from_secs(60),
        )
        .await
    }
}

/// Builds the full `402 Payment Required` body for `route` (spec §4.5 step
/// 5): one option per `(network, scheme)`, each carrying a live fee quote,
/// options the facilitator doesn't support are dropped.
pub async fn create_payment_required_response(
    route: &RouteConfig,
    resource_url: &str,
    facilitator: &FacilitatorClient,
) -> Result<PaymentRequired> {
    let mut accepts = Vec::new();
    let mut caller = None;

    for mut requirement in route.to_requirements()? {
        let Some(quote) = facilitator.fee_quote(&requirement).await? else {
            continue;
        };
        if caller.is_none() {
            caller = quote.fee.caller.clone();
        }
        let mut extra = requirement.extra.take().unwrap_or_default();
        extra.fee = Some(quote.fee);
        requirement.extra = Some(extra);
        accepts.push(requirement);
    }

    let now = crate::utils::current_timestamp();
    let extensions = PaymentRequiredExtensions {
        payment_permit_context: Some(PaymentPermitContext {
            meta: PaymentPermitContextMeta {
                kind: DeliveryKind::PaymentOnly,
                payment_id: format!("0x{}", hex::encode(random_16_bytes())),
                nonce: crate::utils::generate_nonce(),
                valid_after: now,
                valid_before: now + PERMIT_VALIDITY_SECONDS,
            },
        }),
        other: {
            let mut map = std::collections::HashMap::new();
            if let Some(caller) = caller {
                map.insert("caller".to_string(), serde_json::json!(caller));
            }
            map
        },
    };

    Ok(PaymentRequired {
        x402_version: X402_VERSION,
        error: None,
        resource: Some(ResourceInfo {
            url: Some(resource_url.to_string()),
            description: Some(route.description.clone()),
            mime_type: None,
        }),
        accepts,
        extensions: Some(extensions),
    })
}

fn random_16_bytes() -> [u8; 16] {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Anti-tampering check run before contacting the facilitator (spec §4.5):
/// the signed payload's embedded payment fields must match the quoted
/// requirement, after address normalization.
fn check_payload_matches_requirements(
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
) -> Result<()> {
    let required_amount = crate::utils::string_to_u256(&requirements.amount)?;

    if let Some(permit) = &payload.payload.payment_permit {
        let pay_token = Address::from_str(&permit.payment.pay_token)?;
        let accepted_token = Address::from_str(&requirements.asset)?;
        let pay_to = Address::from_str(&permit.payment.pay_to)?;
        let accepted_to = Address::from_str(&requirements.pay_to)?;
        let pay_amount = crate::utils::string_to_u256(&permit.payment.pay_amount)?;

        if pay_token.bytes() != accepted_token.bytes()
            || pay_to.bytes() != accepted_to.bytes()
            || pay_amount < required_amount
        {
            return Err(EngineError::PayloadMismatch(
                "signed payment does not match quoted requirements".to_string(),
            ));
        }
        return Ok(());
    }

    if let Some(auth) = &payload.payload.transfer_authorization {
        let to = Address::from_str(&auth.to)?;
        let accepted_to = Address::from_str(&requirements.pay_to)?;
        let value = crate::utils::string_to_u256(&auth.value)?;

        if to.bytes() != accepted_to.bytes() || value < required_amount {
            return Err(EngineError::PayloadMismatch(
                "signed authorization does not match quoted requirements".to_string(),
            ));
        }
        return Ok(());
    }

    Err(EngineError::InvalidPayload(
        "payload carries neither a permit nor a transfer authorization".to_string(),
    ))
}

/// Drives `verify` then `settle` against the facilitator for an already
/// decoded `PAYMENT-SIGNATURE` payload (spec §4.5 step 4).
pub async fn verify_and_settle_payment(
    payload: &PaymentPayload,
    route: &RouteConfig,
    facilitator: &FacilitatorClient,
) -> Result<SettleResponse> {
    let requirements = route
        .to_requirements()?
        .into_iter()
        .find(|r| r.scheme == payload.accepted.scheme && r.network == payload.accepted.network)
        .ok_or_else(|| EngineError::UnsupportedNetworkScheme {
            network: payload.accepted.network.clone(),
            scheme: payload.accepted.scheme.clone(),
        })?;

    check_payload_matches_requirements(payload, &requirements)?;

    let verify_result = facilitator.verify(payload, &requirements).await?;
    if !verify_result.is_valid {
        tracing::warn!(
            reason = ?verify_result.invalid_reason,
            "facilitator rejected payment at verify"
        );
        return Ok(SettleResponse {
            success: false,
            transaction: None,
            network: Some(requirements.network.clone()),
            error_reason: verify_result.invalid_reason,
        });
    }

    let settle_result = facilitator.settle(payload, &requirements).await?;
    if settle_result.success {
        tracing::info!(network = %requirements.network, "payment settled");
    } else {
        tracing::error!(
            reason = ?settle_result.error_reason,
            "settlement failed; check buyer balance, allowance, and network connectivity"
        );
    }
    Ok(settle_result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_splits_value_and_symbol() {
        let (symbol, value) = parse_price("0.05 USDT").unwrap();
        assert_eq!(symbol, "USDT");
        assert!((value - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_price_rejects_malformed() {
        assert!(parse_price("not-a-price").is_err());
        assert!(parse_price("1 2 3").is_err());
    }

    #[test]
    fn test_smallest_units_floors() {
        assert_eq!(to_smallest_units(0.0000015, 6), "1");
        assert_eq!(to_smallest_units(1.0, 6), "1000000");
    }

    #[test]
    fn test_route_to_requirements_builds_one_per_network_scheme() {
        let route = RouteConfig::new(
            "TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV",
            vec!["tron:nile".to_string()],
            "0.05 USDT",
            "demo resource",
        );
        let requirements = route.to_requirements().unwrap();
        assert_eq!(requirements.len(), 2);
        assert!(requirements.iter().any(|r| r.scheme == "exact_permit"));
        assert!(requirements.iter().any(|r| r.scheme == "exact"));
    }

    #[test]
    fn test_route_to_requirements_unknown_symbol_fails() {
        let route = RouteConfig::new(
            "TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV",
            vec!["tron:nile".to_string()],
            "1 DOGE",
            "demo resource",
        );
        assert!(route.to_requirements().is_err());
    }

    fn sample_permit_requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: crate::schemes::permit::SCHEME_NAME.to_string(),
            network: "tron:nile".to_string(),
            amount: "1000000".to_string(),
            asset: "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf".to_string(),
            pay_to: "TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV".to_string(),
            max_timeout_seconds: Some(3600),
            extra: None,
        }
    }

    fn sample_permit_payload(pay_amount: &str, pay_to: &str) -> PaymentPayload {
        use crate::types::{Fee, Payment, PaymentPayloadData, PermitMeta};

        let requirements = sample_permit_requirements();
        PaymentPayload {
            x402_version: X402_VERSION,
            resource: None,
            accepted: requirements.clone(),
            payload: PaymentPayloadData {
                signature: "0x00".to_string(),
                merchant_signature: None,
                payment_permit: Some(PaymentPermit {
                    meta: PermitMeta {
                        kind: DeliveryKind::PaymentOnly,
                        payment_id: "0x00".to_string(),
                        nonce: "1".to_string(),
                        valid_after: 0,
                        valid_before: u64::MAX,
                    },
                    buyer: "TBuyer1111111111111111111111111111".to_string(),
                    caller: "TCaller111111111111111111111111111".to_string(),
                    payment: Payment {
                        pay_token: requirements.asset.clone(),
                        pay_amount: pay_amount.to_string(),
                        pay_to: pay_to.to_string(),
                    },
                    fee: Fee {
                        fee_to: "TFee11111111111111111111111111111".to_string(),
                        fee_amount: "0".to_string(),
                    },
                }),
                transfer_authorization: None,
            },
            extensions: None,
        }
    }

    /// Scenario 3 (spec §8): a signed permit whose `payAmount` falls short of
    /// the quoted requirement is rejected before the facilitator is ever
    /// contacted.
    #[test]
    fn test_amount_shortfall_rejected_before_facilitator_contact() {
        let requirements = sample_permit_requirements();
        let payload = sample_permit_payload("999999", &requirements.pay_to);

        let result = check_payload_matches_requirements(&payload, &requirements);
        assert!(matches!(result, Err(EngineError::PayloadMismatch(_))));
    }

    #[test]
    fn test_payto_mismatch_rejected_before_facilitator_contact() {
        let requirements = sample_permit_requirements();
        let payload = sample_permit_payload(&requirements.amount, "TSomeoneElse1111111111111111111111");

        let result = check_payload_matches_requirements(&payload, &requirements);
        assert!(matches!(result, Err(EngineError::PayloadMismatch(_))));
    }

    #[test]
    fn test_matching_amount_and_payto_pass_anti_tamper_check() {
        let requirements = sample_permit_requirements();
        let payload = sample_permit_payload(&requirements.amount, &requirements.pay_to);

        assert!(check_payload_matches_requirements(&payload, &requirements).is_ok());
    }
}
