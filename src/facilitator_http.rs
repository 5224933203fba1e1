//! Facilitator HTTP boundary (spec §4.6/§6, [AMBIENT]).
//!
//! Thin `axum` wrappers around [`crate::facilitator::Facilitator`], grounded
//! on the pack's `MakuStudio-x402-facilitator` handlers: one route per
//! operation, `#[instrument]` on each, errors mapped to a JSON body with a
//! status code rather than propagated as a panic.

use crate::errors::EngineError;
use crate::facilitator::Facilitator;
use crate::types::{PaymentPayload, PaymentRequirements};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::instrument;

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::UnsupportedNetwork(_)
            | EngineError::UnknownToken(_)
            | EngineError::UnsupportedNetworkScheme { .. }
            | EngineError::InvalidPayload(_)
            | EngineError::InvalidAddress(_)
            | EngineError::InvalidAmount(_)
            | EngineError::PayloadMismatch(_)
            | EngineError::MissingField(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(serde::Deserialize)]
struct VerifyBody {
    #[serde(rename = "paymentPayload")]
    payment_payload: PaymentPayload,
    #[serde(rename = "paymentRequirements")]
    payment_requirements: PaymentRequirements,
}

#[derive(serde::Deserialize)]
struct FeeQuoteBody {
    accept: PaymentRequirements,
}

/// Builds the facilitator's router: `/verify`, `/settle`, `/supported`,
/// `/fee/quote`.
pub fn routes(facilitator: Arc<Facilitator>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/verify", post(post_verify))
        .route("/settle", post(post_settle))
        .route("/supported", get(get_supported))
        .route("/fee/quote", post(post_fee_quote))
        .layer(TraceLayer::new_for_http())
        .with_state(facilitator)
}

#[instrument(skip_all)]
async fn root() -> impl IntoResponse {
    Json(json!({ "service": "x402 facilitator", "version": crate::types::X402_VERSION }))
}

#[instrument(skip(state, body))]
async fn post_verify(State(state): State<Arc<Facilitator>>, Json(body): Json<VerifyBody>) -> impl IntoResponse {
    match state.verify(&body.payment_payload, &body.payment_requirements).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => error.into_response(),
    }
}

#[instrument(skip(state, body))]
async fn post_settle(State(state): State<Arc<Facilitator>>, Json(body): Json<VerifyBody>) -> impl IntoResponse {
    match state.settle(&body.payment_payload, &body.payment_requirements).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => error.into_response(),
    }
}

#[instrument(skip_all)]
async fn get_supported(State(state): State<Arc<Facilitator>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.supported())).into_response()
}

#[instrument(skip(state, body))]
async fn post_fee_quote(State(state): State<Arc<Facilitator>>, Json(body): Json<FeeQuoteBody>) -> impl IntoResponse {
    match state.fee_quote(&body.accept) {
        Some(quote) => (StatusCode::OK, Json(quote)).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "code": "unsupported" }))).into_response(),
    }
}
