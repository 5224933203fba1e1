//! Example x402 resource server using Axum.
//!
//! Protects a `/weather` endpoint behind a $0.05 USDT-on-TRON-Nile payment,
//! delegating verification and settlement to a facilitator over HTTP.
//!
//! Run with:
//! ```bash
//! cargo run --example server
//! ```
//!
//! Environment variables: see [`x402_tron::config::ServerConfig`] --
//! `FACILITATOR_URL`, `SERVER_PAY_TO`, `SERVER_LISTEN_ADDR`.

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::json;
use std::sync::Arc;
use x402_tron::config::ServerConfig;
use x402_tron::server::{create_payment_required_response, verify_and_settle_payment, FacilitatorClient, RouteConfig};
use x402_tron::utils::decode_payment_header;

#[derive(Clone)]
struct AppState {
    route: RouteConfig,
    facilitator: FacilitatorClient,
}

enum AppError {
    InvalidPayment(String),
    PaymentFailed(String),
    ServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InvalidPayment(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::PaymentFailed(msg) => (StatusCode::PAYMENT_REQUIRED, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn weather_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, AppError> {
    let Some(header) = headers.get("PAYMENT-SIGNATURE") else {
        let payment_required = create_payment_required_response(&state.route, "/weather", &state.facilitator)
            .await
            .map_err(|e| AppError::ServerError(e.to_string()))?;
        let body_json = serde_json::to_string(&payment_required).map_err(|e| AppError::ServerError(e.to_string()))?;
        let required_header = BASE64.encode(body_json.as_bytes());
        return Ok((
            StatusCode::PAYMENT_REQUIRED,
            [(HeaderName::from_static("payment-required"), required_header)],
            Json(payment_required),
        )
            .into_response());
    };

    let header_str = header
        .to_str()
        .map_err(|_| AppError::InvalidPayment("invalid PAYMENT-SIGNATURE header encoding".to_string()))?;
    let payload = decode_payment_header(header_str).map_err(|e| AppError::InvalidPayment(e.to_string()))?;

    let settlement = verify_and_settle_payment(&payload, &state.route, &state.facilitator)
        .await
        .map_err(|e| AppError::PaymentFailed(e.to_string()))?;

    if !settlement.success {
        return Err(AppError::PaymentFailed(
            settlement.error_reason.unwrap_or_else(|| "settlement failed".to_string()),
        ));
    }

    let response_json = serde_json::to_string(&settlement).map_err(|e| AppError::ServerError(e.to_string()))?;
    let response_header = BASE64.encode(response_json.as_bytes());

    let weather_data = json!({
        "location": "San Francisco",
        "temperature": 68,
        "conditions": "Sunny",
        "transaction": settlement.transaction,
    });

    Ok((
        StatusCode::OK,
        [(HeaderName::from_static("payment-response"), response_header)],
        Json(weather_data),
    )
        .into_response())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "protocol": "x402" }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    x402_tron::telemetry::init();

    let config = ServerConfig::from_env()?;
    let route = RouteConfig::new(
        config.pay_to.clone(),
        vec!["tron:nile".to_string()],
        "0.05 USDT",
        "Weather API access",
    );
    let facilitator = FacilitatorClient::new(config.facilitator_url.clone());

    let state = Arc::new(AppState { route, facilitator });

    let app = Router::new()
        .route("/weather", get(weather_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
