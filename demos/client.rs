//! Example x402 client.
//!
//! Drives the full 402 handshake against a protected resource, signing
//! whichever scheme the server prefers.
//!
//! Run with:
//! ```bash
//! cargo run --example client
//! ```
//!
//! Environment variables: `CLIENT_PRIVATE_KEY`, `RESOURCE_URL`.

use x402_tron::client::{get, X402ClientConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    x402_tron::telemetry::init();

    let private_key = std::env::var("CLIENT_PRIVATE_KEY")
        .unwrap_or_else(|_| "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff8".to_string());
    let resource_url =
        std::env::var("RESOURCE_URL").unwrap_or_else(|_| "http://localhost:8402/weather".to_string());

    let config = X402ClientConfig::new(private_key);
    let response = get(&config, &resource_url).await?;

    println!("status: {}", response.status());
    println!("body: {}", response.text().await?);

    Ok(())
}
