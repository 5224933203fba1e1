//! Structured logging setup ([AMBIENT]).
//!
//! Every binary (server, facilitator, client demos) calls [`init`] once at
//! startup. Verbosity is controlled by `RUST_LOG`, defaulting to `info` for
//! this crate and `warn` for dependencies.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global `tracing` subscriber from `RUST_LOG`.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,x402_tron=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
