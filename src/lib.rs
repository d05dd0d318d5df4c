pub mod amount;
pub mod config;
pub mod delta;
pub mod fetch;
pub mod groups;
pub mod history;
pub mod report;
pub mod reporter;
pub mod runner;
pub mod transport;
pub mod types;
pub mod webhook;

/// Faucet bot that answers `/balance <address>`.
pub const BOT_USERNAME: &str = "QuantusFaucetBot";
