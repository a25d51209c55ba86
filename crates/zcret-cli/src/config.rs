//! Command-line and environment configuration.

use std::time::Duration;

use clap::Parser;
use zcret_client::SessionConfig;
use zcret_core::{
    ConnectionConfig, StoreConfig, TransportKind, connection::DEFAULT_ENDPOINT,
    diagnostics::DEFAULT_CAPACITY,
};

/// Wallet reported by the mock identity provider when none is configured.
pub const MOCK_WALLET: &str = "11111111111111111111111111111111111111111111";

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No transport left to dial
    #[error("at least one transport is required")]
    NoTransports,

    /// Attempt limit of zero
    #[error("max reconnect attempts must be at least 1")]
    NoAttempts,

    /// Store that cannot hold anything
    #[error("message capacity must be at least 1")]
    NoCapacity,
}

/// Zcret terminal chat client.
#[derive(Debug, Clone, Parser)]
#[command(name = "zcret", version, about)]
pub struct Args {
    /// Chat server base URL
    #[arg(long, env = "ZCRET_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Wallet address used by `/connect`
    #[arg(long, env = "ZCRET_WALLET", default_value = MOCK_WALLET)]
    pub wallet: String,

    /// Connect on startup instead of waiting for `/connect`
    #[arg(long)]
    pub auto_connect: bool,

    /// Transports to try within an attempt, in order
    #[arg(
        long,
        env = "ZCRET_TRANSPORTS",
        value_delimiter = ',',
        default_value = "websocket,polling"
    )]
    pub transports: Vec<TransportKind>,

    /// Dial attempts per failure streak
    #[arg(long, env = "ZCRET_MAX_RECONNECT_ATTEMPTS", default_value_t = 5)]
    pub max_reconnect_attempts: u32,

    /// Milliseconds between attempts
    #[arg(long, env = "ZCRET_RECONNECT_DELAY_MS", default_value_t = 1000)]
    pub reconnect_delay_ms: u64,

    /// Milliseconds one dial may take
    #[arg(long, env = "ZCRET_CONNECT_TIMEOUT_MS", default_value_t = 20_000)]
    pub connect_timeout_ms: u64,

    /// Messages kept in memory
    #[arg(long, env = "ZCRET_MAX_MESSAGES", default_value_t = 10_000)]
    pub max_messages: usize,

    /// Diagnostic entries kept in memory
    #[arg(long, env = "ZCRET_DIAGNOSTICS", default_value_t = DEFAULT_CAPACITY)]
    pub diagnostics_capacity: usize,

    /// Tracing filter directive
    #[arg(long, env = "RUST_LOG", default_value = "zcret=info")]
    pub log_filter: String,
}

impl Args {
    /// Build the session configuration.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        if self.transports.is_empty() {
            return Err(ConfigError::NoTransports);
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.max_messages == 0 {
            return Err(ConfigError::NoCapacity);
        }

        let mut transports = Vec::with_capacity(self.transports.len());
        for kind in &self.transports {
            if !transports.contains(kind) {
                transports.push(*kind);
            }
        }

        Ok(SessionConfig {
            connection: ConnectionConfig {
                endpoint: self.endpoint.clone(),
                max_reconnect_attempts: self.max_reconnect_attempts,
                reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                preferred_transport_order: transports,
            },
            store: StoreConfig { max_messages: self.max_messages },
            diagnostics_capacity: self.diagnostics_capacity,
        })
    }
}
