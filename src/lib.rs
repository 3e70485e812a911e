//! Triangular Arbitrage Trading Engine
//!
//! Consumes real-time order-book streams for a configured universe of trading
//! pairs, continuously evaluates triangles of three pairs that close a
//! currency cycle, and executes a three-leg market-order sequence with
//! best-effort rollback when the round-trip rate clears the profitability
//! threshold.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod market;
pub mod robot;
pub mod server;
pub mod utils;
pub mod ws;

// Re-export commonly used types
pub use config::{RobotConfig, ServerConfig};
pub use market::{MarketSymbol, OrderBookEvent, PriceLevel};
pub use robot::Robot;
pub use server::RobotController;

/// Result type used throughout the application
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the arbitrage engine
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Configuration error (malformed input files, missing symbols)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error (HTTP or WebSocket transport)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Data parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Non-zero response code returned by a venue
    #[error("{venue} error: code: {code}, message: {message}")]
    Venue {
        /// Venue identifier
        venue: String,
        /// Venue response code
        code: i64,
        /// Venue response message
        message: String,
    },

    /// Trading error (balance guard, order rejection)
    #[error("Trading error: {0}")]
    Trading(String),

    /// Lifecycle precondition violation, surfaced to the control plane
    #[error("{0}")]
    InvalidState(String),
}

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
