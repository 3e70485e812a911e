//! Reusable full-duplex WebSocket transport with pluggable event handlers

pub mod client;

pub use client::{WsClient, WsConfig, WsHandler};
