//! Venue abstraction: market symbols, order-book events and client traits

pub mod binance;
pub mod bybit;

pub use binance::{BinancePrivateClient, BinancePublicClient};
pub use bybit::{BybitPrivateClient, BybitPublicClient};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::ws::WsClient;
use crate::{EngineError, Result};

/// An exchange-listed trading pair.
///
/// `base_symbol` is the canonical `BASE+QUOTE` form used as the internal key;
/// `venue_symbol` is the concatenated form the venue expects on the wire.
/// Precisions are populated once at startup from the venue's instrument-info
/// endpoint and immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketSymbol {
    /// Base asset, e.g. `ETH` in `ETH+BTC`
    pub base_asset: String,
    /// Quote asset, e.g. `BTC` in `ETH+BTC`
    pub quote_asset: String,
    /// Canonical `BASE+QUOTE` key
    pub base_symbol: String,
    /// Concatenated wire form, e.g. `ETHBTC`
    pub venue_symbol: String,
    /// Decimals used when formatting a base-asset quantity
    pub base_precision: u32,
    /// Decimals used when formatting a price or quote quantity
    pub price_precision: u32,
}

impl MarketSymbol {
    /// Parse a `BASE+QUOTE` string into a symbol with unset precisions
    pub fn parse(base_symbol: &str) -> Result<Self> {
        let (base, quote) = base_symbol.split_once('+').ok_or_else(|| {
            EngineError::Config(format!("malformed base symbol: {base_symbol}"))
        })?;
        if base.is_empty() || quote.is_empty() {
            return Err(EngineError::Config(format!("malformed base symbol: {base_symbol}")).into());
        }
        Ok(Self {
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            base_symbol: base_symbol.to_string(),
            venue_symbol: format!("{base}{quote}"),
            base_precision: 0,
            price_precision: 0,
        })
    }
}

/// One price level of an order book
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceLevel {
    /// Level price
    pub price: f64,
    /// Level quantity
    pub quantity: f64,
}

/// A published view of one symbol's order book.
///
/// `asks[0]` is the best sell offer and `bids[0]` the best buy bid; deeper
/// levels carry no ordering promise.
#[derive(Debug, Clone, Default)]
pub struct OrderBookEvent {
    /// Canonical `BASE+QUOTE` key of the pair
    pub symbol: String,
    /// Sell side, best offer first
    pub asks: Vec<PriceLevel>,
    /// Buy side, best bid first
    pub bids: Vec<PriceLevel>,
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// How the quantity of a market order is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    /// Spend quote currency; triggers margin borrow on venues that support it
    Open,
    /// Trade base currency; triggers auto-repay on venues that support it
    Close,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Open => write!(f, "open"),
            OrderKind::Close => write!(f, "close"),
        }
    }
}

/// Callback invoked with every published order-book event
pub type OrderBookHandler = Arc<dyn Fn(OrderBookEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback invoked with stream-side errors that do not kill the stream
pub type StreamErrorHandler = Arc<dyn Fn(anyhow::Error) + Send + Sync>;

/// Public (unauthenticated) venue operations
#[async_trait]
pub trait PublicClient: Send + Sync {
    /// Venue identifier, e.g. `BINANCE`
    fn name(&self) -> &'static str;

    /// Parse a `BASE+QUOTE` string into a venue symbol; precisions left unset
    fn create_symbol(&self, base_symbol: &str) -> Result<MarketSymbol>;

    /// Populate base and price precisions on every symbol in one HTTP call.
    ///
    /// Fails when any requested symbol is missing from the response.
    async fn get_instruments_info(&self, symbols: &mut [MarketSymbol]) -> Result<()>;

    /// Open a stream over the symbol's top-`levels` book at the venue's
    /// fastest cadence. Decode errors are routed to `err_handler` without
    /// killing the stream; a server-side close triggers a reconnect while the
    /// returned handle is still marked running.
    async fn run_order_book_stream(
        &self,
        symbol: &MarketSymbol,
        levels: &str,
        handler: OrderBookHandler,
        err_handler: StreamErrorHandler,
    ) -> Result<Arc<WsClient>>;
}

/// Private (signed) venue operations
#[async_trait]
pub trait PrivateClient: Send + Sync {
    /// Venue identifier, e.g. `BINANCE`
    fn name(&self) -> &'static str;

    /// API key
    fn key(&self) -> &str;

    /// API secret
    fn secret(&self) -> &str;

    /// Startup guard: fails when the margin balance is below `lot`.
    ///
    /// Venues may perform additional account preparation here.
    async fn apply_initial(&self, lot: f64) -> Result<()>;

    /// Available margin balance in quote terms
    async fn get_margin_balance(&self) -> Result<f64>;

    /// Place a market order and return the executed base quantity
    async fn place_order(
        &self,
        venue_symbol: &str,
        side: OrderSide,
        kind: OrderKind,
        quantity: &str,
    ) -> Result<f64>;
}

/// Create a public client for the named venue
pub fn new_public_client(market: &str) -> Result<Arc<dyn PublicClient>> {
    match market {
        binance::VENUE => Ok(Arc::new(BinancePublicClient::new()?)),
        bybit::VENUE => Ok(Arc::new(BybitPublicClient::new()?)),
        other => Err(EngineError::Config(format!("unsupported market: {other}")).into()),
    }
}

/// Create a private client for the named venue
pub fn new_private_client(market: &str, key: &str, secret: &str) -> Result<Arc<dyn PrivateClient>> {
    match market {
        binance::VENUE => Ok(Arc::new(BinancePrivateClient::new(key, secret)?)),
        bybit::VENUE => Ok(Arc::new(BybitPrivateClient::new(key, secret)?)),
        other => Err(EngineError::Config(format!("unsupported market: {other}")).into()),
    }
}

/// Number of decimals encoded by a venue step string: the characters between
/// the dot and the first `1` (`"0.0001"` gives 4, `"1"` and `"10.0"` give 0)
pub fn precision_from_step(step: &str) -> u32 {
    let Some(dot) = step.find('.') else { return 0 };
    match step.find('1') {
        Some(one) if one > dot => (one - dot) as u32,
        _ => 0,
    }
}

/// Parse a venue decimal string; malformed values yield zero ("no liquidity")
pub fn parse_decimal(value: &str) -> f64 {
    value.parse().unwrap_or(0.0)
}

/// Assemble `k=v&k=v` from parameters already sorted by key.
///
/// Venue signatures depend on a stable ordering, so all HTTP query strings go
/// through this one function.
pub(crate) fn sorted_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`
pub(crate) fn hmac_sha256_hex(secret: &str, payload: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| EngineError::Config(format!("invalid signing secret: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
