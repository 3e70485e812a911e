//! Binance venue clients: order-book streaming, instrument metadata and
//! signed margin trading

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::market::{
    hmac_sha256_hex, parse_decimal, precision_from_step, sorted_query, MarketSymbol,
    OrderBookEvent, OrderBookHandler, OrderKind, OrderSide, PriceLevel, PrivateClient,
    PublicClient, StreamErrorHandler,
};
use crate::ws::{WsClient, WsHandler};
use crate::{EngineError, Result};

/// Venue identifier
pub const VENUE: &str = "BINANCE";

const HOST: &str = "https://api.binance.com";
const WS_URL: &str = "wss://stream.binance.com:9443/ws";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/56.0.2924.87 Safari/537.36";

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| EngineError::Connection(format!("build http client: {e}")).into())
}

/// Public Binance client
pub struct BinancePublicClient {
    http: reqwest::Client,
}

impl BinancePublicClient {
    /// Create a public client with the venue's default endpoints
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: http_client()?,
        })
    }
}

#[async_trait]
impl PublicClient for BinancePublicClient {
    fn name(&self) -> &'static str {
        VENUE
    }

    fn create_symbol(&self, base_symbol: &str) -> Result<MarketSymbol> {
        MarketSymbol::parse(base_symbol)
    }

    async fn get_instruments_info(&self, symbols: &mut [MarketSymbol]) -> Result<()> {
        let request = symbols
            .iter()
            .map(|s| format!("\"{}\"", s.venue_symbol))
            .collect::<Vec<_>>()
            .join(",");

        let mut params = BTreeMap::new();
        params.insert("symbols".to_string(), format!("[{request}]"));
        let url = format!("{HOST}/api/v3/exchangeInfo?{}", sorted_query(&params));

        let response: ExchangeInfoResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Connection(format!("binance request failed: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::Parse(format!("decode binance response: {e}")))?;

        if response.code != 0 {
            return Err(EngineError::Venue {
                venue: VENUE.to_string(),
                code: response.code,
                message: response.message,
            }
            .into());
        }

        apply_instruments(symbols, &response.symbols)
    }

    async fn run_order_book_stream(
        &self,
        symbol: &MarketSymbol,
        levels: &str,
        handler: OrderBookHandler,
        err_handler: StreamErrorHandler,
    ) -> Result<Arc<WsClient>> {
        let stream = Arc::new(BookStream {
            symbol: symbol.clone(),
            levels: levels.to_string(),
            handler,
            err_handler,
        });
        let ws = WsClient::new(stream);
        Arc::clone(&ws).run(WS_URL, false, Duration::ZERO).await?;
        Ok(ws)
    }
}

/// Handler for one symbol's depth stream.
///
/// Binance pushes a full snapshot of the top `levels` every 100 ms, so each
/// message maps directly to one published event.
struct BookStream {
    symbol: MarketSymbol,
    levels: String,
    handler: OrderBookHandler,
    err_handler: StreamErrorHandler,
}

#[async_trait]
impl WsHandler for BookStream {
    async fn on_open(&self, ws: &Arc<WsClient>) {
        let subscription = json!({
            "method": "SUBSCRIBE",
            "params": [format!(
                "{}@depth{}@100ms",
                self.symbol.venue_symbol.to_lowercase(),
                self.levels
            )],
            "id": Utc::now().timestamp_millis(),
        });
        if let Err(err) = ws.send(&subscription).await {
            (self.err_handler)(err);
            return;
        }
        info!(venue = VENUE, symbol = %self.symbol.base_symbol, "stream started");
    }

    async fn on_message(&self, _ws: &Arc<WsClient>, data: &[u8]) {
        match parse_depth_event(&self.symbol, data) {
            Ok(Some(event)) => (self.handler)(event).await,
            Ok(None) => {}
            Err(err) => (self.err_handler)(err),
        }
    }

    async fn on_error(&self, err: anyhow::Error) {
        (self.err_handler)(err);
    }

    async fn on_close(&self, ws: &Arc<WsClient>) {
        info!(venue = VENUE, symbol = %self.symbol.base_symbol, "stream stopped");
        if ws.is_running() {
            if let Some(config) = ws.config().await {
                if let Err(err) = Arc::clone(ws)
                    .run(&config.endpoint, config.keep_alive, config.timeout)
                    .await
                {
                    (self.err_handler)(err);
                }
            }
        }
    }

    async fn on_ping(&self, ws: &Arc<WsClient>, payload: Vec<u8>) {
        let _ = ws.send_pong(payload).await;
    }
}

#[derive(Debug, Deserialize)]
struct DepthEvent {
    #[serde(default)]
    bids: Vec<[String; 2]>,
    #[serde(default)]
    asks: Vec<[String; 2]>,
}

/// Decode one stream message. Returns `None` for messages without ask levels
/// (subscription acknowledgements and empty books are skipped, not errors).
fn parse_depth_event(symbol: &MarketSymbol, data: &[u8]) -> Result<Option<OrderBookEvent>> {
    let event: DepthEvent = serde_json::from_slice(data)
        .map_err(|e| EngineError::Parse(format!("decode depth message: {e}")))?;

    if event.asks.is_empty() {
        return Ok(None);
    }

    Ok(Some(OrderBookEvent {
        symbol: symbol.base_symbol.clone(),
        asks: parse_levels(&event.asks),
        bids: parse_levels(&event.bids),
    }))
}

fn parse_levels(levels: &[[String; 2]]) -> Vec<PriceLevel> {
    levels
        .iter()
        .map(|level| PriceLevel {
            price: parse_decimal(&level[0]),
            quantity: parse_decimal(&level[1]),
        })
        .collect()
}

fn apply_instruments(symbols: &mut [MarketSymbol], list: &[InstrumentData]) -> Result<()> {
    for symbol in symbols.iter_mut() {
        let data = list
            .iter()
            .find(|item| item.symbol == symbol.venue_symbol)
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "no precision information for symbol {}",
                    symbol.base_symbol
                ))
            })?;
        for filter in &data.filters {
            match filter.filter_type.as_str() {
                "PRICE_FILTER" => symbol.price_precision = precision_from_step(&filter.tick_size),
                "LOT_SIZE" => symbol.base_precision = precision_from_step(&filter.step_size),
                _ => {}
            }
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    #[serde(default)]
    code: i64,
    #[serde(rename = "msg", default)]
    message: String,
    #[serde(default)]
    symbols: Vec<InstrumentData>,
}

#[derive(Debug, Deserialize)]
struct InstrumentData {
    symbol: String,
    #[serde(default)]
    filters: Vec<InstrumentFilter>,
}

#[derive(Debug, Deserialize)]
struct InstrumentFilter {
    #[serde(rename = "filterType")]
    filter_type: String,
    #[serde(rename = "tickSize", default)]
    tick_size: String,
    #[serde(rename = "stepSize", default)]
    step_size: String,
}

/// Private Binance client for the margin account
pub struct BinancePrivateClient {
    key: String,
    secret: String,
    http: reqwest::Client,
}

impl BinancePrivateClient {
    /// Create a private client with the given credentials
    pub fn new(key: &str, secret: &str) -> Result<Self> {
        Ok(Self {
            key: key.to_string(),
            secret: secret.to_string(),
            http: http_client()?,
        })
    }

    async fn perform_signed<T: DeserializeOwned>(
        &self,
        params: BTreeMap<String, String>,
        path: &str,
        method: Method,
    ) -> Result<T> {
        let query = signed_query(&self.secret, &params)?;
        let url = format!("{HOST}/{path}?{query}");

        self.http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.key)
            .send()
            .await
            .map_err(|e| EngineError::Connection(format!("binance request failed: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::Parse(format!("decode binance response: {e}")).into())
    }
}

#[async_trait]
impl PrivateClient for BinancePrivateClient {
    fn name(&self) -> &'static str {
        VENUE
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn secret(&self) -> &str {
        &self.secret
    }

    async fn apply_initial(&self, lot: f64) -> Result<()> {
        let balance = self.get_margin_balance().await?;
        if balance < lot {
            return Err(EngineError::Trading(
                "not enough balance (should be greater than lot)".to_string(),
            )
            .into());
        }
        Ok(())
    }

    async fn get_margin_balance(&self) -> Result<f64> {
        let mut params = BTreeMap::new();
        params.insert(
            "timestamp".to_string(),
            Utc::now().timestamp_millis().to_string(),
        );

        let response: MarginAccountResponse = self
            .perform_signed(params, "sapi/v1/margin/account", Method::GET)
            .await?;

        if response.code != 0 {
            return Err(EngineError::Venue {
                venue: VENUE.to_string(),
                code: response.code,
                message: response.message,
            }
            .into());
        }

        Ok(parse_decimal(&response.collateral_value))
    }

    async fn place_order(
        &self,
        venue_symbol: &str,
        side: OrderSide,
        kind: OrderKind,
        quantity: &str,
    ) -> Result<f64> {
        let now = Utc::now().timestamp_millis();
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), venue_symbol.to_string());
        params.insert("side".to_string(), side.to_string());
        params.insert("type".to_string(), "MARKET".to_string());
        params.insert("timestamp".to_string(), now.to_string());
        params.insert("newClientOrderId".to_string(), now.to_string());
        params.insert("isIsolated".to_string(), "False".to_string());

        match kind {
            // A market buy/sell by quote amount; quote precision applies.
            OrderKind::Open => {
                params.insert("quoteOrderQty".to_string(), quantity.to_string());
                params.insert("sideEffectType".to_string(), "MARGIN_BUY".to_string());
            }
            // A market order in base units; base precision applies.
            OrderKind::Close => {
                params.insert("quantity".to_string(), quantity.to_string());
                params.insert("sideEffectType".to_string(), "AUTO_REPAY".to_string());
            }
        }

        let response: OrderResponse = self
            .perform_signed(params, "sapi/v1/margin/order", Method::POST)
            .await?;

        if response.code != 0 {
            return Err(EngineError::Venue {
                venue: VENUE.to_string(),
                code: response.code,
                message: response.message,
            }
            .into());
        }

        Ok(parse_decimal(&response.executed_qty))
    }
}

/// Sorted query string with the HMAC-SHA256 signature appended last, as the
/// venue expects it
fn signed_query(secret: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let query = sorted_query(params);
    let signature = hmac_sha256_hex(secret, &query)?;
    Ok(format!("{query}&signature={signature}"))
}

#[derive(Debug, Deserialize)]
struct MarginAccountResponse {
    #[serde(default)]
    code: i64,
    #[serde(rename = "msg", default)]
    message: String,
    #[serde(rename = "totalCollateralValueInUSDT", default)]
    collateral_value: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default)]
    code: i64,
    #[serde(rename = "msg", default)]
    message: String,
    #[serde(rename = "executedQty", default)]
    executed_qty: String,
}
