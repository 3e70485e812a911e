//! Bybit venue clients: order-book streaming with snapshot/delta
//! reconciliation, instrument metadata and signed spot-margin trading

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::info;

use crate::market::{
    hmac_sha256_hex, parse_decimal, precision_from_step, sorted_query, MarketSymbol,
    OrderBookEvent, OrderBookHandler, OrderKind, OrderSide, PriceLevel, PrivateClient,
    PublicClient, StreamErrorHandler,
};
use crate::ws::{WsClient, WsHandler};
use crate::{EngineError, Result};

/// Venue identifier
pub const VENUE: &str = "BYBIT";

const HOST: &str = "https://api.bybit.com";
const WS_URL: &str = "wss://stream.bybit.com/v5/public/spot";
const RECV_WINDOW: &str = "5000";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const COLLATERAL_FILE: &str = "./files/bybit/collateral.json";

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| EngineError::Connection(format!("build http client: {e}")).into())
}

fn venue_side(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "Buy",
        OrderSide::Sell => "Sell",
    }
}

/// Public Bybit client
pub struct BybitPublicClient {
    http: reqwest::Client,
}

impl BybitPublicClient {
    /// Create a public client with the venue's default endpoints
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: http_client()?,
        })
    }
}

#[async_trait]
impl PublicClient for BybitPublicClient {
    fn name(&self) -> &'static str {
        VENUE
    }

    fn create_symbol(&self, base_symbol: &str) -> Result<MarketSymbol> {
        MarketSymbol::parse(base_symbol)
    }

    async fn get_instruments_info(&self, symbols: &mut [MarketSymbol]) -> Result<()> {
        let mut params = BTreeMap::new();
        params.insert("category".to_string(), "spot".to_string());
        params.insert("limit".to_string(), "1000".to_string());
        let url = format!(
            "{HOST}/v5/market/instruments-info?{}",
            sorted_query(&params)
        );

        let response: InstrumentsResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Connection(format!("bybit request failed: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::Parse(format!("decode bybit response: {e}")))?;

        if response.code != 0 {
            return Err(EngineError::Venue {
                venue: VENUE.to_string(),
                code: response.code,
                message: response.message,
            }
            .into());
        }

        apply_instruments(symbols, &response.result.list)
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
            levels: coerce_levels(levels).to_string(),
            book: Mutex::new(BookState::default()),
            handler,
            err_handler,
        });
        let ws = WsClient::new(stream);
        Arc::clone(&ws).run(WS_URL, false, Duration::ZERO).await?;
        Ok(ws)
    }
}

/// The venue accepts exactly these depths on the spot stream
fn coerce_levels(levels: &str) -> &str {
    match levels {
        "1" | "50" | "200" => levels,
        _ => "1",
    }
}

fn apply_instruments(symbols: &mut [MarketSymbol], list: &[BybitInstrument]) -> Result<()> {
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
        symbol.price_precision = precision_from_step(&data.price_filter.tick_size);
        symbol.base_precision = precision_from_step(&data.lot_size_filter.base_precision);
    }
    Ok(())
}

/// Handler for one symbol's order-book stream.
///
/// The venue sends one `snapshot` followed by `delta`s; the handler keeps
/// local ask/bid maps keyed by price string and publishes a full event after
/// every message.
struct BookStream {
    symbol: MarketSymbol,
    levels: String,
    book: Mutex<BookState>,
    handler: OrderBookHandler,
    err_handler: StreamErrorHandler,
}

#[derive(Debug, Default)]
struct BookState {
    asks: HashMap<String, String>,
    bids: HashMap<String, String>,
}

impl BookState {
    /// Materialize the maps into an event with the best level at index 0
    fn to_event(&self, symbol: &str) -> OrderBookEvent {
        OrderBookEvent {
            symbol: symbol.to_string(),
            asks: sorted_levels(&self.asks, true),
            bids: sorted_levels(&self.bids, false),
        }
    }
}

fn level_map(levels: &[[String; 2]]) -> HashMap<String, String> {
    levels
        .iter()
        .map(|level| (level[0].clone(), level[1].clone()))
        .collect()
}

/// Delta rule: a `"0"` quantity removes the price level, anything else upserts
fn apply_delta(map: &mut HashMap<String, String>, levels: &[[String; 2]]) {
    for level in levels {
        if level[1] == "0" {
            map.remove(&level[0]);
        } else {
            map.insert(level[0].clone(), level[1].clone());
        }
    }
}

fn sorted_levels(map: &HashMap<String, String>, ascending: bool) -> Vec<PriceLevel> {
    let mut levels: Vec<PriceLevel> = map
        .iter()
        .map(|(price, quantity)| PriceLevel {
            price: parse_decimal(price),
            quantity: parse_decimal(quantity),
        })
        .collect();
    levels.sort_by(|x, y| x.price.total_cmp(&y.price));
    if !ascending {
        levels.reverse();
    }
    levels
}

#[async_trait]
impl WsHandler for BookStream {
    async fn on_open(&self, ws: &Arc<WsClient>) {
        let subscription = json!({
            "req_id": Utc::now().timestamp_millis().to_string(),
            "op": "subscribe",
            "args": [format!("orderbook.{}.{}", self.levels, self.symbol.venue_symbol)],
        });
        if let Err(err) = ws.send(&subscription).await {
            (self.err_handler)(err);
            return;
        }
        info!(venue = VENUE, symbol = %self.symbol.base_symbol, "stream started");
    }

    async fn on_message(&self, _ws: &Arc<WsClient>, data: &[u8]) {
        let message: StreamMessage = match serde_json::from_slice(data) {
            Ok(message) => message,
            Err(e) => {
                (self.err_handler)(
                    EngineError::Parse(format!("decode book message: {e}")).into(),
                );
                return;
            }
        };

        let mut book = self.book.lock().await;
        match message.kind.as_str() {
            "snapshot" => {
                book.asks = level_map(&message.data.asks);
                book.bids = level_map(&message.data.bids);
            }
            "delta" => {
                apply_delta(&mut book.asks, &message.data.asks);
                apply_delta(&mut book.bids, &message.data.bids);
            }
            // Subscription acknowledgements and other operational messages
            _ => return,
        }
        let event = book.to_event(&self.symbol.base_symbol);
        drop(book);

        (self.handler)(event).await;
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
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: StreamData,
}

#[derive(Debug, Default, Deserialize)]
struct StreamData {
    #[serde(rename = "a", default)]
    asks: Vec<[String; 2]>,
    #[serde(rename = "b", default)]
    bids: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResponse {
    #[serde(rename = "retCode", default)]
    code: i64,
    #[serde(rename = "retMsg", default)]
    message: String,
    #[serde(default)]
    result: InstrumentsResult,
}

#[derive(Debug, Default, Deserialize)]
struct InstrumentsResult {
    #[serde(default)]
    list: Vec<BybitInstrument>,
}

#[derive(Debug, Deserialize)]
struct BybitInstrument {
    symbol: String,
    #[serde(rename = "priceFilter", default)]
    price_filter: PriceFilter,
    #[serde(rename = "lotSizeFilter", default)]
    lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Default, Deserialize)]
struct PriceFilter {
    #[serde(rename = "tickSize", default)]
    tick_size: String,
}

#[derive(Debug, Default, Deserialize)]
struct LotSizeFilter {
    #[serde(rename = "basePrecision", default)]
    base_precision: String,
}

/// Private Bybit client for the unified account
pub struct BybitPrivateClient {
    key: String,
    secret: String,
    http: reqwest::Client,
}

impl BybitPrivateClient {
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
        params: Map<String, Value>,
        path: &str,
        method: Method,
    ) -> Result<T> {
        let payload = prepare_payload(&method, &params)?;
        let timestamp = Utc::now().timestamp_millis();
        let signature = sign_request(&self.secret, timestamp, &self.key, RECV_WINDOW, &payload)?;

        let request = if method == Method::GET {
            self.http.get(format!("{HOST}/{path}?{payload}"))
        } else {
            self.http
                .post(format!("{HOST}/{path}"))
                .header(CONTENT_TYPE, "application/json")
                .body(payload)
        };

        request
            .header("X-BAPI-API-KEY", &self.key)
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-SIGN-TYPE", "2")
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .send()
            .await
            .map_err(|e| EngineError::Connection(format!("bybit request failed: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::Parse(format!("decode bybit response: {e}")).into())
    }

    async fn set_collateral_coins(&self, coins: &[String]) -> Result<()> {
        let request: Vec<Value> = coins
            .iter()
            .map(|coin| json!({"coin": coin, "collateralSwitch": "ON"}))
            .collect();
        let mut params = Map::new();
        params.insert("request".to_string(), Value::Array(request));

        let response: CollateralResponse = self
            .perform_signed(params, "v5/account/set-collateral-switch-batch", Method::POST)
            .await?;

        if response.code != 0 {
            return Err(EngineError::Venue {
                venue: VENUE.to_string(),
                code: response.code,
                message: response.message,
            }
            .into());
        }
        if response.message != "SUCCESS" {
            return Err(
                EngineError::Trading("unsuccessful trial to set collateral coins".to_string())
                    .into(),
            );
        }
        Ok(())
    }

    async fn get_order_info(&self, venue_symbol: &str, order_id: &str) -> Result<OrderData> {
        let mut params = Map::new();
        params.insert("category".to_string(), Value::from("spot"));
        params.insert("symbol".to_string(), Value::from(venue_symbol));
        params.insert("orderId".to_string(), Value::from(order_id));

        let response: OrderInfoResponse = self
            .perform_signed(params, "v5/order/realtime", Method::GET)
            .await?;

        if response.code != 0 {
            return Err(EngineError::Venue {
                venue: VENUE.to_string(),
                code: response.code,
                message: response.message,
            }
            .into());
        }

        response.result.list.into_iter().next().ok_or_else(|| {
            EngineError::Parse(format!("no order data returned for order {order_id}")).into()
        })
    }
}

#[async_trait]
impl PrivateClient for BybitPrivateClient {
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

        let data = tokio::fs::read(COLLATERAL_FILE)
            .await
            .map_err(|e| EngineError::Config(format!("read {COLLATERAL_FILE}: {e}")))?;
        let coins = parse_collateral(&data)?;
        self.set_collateral_coins(&coins).await
    }

    async fn get_margin_balance(&self) -> Result<f64> {
        let mut params = Map::new();
        params.insert("accountType".to_string(), Value::from("UNIFIED"));

        let response: WalletBalanceResponse = self
            .perform_signed(params, "v5/account/wallet-balance", Method::GET)
            .await?;

        if response.code != 0 {
            return Err(EngineError::Venue {
                venue: VENUE.to_string(),
                code: response.code,
                message: response.message,
            }
            .into());
        }

        let account = response
            .result
            .list
            .first()
            .ok_or_else(|| EngineError::Parse("empty wallet balance list".to_string()))?;

        Ok(parse_decimal(&account.total_available_balance))
    }

    async fn place_order(
        &self,
        venue_symbol: &str,
        side: OrderSide,
        kind: OrderKind,
        quantity: &str,
    ) -> Result<f64> {
        let mut params = Map::new();
        params.insert("category".to_string(), Value::from("spot"));
        params.insert("symbol".to_string(), Value::from(venue_symbol));
        params.insert("side".to_string(), Value::from(venue_side(side)));
        params.insert("orderType".to_string(), Value::from("Market"));
        params.insert("isLeverage".to_string(), Value::from(1));
        params.insert("qty".to_string(), Value::from(quantity));
        params.insert(
            "orderLinkId".to_string(),
            Value::from(Utc::now().timestamp_millis().to_string()),
        );
        let market_unit = match kind {
            OrderKind::Open => "quoteCoin",
            OrderKind::Close => "baseCoin",
        };
        params.insert("marketUnit".to_string(), Value::from(market_unit));

        let response: OrderCreateResponse = self
            .perform_signed(params, "v5/order/create", Method::POST)
            .await?;

        if response.code != 0 {
            return Err(EngineError::Venue {
                venue: VENUE.to_string(),
                code: response.code,
                message: response.message,
            }
            .into());
        }

        // The create response carries no fill data; poll the order to learn
        // the executed quantity.
        let order = self
            .get_order_info(venue_symbol, &response.result.order_id)
            .await?;

        Ok(parse_decimal(&order.executed_qty))
    }
}

/// Signature payload is `<timestamp><key><recv_window><body_or_query>`
fn sign_request(
    secret: &str,
    timestamp: i64,
    key: &str,
    recv_window: &str,
    payload: &str,
) -> Result<String> {
    hmac_sha256_hex(secret, &format!("{timestamp}{key}{recv_window}{payload}"))
}

/// GET requests sign the sorted query string; POST requests sign the raw JSON
/// body with numeric-looking fields cast to the types the venue expects
fn prepare_payload(method: &Method, params: &Map<String, Value>) -> Result<String> {
    if *method == Method::GET {
        Ok(params
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| format!("{key}={}", render_value(value)))
            .collect::<Vec<_>>()
            .join("&"))
    } else {
        let mut cast = params.clone();
        cast_values(&mut cast)?;
        serde_json::to_string(&cast)
            .map_err(|e| EngineError::Parse(format!("encode bybit payload: {e}")).into())
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cast_values(params: &mut Map<String, Value>) -> Result<()> {
    for key in ["qty", "price", "triggerPrice", "takeProfit", "stopLoss"] {
        if let Some(value) = params.get(key) {
            if !value.is_string() {
                let rendered = render_value(value);
                params.insert(key.to_string(), Value::String(rendered));
            }
        }
    }
    if let Some(value) = params.get("positionIdx") {
        if !value.is_i64() && !value.is_u64() {
            let parsed: i64 = render_value(value)
                .parse()
                .map_err(|_| EngineError::Parse("positionIdx must be number".to_string()))?;
            params.insert("positionIdx".to_string(), Value::from(parsed));
        }
    }
    Ok(())
}

fn parse_collateral(data: &[u8]) -> Result<Vec<String>> {
    serde_json::from_slice(data)
        .map_err(|e| EngineError::Config(format!("parse collateral list: {e}")).into())
}

#[derive(Debug, Deserialize)]
struct CollateralResponse {
    #[serde(rename = "retCode", default)]
    code: i64,
    #[serde(rename = "retMsg", default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct WalletBalanceResponse {
    #[serde(rename = "retCode", default)]
    code: i64,
    #[serde(rename = "retMsg", default)]
    message: String,
    #[serde(default)]
    result: WalletBalanceResult,
}

#[derive(Debug, Default, Deserialize)]
struct WalletBalanceResult {
    #[serde(default)]
    list: Vec<WalletInfo>,
}

#[derive(Debug, Deserialize)]
struct WalletInfo {
    #[serde(rename = "totalAvailableBalance", default)]
    total_available_balance: String,
}

#[derive(Debug, Deserialize)]
struct OrderCreateResponse {
    #[serde(rename = "retCode", default)]
    code: i64,
    #[serde(rename = "retMsg", default)]
    message: String,
    #[serde(default)]
    result: OrderCreateResult,
}

#[derive(Debug, Default, Deserialize)]
struct OrderCreateResult {
    #[serde(rename = "orderId", default)]
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderInfoResponse {
    #[serde(rename = "retCode", default)]
    code: i64,
    #[serde(rename = "retMsg", default)]
    message: String,
    #[serde(default)]
    result: OrderInfoResult,
}

#[derive(Debug, Default, Deserialize)]
struct OrderInfoResult {
    #[serde(default)]
    list: Vec<OrderData>,
}

#[derive(Debug, Deserialize)]
struct OrderData {
    #[serde(rename = "cumExecQty", default)]
    executed_qty: String,
}
