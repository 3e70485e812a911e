//! Shared fixtures: a scriptable private client and triangle builders

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tri_arbitrage::market::{MarketSymbol, OrderKind, OrderSide, PrivateClient};
use tri_arbitrage::robot::Triangle;
use tri_arbitrage::{EngineError, Result};

/// One recorded `place_order` call
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: String,
}

/// Private client that records orders and replays scripted fills.
///
/// When the fill script is exhausted every order fills with `default_fill`.
/// An optional semaphore gate lets tests hold order placement open to pin the
/// executor's in-flight counter at a known value.
pub struct MockPrivateClient {
    orders: Mutex<Vec<PlacedOrder>>,
    fills: Mutex<VecDeque<std::result::Result<f64, String>>>,
    balance: f64,
    default_fill: f64,
    gate: Option<Arc<Semaphore>>,
}

impl MockPrivateClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            orders: Mutex::new(Vec::new()),
            fills: Mutex::new(VecDeque::new()),
            balance: 1_000_000.0,
            default_fill: 1.0,
            gate: None,
        })
    }

    pub fn with_fills(fills: Vec<std::result::Result<f64, String>>) -> Arc<Self> {
        Arc::new(Self {
            orders: Mutex::new(Vec::new()),
            fills: Mutex::new(fills.into()),
            balance: 1_000_000.0,
            default_fill: 1.0,
            gate: None,
        })
    }

    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            orders: Mutex::new(Vec::new()),
            fills: Mutex::new(VecDeque::new()),
            balance: 1_000_000.0,
            default_fill: 1.0,
            gate: Some(gate),
        })
    }

    pub fn orders(&self) -> Vec<PlacedOrder> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrivateClient for MockPrivateClient {
    fn name(&self) -> &'static str {
        "MOCK"
    }

    fn key(&self) -> &str {
        "mock-key"
    }

    fn secret(&self) -> &str {
        "mock-secret"
    }

    async fn apply_initial(&self, lot: f64) -> Result<()> {
        if self.balance < lot {
            return Err(EngineError::Trading("not enough balance".to_string()).into());
        }
        Ok(())
    }

    async fn get_margin_balance(&self) -> Result<f64> {
        Ok(self.balance)
    }

    async fn place_order(
        &self,
        venue_symbol: &str,
        side: OrderSide,
        kind: OrderKind,
        quantity: &str,
    ) -> Result<f64> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }

        self.orders.lock().unwrap().push(PlacedOrder {
            symbol: venue_symbol.to_string(),
            side,
            kind,
            quantity: quantity.to_string(),
        });

        let next = self.fills.lock().unwrap().pop_front();
        match next {
            Some(Ok(quantity)) => Ok(quantity),
            Some(Err(message)) => Err(EngineError::Venue {
                venue: "MOCK".to_string(),
                code: -1,
                message,
            }
            .into()),
            None => Ok(self.default_fill),
        }
    }
}

/// Symbol with explicit precisions, as instrument info would populate them
pub fn symbol(base_symbol: &str, price_precision: u32, base_precision: u32) -> MarketSymbol {
    let mut symbol = MarketSymbol::parse(base_symbol).unwrap();
    symbol.price_precision = price_precision;
    symbol.base_precision = base_precision;
    symbol
}

/// The ETH+BTC -> XRP+ETH -> XRP+BTC cycle used throughout the tests
pub fn test_triangle() -> Triangle {
    Triangle {
        initial: symbol("ETH+BTC", 6, 4),
        middle: symbol("XRP+ETH", 8, 1),
        closing: symbol("XRP+BTC", 8, 0),
    }
}
