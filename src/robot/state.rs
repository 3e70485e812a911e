//! Shared mutable state read by detectors and the control plane

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::market::OrderBookEvent;

/// Order-book side selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    /// Sell side; index 0 is the best offer
    Ask,
    /// Buy side; index 0 is the best bid
    Bid,
}

/// Concurrent mapping `base_symbol -> OrderBookEvent`.
///
/// Writers replace whole events under the write lock, so readers observe
/// either the previous event or the new one, never a torn record. A missing
/// key or an empty side is a valid "no data yet" state.
#[derive(Debug, Default)]
pub struct BookStore {
    books: RwLock<HashMap<String, OrderBookEvent>>,
}

impl BookStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a whole event as a single atomic update
    pub async fn publish(&self, event: OrderBookEvent) {
        self.books.write().await.insert(event.symbol.clone(), event);
    }

    /// Top-of-book price for `symbol` at `depth`, or 0.0 when no data exists
    pub async fn price(&self, symbol: &str, side: BookSide, depth: usize) -> f64 {
        let books = self.books.read().await;
        let Some(event) = books.get(symbol) else {
            return 0.0;
        };
        let levels = match side {
            BookSide::Ask => &event.asks,
            BookSide::Bid => &event.bids,
        };
        levels.get(depth).map(|level| level.price).unwrap_or(0.0)
    }

    /// Number of symbols with published data
    pub async fn len(&self) -> usize {
        self.books.read().await.len()
    }

    /// Whether no symbol has published data yet
    pub async fn is_empty(&self) -> bool {
        self.books.read().await.is_empty()
    }
}

/// Runtime-adjustable engine parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Params {
    /// Minimum fractional profit above 1.0 for an opportunity to fire
    pub threshold: f64,
    /// Quote-denominated size of leg 1 of a triangle execution
    pub lot: f64,
    /// Per-leg fee in percent
    pub fee: f64,
}

/// Shared cell holding [`Params`] so control-plane updates reach running
/// detectors and the executor
#[derive(Debug)]
pub struct Tunables {
    params: RwLock<Params>,
}

impl Tunables {
    /// Create the cell with initial parameters
    pub fn new(threshold: f64, lot: f64, fee: f64) -> Self {
        Self {
            params: RwLock::new(Params {
                threshold,
                lot,
                fee,
            }),
        }
    }

    /// Coherent snapshot of the current parameters
    pub async fn get(&self) -> Params {
        *self.params.read().await
    }

    /// Replace the parameters atomically
    pub async fn set(&self, params: Params) {
        *self.params.write().await = params;
    }
}
