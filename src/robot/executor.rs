//! Serialized three-leg order execution with best-effort rollback

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::market::{OrderKind, OrderSide, PrivateClient};
use crate::robot::detector::CycleDirection;
use crate::robot::engine::Triangle;
use crate::robot::state::Tunables;
use crate::Result;

/// Maximum number of concurrently executing triangles
pub const MAX_IN_FLIGHT: usize = 3;

/// Submits the three legs of a triangle in order.
///
/// All order submissions across all triangles are serialized by one lock;
/// the in-flight counter bounds concurrent executions and is consulted by
/// detectors before handing off.
pub struct Executor {
    client: Arc<dyn PrivateClient>,
    tunables: Arc<Tunables>,
    order_lock: Mutex<()>,
    counter: AtomicUsize,
}

/// Decrements the in-flight counter on every exit path
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Executor {
    /// Create an executor over the given private client
    pub fn new(client: Arc<dyn PrivateClient>, tunables: Arc<Tunables>) -> Self {
        Self {
            client,
            tunables,
            order_lock: Mutex::new(()),
            counter: AtomicUsize::new(0),
        }
    }

    /// Number of triangle executions currently in flight
    pub fn in_flight(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    /// Execute one triangle in the given cycle direction with `lot` quote
    /// units on leg 1.
    ///
    /// A successful return means all three legs filled. Any intermediate
    /// failure submits best-effort compensating orders for the filled legs
    /// and returns the original error.
    pub async fn execute_triangle(
        &self,
        triangle: &Triangle,
        direction: CycleDirection,
        lot: f64,
    ) -> Result<()> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlightGuard(&self.counter);

        let fee = self.tunables.get().await.fee;
        info!(triangle = %triangle, direction = %direction, lot, "executing triangle");

        match direction {
            CycleDirection::Bbs => self.execute_bbs(triangle, lot).await,
            CycleDirection::Ssb => self.execute_ssb(triangle, lot, fee).await,
        }
    }

    /// Buy initial, buy middle, sell final
    async fn execute_bbs(&self, triangle: &Triangle, lot: f64) -> Result<()> {
        let q1 = format_quantity(lot, triangle.initial.price_precision);
        let filled = self
            .place(&triangle.initial.venue_symbol, OrderSide::Buy, OrderKind::Open, &q1)
            .await?;

        let q2 = format_quantity(filled, triangle.middle.price_precision);
        let filled = match self
            .place(&triangle.middle.venue_symbol, OrderSide::Buy, OrderKind::Open, &q2)
            .await
        {
            Ok(filled) => filled,
            Err(err) => {
                self.compensate(&triangle.initial.venue_symbol, OrderSide::Sell, &q2)
                    .await;
                return Err(err);
            }
        };

        let q3 = format_quantity(filled, triangle.middle.base_precision);
        if let Err(err) = self
            .place(&triangle.closing.venue_symbol, OrderSide::Sell, OrderKind::Close, &q3)
            .await
        {
            self.compensate(&triangle.middle.venue_symbol, OrderSide::Sell, &q3)
                .await;
            self.compensate(&triangle.initial.venue_symbol, OrderSide::Sell, &q2)
                .await;
            return Err(err);
        }

        Ok(())
    }

    /// Sell initial, sell middle, buy final. Quantities between legs are
    /// inflated by the per-leg fee so the closing buy covers the borrow.
    async fn execute_ssb(&self, triangle: &Triangle, lot: f64, fee: f64) -> Result<()> {
        let q1 = format_quantity(lot, triangle.initial.price_precision);
        let filled = self
            .place(&triangle.initial.venue_symbol, OrderSide::Sell, OrderKind::Open, &q1)
            .await?;

        let q2 = format_quantity(filled * (1.0 + fee / 100.0), triangle.middle.price_precision);
        let filled = match self
            .place(&triangle.middle.venue_symbol, OrderSide::Sell, OrderKind::Open, &q2)
            .await
        {
            Ok(filled) => filled,
            Err(err) => {
                self.compensate(&triangle.initial.venue_symbol, OrderSide::Buy, &q2)
                    .await;
                return Err(err);
            }
        };

        let q3 = format_quantity(filled * (1.0 + fee / 100.0), triangle.middle.base_precision);
        if let Err(err) = self
            .place(&triangle.closing.venue_symbol, OrderSide::Buy, OrderKind::Close, &q3)
            .await
        {
            self.compensate(&triangle.middle.venue_symbol, OrderSide::Buy, &q3)
                .await;
            self.compensate(&triangle.initial.venue_symbol, OrderSide::Buy, &q2)
                .await;
            return Err(err);
        }

        Ok(())
    }

    async fn place(
        &self,
        venue_symbol: &str,
        side: OrderSide,
        kind: OrderKind,
        quantity: &str,
    ) -> Result<f64> {
        let _guard = self.order_lock.lock().await;
        self.client
            .place_order(venue_symbol, side, kind, quantity)
            .await
    }

    /// Compensation failures are not themselves rolled back; they only reach
    /// the log.
    async fn compensate(&self, venue_symbol: &str, side: OrderSide, quantity: &str) {
        if let Err(err) = self
            .place(venue_symbol, side, OrderKind::Close, quantity)
            .await
        {
            warn!(
                symbol = venue_symbol,
                side = %side,
                quantity,
                error = %err,
                "compensating order failed"
            );
        }
    }
}

/// Format an order quantity with a fixed number of decimals for the wire
pub fn format_quantity(value: f64, precision: u32) -> String {
    format!("{value:.precision$}", precision = precision as usize)
}
