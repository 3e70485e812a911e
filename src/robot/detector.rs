//! Per-triangle opportunity detection on a fixed 100 ms cadence

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::robot::executor::{Executor, MAX_IN_FLIGHT};
use crate::robot::engine::Triangle;
use crate::robot::state::{BookSide, BookStore, Tunables};

const TICK: Duration = Duration::from_millis(100);

/// Cycle direction evaluated against a triangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDirection {
    /// Buy initial, buy middle, sell final
    Bbs,
    /// Sell initial, sell middle, buy final
    Ssb,
}

impl fmt::Display for CycleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleDirection::Bbs => write!(f, "BBS"),
            CycleDirection::Ssb => write!(f, "SSB"),
        }
    }
}

/// Round-trip rate of one cycle direction for top-of-book prices `a`, `b`,
/// `c` and a per-leg fee in percent. Profitable when above `1 + threshold`.
pub fn cycle_value(a: f64, b: f64, c: f64, fee: f64, direction: CycleDirection) -> f64 {
    let fee_share = fee * 3.0 / 100.0;
    match direction {
        CycleDirection::Bbs => c / (a * b) - fee_share,
        CycleDirection::Ssb => 2.0 - c / (a * b) - fee_share,
    }
}

/// Evaluates one triangle and hands profitable cycles to the executor.
///
/// Detectors never share state across triangles; each one owns its
/// last-reported-percent tracker and reads the shared book store.
pub struct Detector {
    triangle: Triangle,
    store: Arc<BookStore>,
    tunables: Arc<Tunables>,
    executor: Arc<Executor>,
}

/// Handle to a running detector loop
pub struct DetectorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DetectorHandle {
    /// Signal the loop to stop and wait for it to finish
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

impl Detector {
    /// Create a detector for one triangle
    pub fn new(
        triangle: Triangle,
        store: Arc<BookStore>,
        tunables: Arc<Tunables>,
        executor: Arc<Executor>,
    ) -> Self {
        Self {
            triangle,
            store,
            tunables,
            executor,
        }
    }

    /// Start the periodic loop on its own task
    pub fn spawn(self) -> DetectorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        DetectorHandle { stop_tx, task }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(TICK);
        // Coalesce, never queue, ticks the evaluator missed.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_percent = 0.0;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    info!(triangle = %self.triangle, "detector stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick(&mut last_percent).await;
                }
            }
        }
    }

    async fn tick(&self, last_percent: &mut f64) {
        let params = self.tunables.get().await;
        let (bbs, ssb) = tokio::join!(
            self.evaluate(CycleDirection::Bbs, params.fee),
            self.evaluate(CycleDirection::Ssb, params.fee),
        );

        if bbs > 1.0 + params.threshold {
            self.report(CycleDirection::Bbs, bbs, params.lot, last_percent)
                .await;
        } else if ssb > 1.0 + params.threshold {
            self.report(CycleDirection::Ssb, ssb, params.lot, last_percent)
                .await;
        } else {
            *last_percent = 0.0;
        }
    }

    /// Read the three top-of-book prices for `direction` and compute its
    /// round-trip rate; any missing price makes the direction worthless.
    async fn evaluate(&self, direction: CycleDirection, fee: f64) -> f64 {
        let triangle = &self.triangle;
        let (a, b, c) = match direction {
            CycleDirection::Bbs => (
                self.price(&triangle.initial, BookSide::Ask).await,
                self.price(&triangle.middle, BookSide::Ask).await,
                self.price(&triangle.closing, BookSide::Bid).await,
            ),
            CycleDirection::Ssb => (
                self.price(&triangle.initial, BookSide::Bid).await,
                self.price(&triangle.middle, BookSide::Bid).await,
                self.price(&triangle.closing, BookSide::Ask).await,
            ),
        };

        if a == 0.0 || b == 0.0 || c == 0.0 {
            return 0.0;
        }
        cycle_value(a, b, c, fee, direction)
    }

    async fn price(&self, symbol: &crate::market::MarketSymbol, side: BookSide) -> f64 {
        self.store.price(&symbol.base_symbol, side, 0).await
    }

    async fn report(
        &self,
        direction: CycleDirection,
        value: f64,
        lot: f64,
        last_percent: &mut f64,
    ) {
        let percent = (value - 1.0) * 100.0;
        if *last_percent == percent {
            return;
        }
        *last_percent = percent;

        info!(
            triangle = %self.triangle,
            direction = %direction,
            percent,
            "arbitrage possibility found"
        );

        if self.executor.in_flight() >= MAX_IN_FLIGHT {
            return;
        }
        if let Err(err) = self
            .executor
            .execute_triangle(&self.triangle, direction, lot)
            .await
        {
            warn!(triangle = %self.triangle, error = %err, "triangle execution failed");
        }
    }
}
