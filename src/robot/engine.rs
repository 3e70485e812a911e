//! Engine orchestrator: loads the symbol universe, owns the streams,
//! detectors and executor, and drives the start/stop lifecycle

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::market::{
    new_private_client, new_public_client, MarketSymbol, OrderBookHandler, PrivateClient,
    PublicClient, StreamErrorHandler,
};
use crate::robot::detector::{Detector, DetectorHandle};
use crate::robot::executor::Executor;
use crate::robot::state::{BookStore, Tunables};
use crate::ws::WsClient;
use crate::{EngineError, Result};

/// Book depth requested from the venue stream
const BOOK_LEVELS: &str = "5";

/// Three market symbols whose ordered execution closes a currency cycle.
///
/// The triangle itself is direction-agnostic; both cycle directions are
/// evaluated against it.
#[derive(Debug, Clone)]
pub struct Triangle {
    /// First leg pair
    pub initial: MarketSymbol,
    /// Second leg pair
    pub middle: MarketSymbol,
    /// Third leg pair
    pub closing: MarketSymbol,
}

impl fmt::Display for Triangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}->{}",
            self.initial.base_symbol, self.middle.base_symbol, self.closing.base_symbol
        )
    }
}

/// The trading engine. Created by the control plane, destroyed on stop.
///
/// Exclusively owns its tickers, detectors and executor; detectors hold
/// shared references to the book store, tunables and executor only.
pub struct Robot {
    public: Arc<dyn PublicClient>,
    private: Arc<dyn PrivateClient>,
    symbols: HashMap<String, MarketSymbol>,
    triangles: Vec<Triangle>,
    tunables: Arc<Tunables>,
    state: Arc<BookStore>,
    executor: Arc<Executor>,
    tickers: HashMap<String, Arc<WsClient>>,
    detectors: Vec<DetectorHandle>,
    files_dir: PathBuf,
}

impl Robot {
    /// Build an engine for `market` with the given credentials and
    /// parameters. `delta` is the profitability threshold as a fraction,
    /// `fee` the per-leg fee in percent, `lot` the quote size of leg 1.
    pub fn create(
        market: &str,
        api_key: &str,
        secret: &str,
        delta: f64,
        fee: f64,
        lot: f64,
    ) -> Result<Self> {
        let public = new_public_client(market)?;
        let private = new_private_client(market, api_key, secret)?;
        let tunables = Arc::new(Tunables::new(delta, lot, fee));
        let executor = Arc::new(Executor::new(Arc::clone(&private), Arc::clone(&tunables)));

        Ok(Self {
            public,
            private,
            symbols: HashMap::new(),
            triangles: Vec::new(),
            tunables,
            state: Arc::new(BookStore::new()),
            executor,
            tickers: HashMap::new(),
            detectors: Vec::new(),
            files_dir: PathBuf::from("./files"),
        })
    }

    /// Override the directory holding `symbols.json` / `triangles.json`
    pub fn with_files_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.files_dir = dir.into();
        self
    }

    /// Venue identifier of the configured market
    pub fn market(&self) -> &'static str {
        self.public.name()
    }

    /// API key the engine was created with
    pub fn api_key(&self) -> &str {
        self.private.key()
    }

    /// API secret the engine was created with
    pub fn secret(&self) -> &str {
        self.private.secret()
    }

    /// Runtime-adjustable parameters shared with detectors and the executor
    pub fn tunables(&self) -> Arc<Tunables> {
        Arc::clone(&self.tunables)
    }

    /// Configured triangles; populated by [`start`](Self::start)
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// Load the symbol universe, fetch instrument precisions, verify the
    /// account and launch one stream per symbol plus one detector per
    /// triangle.
    pub async fn start(&mut self) -> Result<()> {
        self.load_symbols()?;

        let mut symbols: Vec<MarketSymbol> = self.symbols.values().cloned().collect();
        self.public.get_instruments_info(&mut symbols).await?;
        for symbol in symbols {
            self.symbols.insert(symbol.base_symbol.clone(), symbol);
        }

        self.load_triangles()?;

        self.private
            .apply_initial(self.tunables.get().await.lot)
            .await?;

        self.run_tickers().await;
        self.run_detectors();

        Ok(())
    }

    /// Signal every detector and close every stream, waiting for their
    /// readers to finish. In-flight triangle executions complete naturally.
    pub async fn stop(&mut self) {
        for detector in self.detectors.drain(..) {
            detector.stop().await;
        }
        for (_, stream) in self.tickers.drain() {
            stream.close().await;
        }
    }

    async fn run_tickers(&mut self) {
        let symbols: Vec<MarketSymbol> = self.symbols.values().cloned().collect();
        for symbol in symbols {
            if let Err(err) = self.run_order_book_stream(&symbol).await {
                warn!(
                    symbol = %symbol.base_symbol,
                    error = %err,
                    "failed to start order book stream"
                );
            }
        }
    }

    async fn run_order_book_stream(&mut self, symbol: &MarketSymbol) -> Result<()> {
        let store = Arc::clone(&self.state);
        let handler: OrderBookHandler = Arc::new(move |event| {
            let store = Arc::clone(&store);
            Box::pin(async move { store.publish(event).await })
        });
        let err_handler: StreamErrorHandler =
            Arc::new(|err| info!(error = %err, "stream error"));

        let stream = self
            .public
            .run_order_book_stream(symbol, BOOK_LEVELS, handler, err_handler)
            .await?;
        self.tickers.insert(symbol.base_symbol.clone(), stream);
        Ok(())
    }

    fn run_detectors(&mut self) {
        for triangle in &self.triangles {
            let detector = Detector::new(
                triangle.clone(),
                Arc::clone(&self.state),
                Arc::clone(&self.tunables),
                Arc::clone(&self.executor),
            );
            self.detectors.push(detector.spawn());
        }
    }

    fn load_symbols(&mut self) -> Result<()> {
        let path = self
            .files_dir
            .join(self.public.name().to_lowercase())
            .join("symbols.json");
        let data = std::fs::read(&path)
            .map_err(|e| EngineError::Config(format!("read {}: {e}", path.display())))?;
        let base_symbols: Vec<String> = serde_json::from_slice(&data)
            .map_err(|e| EngineError::Config(format!("parse {}: {e}", path.display())))?;

        for base_symbol in &base_symbols {
            let symbol = self.public.create_symbol(base_symbol)?;
            self.symbols.insert(symbol.base_symbol.clone(), symbol);
        }
        Ok(())
    }

    fn load_triangles(&mut self) -> Result<()> {
        let path = self
            .files_dir
            .join(self.public.name().to_lowercase())
            .join("triangles.json");
        let data = std::fs::read(&path)
            .map_err(|e| EngineError::Config(format!("read {}: {e}", path.display())))?;
        let routes: Vec<[String; 3]> = serde_json::from_slice(&data)
            .map_err(|e| EngineError::Config(format!("parse {}: {e}", path.display())))?;

        for route in &routes {
            let triangle = Triangle {
                initial: self.lookup_symbol(&route[0])?,
                middle: self.lookup_symbol(&route[1])?,
                closing: self.lookup_symbol(&route[2])?,
            };
            self.triangles.push(triangle);
        }
        Ok(())
    }

    fn lookup_symbol(&self, base_symbol: &str) -> Result<MarketSymbol> {
        self.symbols.get(base_symbol).cloned().ok_or_else(|| {
            EngineError::Config(format!("triangle references unknown symbol {base_symbol}")).into()
        })
    }
}
