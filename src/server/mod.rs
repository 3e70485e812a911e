//! Control plane: the single-engine lifecycle gate and its thin HTTP surface

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::ServerConfig;
use crate::robot::{Params, Robot};
use crate::{EngineError, Result};

/// Parameters of a start or update request.
///
/// `delta` arrives in percent and is divided by 100 before use.
#[derive(Debug, Clone, Deserialize)]
pub struct RobotParams {
    /// Venue name (`BINANCE` or `BYBIT`)
    pub market: String,
    /// Venue API key
    pub api_key: String,
    /// Venue API secret
    pub secret: String,
    /// Profitability threshold in percent
    pub delta: f64,
    /// Quote size of the first triangle leg
    pub lot: f64,
    /// Per-leg fee in percent
    pub fee: f64,
}

/// Gate enforcing "at most one running engine".
///
/// The mutex is held for the whole lifecycle transition; a second request
/// arriving meanwhile fails its `try_lock` and is rejected as busy instead of
/// racing the first one.
#[derive(Default)]
pub struct RobotController {
    robot: Mutex<Option<Robot>>,
}

impl RobotController {
    /// Create a controller with no running engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and start an engine; rejected when one is already running
    pub async fn start(&self, params: RobotParams) -> Result<()> {
        let mut guard = self
            .robot
            .try_lock()
            .map_err(|_| EngineError::InvalidState("service is busy".to_string()))?;
        if guard.is_some() {
            return Err(
                EngineError::InvalidState("robot has been already launched".to_string()).into(),
            );
        }

        let mut robot = Robot::create(
            &params.market,
            &params.api_key,
            &params.secret,
            params.delta / 100.0,
            params.fee,
            params.lot,
        )?;
        robot.start().await?;

        info!(market = robot.market(), lot = params.lot, "robot started");
        *guard = Some(robot);
        Ok(())
    }

    /// Stop and destroy the running engine
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self
            .robot
            .try_lock()
            .map_err(|_| EngineError::InvalidState("service is busy".to_string()))?;
        let mut robot = guard
            .take()
            .ok_or_else(|| EngineError::InvalidState("robot is not running".to_string()))?;

        robot.stop().await;
        info!(market = robot.market(), "robot stopped");
        Ok(())
    }

    /// Update `delta`, `lot` and `fee` of the running engine.
    ///
    /// Changing market or credentials is rejected, as is a request identical
    /// to the current state.
    pub async fn update(&self, params: RobotParams) -> Result<()> {
        let guard = self
            .robot
            .try_lock()
            .map_err(|_| EngineError::InvalidState("service is busy".to_string()))?;
        let robot = guard
            .as_ref()
            .ok_or_else(|| EngineError::InvalidState("robot is not running".to_string()))?;

        if params.market != robot.market()
            || params.api_key != robot.api_key()
            || params.secret != robot.secret()
        {
            return Err(EngineError::InvalidState(
                "you can update either delta, lot or fee".to_string(),
            )
            .into());
        }

        let threshold = params.delta / 100.0;
        let current = robot.tunables().get().await;
        if threshold == current.threshold && params.lot == current.lot && params.fee == current.fee
        {
            return Err(
                EngineError::InvalidState("no new parameters in request".to_string()).into(),
            );
        }

        robot
            .tunables()
            .set(Params {
                threshold,
                lot: params.lot,
                fee: params.fee,
            })
            .await;

        info!(
            market = robot.market(),
            lot = params.lot,
            delta = threshold,
            fee = params.fee,
            "robot updated"
        );
        Ok(())
    }

    /// Whether an engine is currently running
    pub async fn is_running(&self) -> bool {
        self.robot.lock().await.is_some()
    }
}

/// Build the control router over a shared controller
pub fn router(controller: Arc<RobotController>) -> Router {
    Router::new()
        .route(
            "/robot",
            post(start_robot).delete(stop_robot).put(update_robot),
        )
        .with_state(controller)
}

/// Bind the configured address and serve the control API until shutdown
pub async fn serve(config: &ServerConfig) -> Result<()> {
    let controller = Arc::new(RobotController::new());
    let app = router(controller);

    let listener = TcpListener::bind(config.address())
        .await
        .map_err(|e| EngineError::Connection(format!("bind {}: {e}", config.address())))?;
    info!(address = %config.address(), "control server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| EngineError::Connection(format!("control server: {e}")).into())
}

async fn start_robot(
    State(controller): State<Arc<RobotController>>,
    Json(params): Json<RobotParams>,
) -> (StatusCode, Json<Value>) {
    respond(controller.start(params).await)
}

async fn stop_robot(
    State(controller): State<Arc<RobotController>>,
) -> (StatusCode, Json<Value>) {
    respond(controller.stop().await)
}

async fn update_robot(
    State(controller): State<Arc<RobotController>>,
    Json(params): Json<RobotParams>,
) -> (StatusCode, Json<Value>) {
    respond(controller.update(params).await)
}

fn respond(result: Result<()>) -> (StatusCode, Json<Value>) {
    match result {
        Ok(()) => (StatusCode::CREATED, Json(json!({"status": "ok"}))),
        Err(err) => (StatusCode::BAD_REQUEST, Json(json!({"error": err.to_string()}))),
    }
}
