//! Robot orchestrator: shared order-book state, triangle detection and
//! three-leg execution

pub mod detector;
pub mod engine;
pub mod executor;
pub mod state;

pub use detector::{cycle_value, CycleDirection, Detector, DetectorHandle};
pub use engine::{Robot, Triangle};
pub use executor::{format_quantity, Executor, MAX_IN_FLIGHT};
pub use state::{BookSide, BookStore, Params, Tunables};
