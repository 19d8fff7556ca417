//! # tokio-resource-controller
//!
//! An adaptive feedback controller that keeps a resource signal (process CPU
//! and system memory utilisation) near a target by adjusting a set of bounded
//! actuators on a fixed-period tokio control loop.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────── ControlLoop (one tokio task) ───────────────────┐
//!  tick ──►  │ MeasurementSource ──► ControlStrategy::evaluate ×n ──► OnlineTrainer │ ──► OutputSink
//!            │        ▲                     │ (Null | PID | LQR)         │         │
//!            │        └──── ModelCodec ◄────┴──── update_model(B) ◄─────┘         │
//!            └──────────────────────────────────────────────────────────────────────┘
//!  deadline task ──► running flag ◄── stop()
//! ```
//!
//! Strategies are chosen at configuration time (see [`config`]). The LQR
//! strategy works in log-domain via [`codec::ModelCodec`] and can have its
//! input matrix re-estimated online by [`trainer::OnlineTrainer`].

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod actuator;
pub mod codec;
pub mod config;
pub mod measure;
pub mod metrics;
pub mod scheduler;
pub mod sink;
pub mod strategy;
pub mod trainer;

// Re-exports for convenience
pub use actuator::{Actuator, ActuatorId, ActuatorValue, IdAllocator, Weight};
pub use codec::ModelCodec;
pub use scheduler::{ControlLoop, RunReport, StopHandle};
pub use strategy::{ControlStrategy, TrainableModel};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`ControlError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), ControlError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init(),
    };

    result.map_err(|e| ControlError::Other(format!("tracing init failed: {e}")))
}

/// Top-level controller errors.
///
/// Setup problems surface as [`ControlError::Configuration`] before the loop
/// starts. Lifecycle problems surface synchronously from
/// [`ControlLoop::start`]. A failed model refit is fatal for the run and is
/// reported from [`ControlLoop::join`].
#[derive(Error, Debug)]
pub enum ControlError {
    /// Invalid construction arguments: missing or mismatched matrices,
    /// out-of-range weights, a finite runtime without a time unit, ...
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `start` was called while a loop is already active, or a setting that
    /// may only change while stopped was written during a run.
    #[error("control loop is already running")]
    AlreadyRunning,

    /// The loop's execution context could not be brought up.
    #[error("control loop failed to start: {0}")]
    StartFailure(String),

    /// Regression or gain solve failed while retraining the LQR model.
    ///
    /// The previous B and K stay in effect; the run is halted.
    #[error("model update failed: {0}")]
    ModelUpdate(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display_includes_message() {
        let err = ControlError::Configuration("B has 3 columns, expected 2".to_string());
        assert!(err.to_string().contains("B has 3 columns"));
    }

    #[test]
    fn test_already_running_display() {
        assert_eq!(
            ControlError::AlreadyRunning.to_string(),
            "control loop is already running"
        );
    }

    #[test]
    fn test_model_update_display_includes_cause() {
        let err = ControlError::ModelUpdate("singular matrix".to_string());
        assert!(err.to_string().contains("singular matrix"));
    }

    #[test]
    fn test_init_tracing_second_call_returns_err() {
        // First call may succeed or fail depending on test execution order.
        let _ = init_tracing();
        let result = init_tracing();
        assert!(result.is_err(), "double init must return Err, not panic");
    }
}
