//! # Control Strategies
//!
//! ## Responsibility
//! The pluggable unit that turns measurements and setpoints into actuator
//! adjustments. One strategy is selected at configuration time and owned by
//! the control loop for the whole run.
//!
//! ## Strategies
//! - [`null::NullStrategy`]: performs no actuation
//! - [`pid::PidStrategy`]: moving-average smoothed PID with a trailing
//!   integral window and per-actuator-name output scaling
//! - [`lqr::LqrStrategy`]: log-domain state-space LQR whose B matrix can be
//!   replaced online through [`TrainableModel`]
//!
//! ## Conventions
//! - A setpoint slice in which every entry is `None` means "skip this tick":
//!   every strategy returns `false` and leaves the actuators untouched.
//! - The loop selects behaviour through capability flags
//!   ([`ControlStrategy::uses_encoded_setpoints`],
//!   [`ControlStrategy::supports_online_training`]) rather than by
//!   inspecting the concrete type.

pub mod gain;
pub mod lqr;
pub mod null;
pub mod pid;

use std::time::Duration;

use nalgebra::DMatrix;

use crate::actuator::{Actuator, ActuatorId};
use crate::ControlError;

pub use lqr::{LqrStrategy, StateSpaceModel};
pub use null::NullStrategy;
pub use pid::{PidGains, PidStrategy};

/// A control strategy evaluated by the control loop.
pub trait ControlStrategy: Send {
    /// Short identifier used in logs (`"null"`, `"pid"`, `"lqr"`).
    fn name(&self) -> &'static str;

    /// Run one control step.
    ///
    /// `dt` is the duration one evaluation represents (tick interval divided
    /// by the current number of sub-steps). Returns `true` when the strategy
    /// evaluated, `false` when it skipped (all setpoints `None`, or nothing to
    /// do).
    fn evaluate(
        &mut self,
        actuators: &mut [Actuator],
        measurements: &[f64],
        setpoints: &[Option<f64>],
        dt: Duration,
    ) -> bool;

    /// The strategy's most recent output vector, if it produces one.
    fn output(&self) -> Option<Vec<f64>>;

    /// Whether this strategy expects log-domain (shaped) setpoints rather
    /// than raw ones.
    fn uses_encoded_setpoints(&self) -> bool {
        false
    }

    /// Whether the online trainer may refit this strategy's model.
    fn supports_online_training(&self) -> bool {
        false
    }

    /// Access to the refittable model, for strategies that support training.
    fn as_trainable(&mut self) -> Option<&mut dyn TrainableModel> {
        None
    }
}

/// A strategy whose input matrix can be re-estimated while running.
pub trait TrainableModel {
    /// IDs of the actuators driven by the model, in input-vector order.
    fn input_ids(&self) -> &[ActuatorId];

    /// Number of measurement channels (rows of B).
    fn output_channels(&self) -> usize;

    /// Replace B and recompute the gain.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::ModelUpdate`] when the new matrix is malformed
    /// or the gain solve fails; the previous model then stays in effect.
    fn update_model(&mut self, b: DMatrix<f64>) -> Result<(), ControlError>;
}

/// `true` when every entry is `None` (vacuously true for an empty slice).
pub fn all_setpoints_none(setpoints: &[Option<f64>]) -> bool {
    setpoints.iter().all(Option::is_none)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_setpoints_none_detects_skip_signal() {
        assert!(all_setpoints_none(&[None, None]));
        assert!(all_setpoints_none(&[]));
        assert!(!all_setpoints_none(&[None, Some(1.0)]));
    }
}
