//! # PID Strategy
//!
//! ## Responsibility
//! Classical PID control on every measurement channel that has a setpoint.
//!
//! ## Per-channel state
//! - a moving-average window over the raw measurement (smoothing)
//! - a trailing-window integral: a ring of the last `integral_window`
//!   `error × dt` terms; the evicted term is subtracted before the newest is
//!   added, so the integral never winds up beyond the window
//! - the previous error for the derivative term
//!
//! ## Actuation
//! The output of each channel is distributed to every actuator:
//! weight `Ignore` forces the actuator to `0`, otherwise the actuator moves
//! by `output × weight × scale(name)`. Scales are configured per actuator
//! name; unmapped names use the default scale.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::ControlStrategy;
use crate::actuator::{Actuator, Weight};
use crate::ControlError;

/// Default length of the trailing integral window (ticks).
pub const DEFAULT_INTEGRAL_WINDOW: usize = 30;
/// Default length of the measurement moving average (ticks).
pub const DEFAULT_SMOOTHING_WINDOW: usize = 5;

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// Derivative gain.
    pub kd: f64,
}

impl PidGains {
    /// Create a gain set.
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }
}

// ─── ChannelState ────────────────────────────────────────────────────────────

/// PID and smoothing state for one measurement channel.
#[derive(Debug, Clone)]
struct ChannelState {
    prev_error: f64,
    integral: f64,
    integral_terms: VecDeque<f64>,
    recent: VecDeque<f64>,
}

impl ChannelState {
    fn new(integral_window: usize, smoothing_window: usize) -> Self {
        Self {
            prev_error: 0.0,
            integral: 0.0,
            integral_terms: VecDeque::with_capacity(integral_window),
            recent: VecDeque::with_capacity(smoothing_window),
        }
    }

    /// Push a raw measurement and return the moving average.
    fn smooth(&mut self, measurement: f64, window: usize) -> f64 {
        if self.recent.len() == window {
            self.recent.pop_front();
        }
        self.recent.push_back(measurement);
        self.recent.iter().sum::<f64>() / self.recent.len() as f64
    }

    /// Advance the controller by one step and return its output.
    fn update(&mut self, gains: &PidGains, error: f64, dt: f64, window: usize) -> f64 {
        let term = error * dt;
        if self.integral_terms.len() == window {
            if let Some(oldest) = self.integral_terms.pop_front() {
                self.integral -= oldest;
            }
        }
        self.integral_terms.push_back(term);
        self.integral += term;

        let derivative = (error - self.prev_error) / dt;
        self.prev_error = error;
        gains.kp * error + gains.ki * self.integral + gains.kd * derivative
    }
}

// ─── PidStrategy ─────────────────────────────────────────────────────────────

/// PID strategy over all channels with a setpoint.
#[derive(Debug, Clone)]
pub struct PidStrategy {
    gains: PidGains,
    integral_window: usize,
    smoothing_window: usize,
    scales: HashMap<String, f64>,
    default_scale: f64,
    channels: Vec<ChannelState>,
    last_output: Option<Vec<f64>>,
}

impl PidStrategy {
    /// Create a strategy with default windows and a default scale of `1.0`.
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral_window: DEFAULT_INTEGRAL_WINDOW,
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
            scales: HashMap::new(),
            default_scale: 1.0,
            channels: Vec::new(),
            last_output: None,
        }
    }

    /// Set the trailing integral and moving-average window lengths.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Configuration`] if either window is zero.
    pub fn with_windows(
        mut self,
        integral_window: usize,
        smoothing_window: usize,
    ) -> Result<Self, ControlError> {
        if integral_window == 0 || smoothing_window == 0 {
            return Err(ControlError::Configuration(format!(
                "pid windows must be >= 1 (integral={integral_window}, smoothing={smoothing_window})"
            )));
        }
        self.integral_window = integral_window;
        self.smoothing_window = smoothing_window;
        self.channels.clear();
        Ok(self)
    }

    /// Use `scale` for actuators named `name`.
    pub fn with_scale(mut self, name: impl Into<String>, scale: f64) -> Self {
        self.scales.insert(name.into(), scale);
        self
    }

    /// Scale used for actuators without an explicit entry.
    pub fn with_default_scale(mut self, scale: f64) -> Self {
        self.default_scale = scale;
        self
    }

    /// The configured gains.
    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// Output scale applied to the actuator named `name`.
    pub fn scale_for(&self, name: &str) -> f64 {
        self.scales.get(name).copied().unwrap_or(self.default_scale)
    }

    fn ensure_channels(&mut self, count: usize) {
        while self.channels.len() < count {
            self.channels
                .push(ChannelState::new(self.integral_window, self.smoothing_window));
        }
    }

    fn apply(&self, actuators: &mut [Actuator], output: f64) {
        for actuator in actuators.iter_mut() {
            match actuator.weight() {
                Weight::Ignore => {
                    actuator.set(0.0);
                }
                weight => {
                    let step = output * weight.factor() * self.scale_for(actuator.name());
                    let target = actuator.value_f64() + step;
                    actuator.set(target);
                }
            }
        }
    }
}

impl ControlStrategy for PidStrategy {
    fn name(&self) -> &'static str {
        "pid"
    }

    fn evaluate(
        &mut self,
        actuators: &mut [Actuator],
        measurements: &[f64],
        setpoints: &[Option<f64>],
        dt: Duration,
    ) -> bool {
        if super::all_setpoints_none(setpoints) {
            return false;
        }
        let dt = dt.as_secs_f64();
        if dt <= 0.0 {
            warn!("pid evaluate called with zero dt; skipping");
            return false;
        }
        self.ensure_channels(setpoints.len());

        let mut outputs = vec![0.0; setpoints.len()];
        let mut evaluated = false;
        for (i, setpoint) in setpoints.iter().enumerate() {
            let (Some(setpoint), Some(&raw)) = (setpoint, measurements.get(i)) else {
                continue;
            };
            let (integral_window, smoothing_window, gains) =
                (self.integral_window, self.smoothing_window, self.gains);
            let channel = &mut self.channels[i];
            let smoothed = channel.smooth(raw, smoothing_window);
            let error = setpoint - smoothed;
            let output = channel.update(&gains, error, dt, integral_window);
            trace!(channel = i, error, output, "pid channel evaluated");

            self.apply(actuators, output);
            outputs[i] = output;
            evaluated = true;
        }
        if evaluated {
            self.last_output = Some(outputs);
        }
        evaluated
    }

    fn output(&self) -> Option<Vec<f64>> {
        self.last_output.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
