//! # Adaptive LQR Strategy
//!
//! ## Responsibility
//! Discrete state-space LQR control operated in the log domain. Actuator
//! values enter the model as `ln(value)` and outputs leave it through the
//! shared [`ModelCodec`], which turns the multiplicative relationship between
//! knobs and resource usage into a linear one.
//!
//! ## Step
//! ```text
//! x ← A·x + B·u
//! y ← C·x + D·u
//! u ← u + K·(r − x)
//! ```
//! Each `u_i` is decoded, applied to the actuator with the matching id, and
//! re-encoded from the actuator's clamped value, so saturation at the knob is
//! fed back into the controller state.
//!
//! ## Guarantees
//! - Dimensions are validated once at construction; a malformed model never
//!   reaches `evaluate`.
//! - [`TrainableModel::update_model`] swaps B and K together, and only after
//!   the gain solve succeeded.

use std::sync::Arc;
use std::time::Duration;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

use super::gain::GainSolver;
use super::{ControlStrategy, TrainableModel};
use crate::actuator::{Actuator, ActuatorId};
use crate::codec::ModelCodec;
use crate::ControlError;

// ─── StateSpaceModel ─────────────────────────────────────────────────────────

/// Discrete linear system `x' = Ax + Bu`, `y = Cx + Du`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSpaceModel {
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    c: DMatrix<f64>,
    d: DMatrix<f64>,
}

impl StateSpaceModel {
    /// Build a model, checking that the four matrices agree.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Configuration`] when `A` is not square or the
    /// shapes of `B`, `C`, `D` are inconsistent with it.
    pub fn new(
        a: DMatrix<f64>,
        b: DMatrix<f64>,
        c: DMatrix<f64>,
        d: DMatrix<f64>,
    ) -> Result<Self, ControlError> {
        let n = a.nrows();
        if n == 0 || a.ncols() != n {
            return Err(ControlError::Configuration(format!(
                "A must be a non-empty square matrix, got {:?}",
                a.shape()
            )));
        }
        let m = b.ncols();
        if b.nrows() != n || m == 0 {
            return Err(ControlError::Configuration(format!(
                "B is {:?}, expected ({n}, m) with m >= 1",
                b.shape()
            )));
        }
        let p = c.nrows();
        if c.ncols() != n || p == 0 {
            return Err(ControlError::Configuration(format!(
                "C is {:?}, expected (p, {n}) with p >= 1",
                c.shape()
            )));
        }
        if d.shape() != (p, m) {
            return Err(ControlError::Configuration(format!(
                "D is {:?}, expected ({p}, {m})",
                d.shape()
            )));
        }
        Ok(Self { a, b, c, d })
    }

    /// Number of states (rows of A).
    pub fn states(&self) -> usize {
        self.a.nrows()
    }

    /// Number of inputs (columns of B).
    pub fn inputs(&self) -> usize {
        self.b.ncols()
    }

    /// Number of outputs (rows of C).
    pub fn outputs(&self) -> usize {
        self.c.nrows()
    }

    /// State transition matrix.
    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    /// Input matrix.
    pub fn b(&self) -> &DMatrix<f64> {
        &self.b
    }
}

// ─── LqrStrategy ─────────────────────────────────────────────────────────────

/// Log-domain LQR whose B matrix can be re-estimated online.
pub struct LqrStrategy {
    model: StateSpaceModel,
    q: DMatrix<f64>,
    r: DMatrix<f64>,
    k: DMatrix<f64>,
    x: DVector<f64>,
    u: DVector<f64>,
    y: Option<DVector<f64>>,
    input_ids: Vec<ActuatorId>,
    codec: Arc<ModelCodec>,
    solver: Arc<dyn GainSolver>,
}

impl std::fmt::Debug for LqrStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LqrStrategy")
            .field("model", &self.model)
            .field("k", &self.k)
            .field("x", &self.x)
            .field("u", &self.u)
            .field("input_ids", &self.input_ids)
            .finish_non_exhaustive()
    }
}

impl LqrStrategy {
    /// Build the strategy and compute the initial gain.
    ///
    /// `x` and `u` start at the log-domain origin; use
    /// [`LqrStrategy::with_initial_state`] to seed them.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Configuration`] if `Q`/`R` do not match the
    /// model, `input_ids` does not have one entry per input, the codec does
    /// not have one intercept per output, or the initial gain solve fails.
    pub fn new(
        model: StateSpaceModel,
        q: DMatrix<f64>,
        r: DMatrix<f64>,
        input_ids: Vec<ActuatorId>,
        codec: Arc<ModelCodec>,
        solver: Arc<dyn GainSolver>,
    ) -> Result<Self, ControlError> {
        let (n, m, p) = (model.states(), model.inputs(), model.outputs());
        if q.shape() != (n, n) {
            return Err(ControlError::Configuration(format!(
                "Q is {:?}, expected ({n}, {n})",
                q.shape()
            )));
        }
        if r.shape() != (m, m) {
            return Err(ControlError::Configuration(format!(
                "R is {:?}, expected ({m}, {m})",
                r.shape()
            )));
        }
        if input_ids.len() != m {
            return Err(ControlError::Configuration(format!(
                "{} controlled actuators for {m} model inputs",
                input_ids.len()
            )));
        }
        if codec.channels() != p {
            return Err(ControlError::Configuration(format!(
                "codec has {} channels for {p} model outputs",
                codec.channels()
            )));
        }
        let k = solver
            .solve(&model.a, &model.b, &q, &r)
            .map_err(|e| ControlError::Configuration(format!("initial gain: {e}")))?;
        info!(states = n, inputs = m, outputs = p, "lqr strategy constructed");

        Ok(Self {
            model,
            q,
            r,
            k,
            x: DVector::zeros(n),
            u: DVector::zeros(m),
            y: None,
            input_ids,
            codec,
            solver,
        })
    }

    /// Seed the state `x` and the log-domain input `u`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Configuration`] on a length mismatch.
    pub fn with_initial_state(
        mut self,
        x0: DVector<f64>,
        u0: DVector<f64>,
    ) -> Result<Self, ControlError> {
        if x0.len() != self.model.states() || u0.len() != self.model.inputs() {
            return Err(ControlError::Configuration(format!(
                "initial state lengths (x={}, u={}) do not match model ({}, {})",
                x0.len(),
                u0.len(),
                self.model.states(),
                self.model.inputs()
            )));
        }
        self.x = x0;
        self.u = u0;
        Ok(self)
    }

    /// Current state vector.
    pub fn x(&self) -> &DVector<f64> {
        &self.x
    }

    /// Current log-domain input vector.
    pub fn u(&self) -> &DVector<f64> {
        &self.u
    }

    /// Current feedback gain.
    pub fn k(&self) -> &DMatrix<f64> {
        &self.k
    }

    /// Current input matrix.
    pub fn b(&self) -> &DMatrix<f64> {
        self.model.b()
    }

    /// The underlying state-space model.
    pub fn model(&self) -> &StateSpaceModel {
        &self.model
    }
}

impl ControlStrategy for LqrStrategy {
    fn name(&self) -> &'static str {
        "lqr"
    }

    fn evaluate(
        &mut self,
        actuators: &mut [Actuator],
        _measurements: &[f64],
        setpoints: &[Option<f64>],
        _dt: Duration,
    ) -> bool {
        if super::all_setpoints_none(setpoints) {
            return false;
        }
        let n = self.model.states();
        let target = DVector::from_iterator(
            n,
            (0..n).map(|i| setpoints.get(i).copied().flatten().unwrap_or(0.0)),
        );

        self.x = &self.model.a * &self.x + &self.model.b * &self.u;
        self.y = Some(&self.model.c * &self.x + &self.model.d * &self.u);
        self.u += &self.k * (&target - &self.x);

        for (i, id) in self.input_ids.iter().enumerate() {
            let Some(actuator) = actuators.iter_mut().find(|a| a.id() == *id) else {
                warn!(actuator = %id, "lqr input has no matching actuator");
                continue;
            };
            actuator.set(self.codec.decode_parameter(self.u[i]));
            let encoded = self.codec.encode_parameter(actuator.value_f64());
            if encoded.is_finite() {
                self.u[i] = encoded;
            } else {
                debug!(actuator = %id, value = actuator.value_f64(), "clamped value has no log encoding");
            }
        }
        true
    }

    fn output(&self) -> Option<Vec<f64>> {
        self.y.as_ref().map(|y| {
            y.iter()
                .enumerate()
                .map(|(ch, v)| self.codec.decode_measurement(*v, ch))
                .collect()
        })
    }

    fn uses_encoded_setpoints(&self) -> bool {
        true
    }

    fn supports_online_training(&self) -> bool {
        true
    }

    fn as_trainable(&mut self) -> Option<&mut dyn TrainableModel> {
        Some(self)
    }
}

impl TrainableModel for LqrStrategy {
    fn input_ids(&self) -> &[ActuatorId] {
        &self.input_ids
    }

    fn output_channels(&self) -> usize {
        self.model.states()
    }

    fn update_model(&mut self, b: DMatrix<f64>) -> Result<(), ControlError> {
        let expected = self.model.b.shape();
        if b.shape() != expected {
            return Err(ControlError::ModelUpdate(format!(
                "new B is {:?}, expected {expected:?}",
                b.shape()
            )));
        }
        if b.iter().any(|v| !v.is_finite()) {
            return Err(ControlError::ModelUpdate(
                "new B contains non-finite entries".into(),
            ));
        }
        let k = self
            .solver
            .solve(&self.model.a, &b, &self.q, &self.r)
            .map_err(|e| ControlError::ModelUpdate(format!("gain solve: {e}")))?;
        self.model.b = b;
        self.k = k;
        info!(b = ?self.model.b.as_slice(), k = ?self.k.as_slice(), "lqr model updated");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
