//! # Actuators
//!
//! ## Responsibility
//! A bounded, named, weighted control knob that strategies adjust every tick.
//! Actuators are created once during setup, held in a fixed-order slice by
//! the control loop, and mutated only inside a strategy's `evaluate`.
//!
//! ## Guarantees
//! - `value` is always inside `[min, max]` after any [`Actuator::set`]
//! - `set` reports `false` iff clamping was required, but still applies the
//!   clamped value
//! - IDs come from an explicit [`IdAllocator`] and are never reused by it
//!
//! ## Panics
//!
//! No function in this module ever panics.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ControlError;

// ─── ActuatorId / IdAllocator ────────────────────────────────────────────────

/// Process-unique actuator identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActuatorId(pub u32);

impl fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out monotonically increasing [`ActuatorId`]s.
///
/// Owned by whoever builds the actuator set (usually
/// [`crate::config::builder::ControllerBuilder`]); two allocators are
/// independent scopes.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    /// Create an allocator whose first ID is `0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the next unused ID.
    pub fn allocate(&mut self) -> ActuatorId {
        let id = ActuatorId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }

    /// Number of IDs handed out so far.
    pub fn allocated(&self) -> u32 {
        self.next
    }
}

// ─── Weight ──────────────────────────────────────────────────────────────────

/// Sign modifier some strategies apply to their output for an actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weight {
    /// Move the actuator against the controller output.
    Negative,
    /// Force the actuator to zero.
    Ignore,
    /// Move the actuator with the controller output.
    #[default]
    Positive,
}

impl Weight {
    /// The multiplier this weight contributes: `-1.0`, `0.0` or `1.0`.
    pub fn factor(self) -> f64 {
        match self {
            Weight::Negative => -1.0,
            Weight::Ignore => 0.0,
            Weight::Positive => 1.0,
        }
    }
}

impl TryFrom<i32> for Weight {
    type Error = ControlError;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            -1 => Ok(Weight::Negative),
            0 => Ok(Weight::Ignore),
            1 => Ok(Weight::Positive),
            other => Err(ControlError::Configuration(format!(
                "weight must be -1, 0 or 1, got {other}"
            ))),
        }
    }
}

// ─── ActuatorValue ───────────────────────────────────────────────────────────

/// The typed value an actuator holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorValue {
    /// Whole-number knob (thread counts, buffer sizes, ...).
    Integer(i64),
    /// Continuous knob.
    Float(f64),
}

impl ActuatorValue {
    /// The value widened to `f64`.
    pub fn as_f64(self) -> f64 {
        match self {
            ActuatorValue::Integer(v) => v as f64,
            ActuatorValue::Float(v) => v,
        }
    }
}

impl fmt::Display for ActuatorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorValue::Integer(v) => write!(f, "{v}"),
            ActuatorValue::Float(v) => write!(f, "{v:.6}"),
        }
    }
}

// ─── Actuator ────────────────────────────────────────────────────────────────

/// A bounded, identified, weighted control knob.
#[derive(Debug, Clone)]
pub struct Actuator {
    id: ActuatorId,
    name: String,
    value: ActuatorValue,
    min: f64,
    max: f64,
    weight: Weight,
    weight_mutable: bool,
}

impl Actuator {
    /// Create an integer actuator with the full `i64` range as bounds.
    pub fn integer(ids: &mut IdAllocator, name: impl Into<String>, initial: i64) -> Self {
        Self {
            id: ids.allocate(),
            name: name.into(),
            value: ActuatorValue::Integer(initial),
            min: i64::MIN as f64,
            max: i64::MAX as f64,
            weight: Weight::Positive,
            weight_mutable: true,
        }
    }

    /// Create a float actuator with the full finite `f64` range as bounds.
    pub fn float(ids: &mut IdAllocator, name: impl Into<String>, initial: f64) -> Self {
        Self {
            id: ids.allocate(),
            name: name.into(),
            value: ActuatorValue::Float(initial),
            min: f64::MIN,
            max: f64::MAX,
            weight: Weight::Positive,
            weight_mutable: true,
        }
    }

    /// Restrict the actuator to `[min, max]`, clamping the current value.
    ///
    /// Integer actuators keep only the whole numbers inside the range, so
    /// `[1.5, 2.5]` is stored as `[2, 2]`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Configuration`] if either bound is NaN,
    /// `min > max`, or an integer actuator's range holds no whole number.
    pub fn with_bounds(mut self, min: f64, max: f64) -> Result<Self, ControlError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(ControlError::Configuration(format!(
                "actuator '{}': invalid bounds [{min}, {max}]",
                self.name
            )));
        }
        let (min, max) = match self.value {
            ActuatorValue::Integer(_) => (min.ceil(), max.floor()),
            ActuatorValue::Float(_) => (min, max),
        };
        if min > max {
            return Err(ControlError::Configuration(format!(
                "actuator '{}': no whole number in bounds",
                self.name
            )));
        }
        self.min = min;
        self.max = max;
        let current = self.value.as_f64();
        self.set(current);
        Ok(self)
    }

    /// Set the initial weight.
    pub fn with_weight(mut self, weight: Weight) -> Self {
        self.weight = weight;
        self
    }

    /// Allow or forbid later [`Actuator::set_weight`] calls.
    pub fn with_weight_mutable(mut self, mutable: bool) -> Self {
        self.weight_mutable = mutable;
        self
    }

    /// The actuator's ID.
    pub fn id(&self) -> ActuatorId {
        self.id
    }

    /// Display name, also used to look up per-name strategy scaling.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current typed value.
    pub fn get(&self) -> ActuatorValue {
        self.value
    }

    /// Current value widened to `f64`.
    pub fn value_f64(&self) -> f64 {
        self.value.as_f64()
    }

    /// Lower bound.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Upper bound.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Current weight.
    pub fn weight(&self) -> Weight {
        self.weight
    }

    /// Whether [`Actuator::set_weight`] is allowed.
    pub fn weight_mutable(&self) -> bool {
        self.weight_mutable
    }

    /// Change the weight. Returns `false` and leaves the weight unchanged
    /// when the actuator was built with an immutable weight.
    pub fn set_weight(&mut self, weight: Weight) -> bool {
        if !self.weight_mutable {
            return false;
        }
        self.weight = weight;
        true
    }

    /// Apply `requested`, clamped to `[min, max]`.
    ///
    /// Integer actuators round to the nearest whole number first and then
    /// clamp, so the stored value never leaves `[min, max]`. Returns `false`
    /// iff the (rounded) request was out of range (the clamped value is
    /// still applied). A NaN request leaves the value untouched and returns
    /// `false`.
    pub fn set(&mut self, requested: f64) -> bool {
        if requested.is_nan() {
            debug!(actuator = %self.name, "NaN set request ignored");
            return false;
        }
        let requested = match self.value {
            ActuatorValue::Integer(_) => requested.round(),
            ActuatorValue::Float(_) => requested,
        };
        let clamped = requested.clamp(self.min, self.max);
        let in_range = clamped == requested;
        self.value = match self.value {
            // `as` saturates at the i64 range.
            ActuatorValue::Integer(_) => ActuatorValue::Integer(clamped as i64),
            ActuatorValue::Float(_) => ActuatorValue::Float(clamped),
        };
        if !in_range {
            debug!(
                actuator = %self.name,
                requested,
                applied = self.value.as_f64(),
                "actuator set request clamped"
            );
        }
        in_range
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
