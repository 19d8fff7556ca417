//! # Model Codec
//!
//! ## Responsibility
//! Log-domain encoding used by the LQR strategy and the online trainer.
//! CPU and memory usage respond multiplicatively to the actuators, so both
//! sides are moved into log space where the relationship is linear:
//!
//! ```text
//! measurement:  encode(m) = ln(m) − intercept[channel]    decode(z) = exp(z + intercept[channel])
//! actuator:     encode(p) = ln(p)                         decode(z) = exp(z)
//! ```
//!
//! ## Sharing
//! One codec is shared (`Arc<ModelCodec>`) by the measurement source (to
//! encode setpoints), the LQR strategy (to decode outputs) and the trainer
//! (the only writer of intercepts). Intercepts are lock-free `AtomicU64`
//! bit-cast cells.
//!
//! ## Panics
//!
//! No function in this module ever panics.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Default intercepts for the (CPU, memory) channel pair.
pub const DEFAULT_INTERCEPTS: [f64; 2] = [0.39887, 4.2307403];

/// Per-channel log-domain encoder/decoder with adjustable intercepts.
#[derive(Debug)]
pub struct ModelCodec {
    intercepts: Vec<AtomicF64>,
}

impl ModelCodec {
    /// Create a codec with one intercept per measurement channel.
    pub fn new(intercepts: &[f64]) -> Self {
        Self {
            intercepts: intercepts.iter().copied().map(AtomicF64::new).collect(),
        }
    }

    /// Number of measurement channels this codec knows about.
    pub fn channels(&self) -> usize {
        self.intercepts.len()
    }

    /// Current intercept for `channel`, or `0.0` for an unknown channel.
    pub fn intercept(&self, channel: usize) -> f64 {
        self.intercepts
            .get(channel)
            .map(AtomicF64::load)
            .unwrap_or(0.0)
    }

    /// Replace the intercept for `channel`. Unknown channels are ignored.
    pub fn set_intercept(&self, channel: usize, value: f64) {
        if let Some(cell) = self.intercepts.get(channel) {
            let old = cell.load();
            cell.store(value);
            debug!(channel, old, new = value, "codec intercept updated");
        }
    }

    /// `ln(measurement) − intercept[channel]`.
    pub fn encode_measurement(&self, measurement: f64, channel: usize) -> f64 {
        measurement.ln() - self.intercept(channel)
    }

    /// `exp(encoded + intercept[channel])`.
    pub fn decode_measurement(&self, encoded: f64, channel: usize) -> f64 {
        (encoded + self.intercept(channel)).exp()
    }

    /// `ln(value)`.
    pub fn encode_parameter(&self, value: f64) -> f64 {
        value.ln()
    }

    /// `exp(encoded)`.
    pub fn decode_parameter(&self, encoded: f64) -> f64 {
        encoded.exp()
    }
}

impl Default for ModelCodec {
    fn default() -> Self {
        Self::new(&DEFAULT_INTERCEPTS)
    }
}

// ─── AtomicF64 ───────────────────────────────────────────────────────────────

/// Lock-free `f64` cell backed by an `AtomicU64` bit-cast.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Release);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
