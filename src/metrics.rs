//! Prometheus metrics for the control loop.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup before starting the loop.
//! The recording helpers (`inc_tick`, `set_control_updates`, …) are no-ops if
//! `init_metrics` was never called, so library users and tests can run the
//! loop without a registry.
//!
//! ## Metrics Exposed
//!
//! | Name | Type |
//! |------|------|
//! | `controller_ticks_total` | Counter |
//! | `controller_tick_overruns_total` | Counter |
//! | `controller_control_updates` | Gauge |
//! | `controller_tick_duration_seconds` | Histogram |
//! | `controller_model_updates_total` | Counter |

use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

use crate::ControlError;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All controller metrics, stored together in a single [`OnceLock`].
pub struct Metrics {
    /// Registry that owns every descriptor below.
    pub registry: Registry,
    /// Completed ticks.
    pub ticks_total: IntCounter,
    /// Ticks that exceeded their period.
    pub overruns_total: IntCounter,
    /// Current number of strategy evaluations per tick.
    pub control_updates: IntGauge,
    /// Wall time spent inside each tick (before pacing).
    pub tick_duration: Histogram,
    /// Model refits accepted by the strategy.
    pub model_updates_total: IntCounter,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn init_err(e: prometheus::Error) -> ControlError {
    ControlError::Other(format!("metrics init failed: {e}"))
}

impl Metrics {
    fn build(registry: Registry) -> Result<Self, ControlError> {
        let ticks_total = IntCounter::new("controller_ticks_total", "Completed control-loop ticks")
            .map_err(init_err)?;
        let overruns_total = IntCounter::new(
            "controller_tick_overruns_total",
            "Ticks that overran their period",
        )
        .map_err(init_err)?;
        let control_updates = IntGauge::new(
            "controller_control_updates",
            "Strategy evaluations per tick",
        )
        .map_err(init_err)?;
        let tick_duration = Histogram::with_opts(HistogramOpts::new(
            "controller_tick_duration_seconds",
            "Time spent inside one tick before pacing",
        ))
        .map_err(init_err)?;
        let model_updates_total = IntCounter::new(
            "controller_model_updates_total",
            "Online model refits applied",
        )
        .map_err(init_err)?;

        registry
            .register(Box::new(ticks_total.clone()))
            .map_err(init_err)?;
        registry
            .register(Box::new(overruns_total.clone()))
            .map_err(init_err)?;
        registry
            .register(Box::new(control_updates.clone()))
            .map_err(init_err)?;
        registry
            .register(Box::new(tick_duration.clone()))
            .map_err(init_err)?;
        registry
            .register(Box::new(model_updates_total.clone()))
            .map_err(init_err)?;

        Ok(Self {
            registry,
            ticks_total,
            overruns_total,
            control_updates,
            tick_duration,
            model_updates_total,
        })
    }

    fn render(&self) -> String {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if TextEncoder::new().encode(&families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise the controller metrics in a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`ControlError::Other`] if metric construction or registration
/// fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), ControlError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let bundle = Metrics::build(Registry::new())?;
    let _ = METRICS.set(bundle);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one completed tick and observe its duration.
pub fn record_tick(d: Duration) {
    if let Some(m) = metrics() {
        m.ticks_total.inc();
        m.tick_duration.observe(d.as_secs_f64());
    }
}

/// Count one overrun tick.
pub fn inc_overrun() {
    if let Some(m) = metrics() {
        m.overruns_total.inc();
    }
}

/// Publish the current sub-step count.
pub fn set_control_updates(n: u32) {
    if let Some(m) = metrics() {
        m.control_updates.set(i64::from(n));
    }
}

/// Count one applied model refit.
pub fn record_model_update() {
    if let Some(m) = metrics() {
        m.model_updates_total.inc();
    }
}

/// Encode every metric in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or encoding
/// fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_text() -> String {
    metrics().map_or_else(String::new, Metrics::render)
}
