//! # Measurement Sources
//!
//! ## Responsibility
//! Produce the raw measurement vector and the target setpoints once per
//! tick. The control loop calls [`MeasurementSource::measure`] first, then
//! reads the snapshot through the getters, so a source only touches the OS
//! (or its script) once per tick.
//!
//! ## Implementations
//! - [`NullMeasure`]: no channels; every strategy skips
//! - [`ScriptedMeasure`]: replays a fixed measurement sequence
//! - [`system::SystemMeasure`] (feature `system-measure`): process CPU and
//!   system memory utilisation through `sysinfo`
//!
//! ## Setpoint shaping
//! [`MeasurementSource::setpoints`] returns log-domain targets for strategies
//! that work in the codec's space; [`shape_setpoints`] is the shared
//! transform (clamp to at least `1.0`, then encode per channel).

#[cfg(feature = "system-measure")]
pub mod system;

use std::sync::Arc;
use std::time::Duration;

use crate::codec::ModelCodec;

/// Lowest raw setpoint accepted before log encoding.
pub const MIN_SETPOINT: f64 = 1.0;

/// Source of measurements and setpoints for the control loop.
pub trait MeasurementSource: Send {
    /// Refresh the internal snapshot. May block briefly on OS calls.
    fn measure(&mut self);

    /// Measurements from the most recent [`measure`](Self::measure) call,
    /// one entry per channel.
    fn measurements(&self) -> Vec<f64>;

    /// Log-domain setpoints. `n_updates` and `elapsed_sec` let a source shape
    /// targets over time; `None` means "no target on this channel".
    fn setpoints(&self, n_updates: u32, elapsed_sec: u64) -> Vec<Option<f64>>;

    /// Setpoints in measurement units.
    fn raw_setpoints(&self) -> Vec<Option<f64>>;

    /// Tick period the control loop should run at.
    fn tick_interval(&self) -> Duration;

    /// Display name of each channel, used for output headers.
    fn channel_names(&self) -> Vec<String>;
}

/// Clamp every present setpoint to at least [`MIN_SETPOINT`], in
/// measurement units. `None` entries stay `None`.
pub fn clamp_setpoints(raw: &[Option<f64>]) -> Vec<Option<f64>> {
    raw.iter().map(|sp| sp.map(|v| v.max(MIN_SETPOINT))).collect()
}

/// [`clamp_setpoints`], then encode each target with the channel's
/// intercept. `None` entries stay `None`.
pub fn shape_setpoints(codec: &ModelCodec, raw: &[Option<f64>]) -> Vec<Option<f64>> {
    clamp_setpoints(raw)
        .into_iter()
        .enumerate()
        .map(|(ch, sp)| sp.map(|v| codec.encode_measurement(v, ch)))
        .collect()
}

// ─── NullMeasure ─────────────────────────────────────────────────────────────

/// A source with no channels. Pairs with the null strategy when only the
/// loop's pacing and output are wanted.
#[derive(Debug, Clone)]
pub struct NullMeasure {
    tick: Duration,
}

impl NullMeasure {
    /// Create a source ticking at `tick`.
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }
}

impl Default for NullMeasure {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl MeasurementSource for NullMeasure {
    fn measure(&mut self) {}

    fn measurements(&self) -> Vec<f64> {
        Vec::new()
    }

    fn setpoints(&self, _n_updates: u32, _elapsed_sec: u64) -> Vec<Option<f64>> {
        Vec::new()
    }

    fn raw_setpoints(&self) -> Vec<Option<f64>> {
        Vec::new()
    }

    fn tick_interval(&self) -> Duration {
        self.tick
    }

    fn channel_names(&self) -> Vec<String> {
        Vec::new()
    }
}

// ─── ScriptedMeasure ─────────────────────────────────────────────────────────

/// Replays a fixed sequence of measurement frames.
///
/// Each [`measure`](MeasurementSource::measure) call advances one frame; the
/// last frame repeats once the script is exhausted.
#[derive(Debug, Clone)]
pub struct ScriptedMeasure {
    tick: Duration,
    frames: Vec<Vec<f64>>,
    cursor: Option<usize>,
    setpoints: Vec<Option<f64>>,
    names: Vec<String>,
    codec: Arc<ModelCodec>,
}

impl ScriptedMeasure {
    /// Create a scripted source. Channel names default to `ch0`, `ch1`, ….
    pub fn new(
        tick: Duration,
        frames: Vec<Vec<f64>>,
        setpoints: Vec<Option<f64>>,
        codec: Arc<ModelCodec>,
    ) -> Self {
        let names = (0..setpoints.len()).map(|i| format!("ch{i}")).collect();
        Self {
            tick,
            frames,
            cursor: None,
            setpoints,
            names,
            codec,
        }
    }

    /// Override the channel names.
    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = names;
        self
    }

    /// Number of `measure` calls that advanced the script.
    pub fn position(&self) -> usize {
        self.cursor.map_or(0, |c| c + 1)
    }
}

impl MeasurementSource for ScriptedMeasure {
    fn measure(&mut self) {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next < self.frames.len() {
            self.cursor = Some(next);
        }
    }

    fn measurements(&self) -> Vec<f64> {
        self.cursor
            .and_then(|c| self.frames.get(c))
            .cloned()
            .unwrap_or_default()
    }

    fn setpoints(&self, _n_updates: u32, _elapsed_sec: u64) -> Vec<Option<f64>> {
        shape_setpoints(&self.codec, &self.setpoints)
    }

    fn raw_setpoints(&self) -> Vec<Option<f64>> {
        self.setpoints.clone()
    }

    fn tick_interval(&self) -> Duration {
        self.tick
    }

    fn channel_names(&self) -> Vec<String> {
        self.names.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_setpoints_clamps_and_encodes() {
        let codec = ModelCodec::new(&[0.0, 1.0]);
        let shaped = shape_setpoints(&codec, &[Some(0.2), Some(std::f64::consts::E)]);
        assert_eq!(shaped[0], Some(0.0));
        assert!(shaped[1].map(|v| v.abs() < 1e-12).unwrap_or(false));
    }

    #[test]
    fn test_clamp_setpoints_raises_low_targets_only() {
        let clamped = clamp_setpoints(&[Some(0.25), None, Some(42.0)]);
        assert_eq!(clamped, vec![Some(MIN_SETPOINT), None, Some(42.0)]);
    }

    #[test]
    fn test_shape_setpoints_keeps_none() {
        let codec = ModelCodec::default();
        let shaped = shape_setpoints(&codec, &[None, Some(50.0)]);
        assert!(shaped[0].is_none());
        assert!(shaped[1].is_some());
    }

    #[test]
    fn test_null_measure_has_no_channels() {
        let mut m = NullMeasure::new(Duration::from_millis(100));
        m.measure();
        assert!(m.measurements().is_empty());
        assert!(m.setpoints(1, 0).is_empty());
        assert_eq!(m.tick_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_scripted_measure_replays_then_holds_last_frame() {
        let mut m = ScriptedMeasure::new(
            Duration::from_millis(10),
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            vec![Some(5.0), None],
            Arc::new(ModelCodec::default()),
        );
        assert!(m.measurements().is_empty());
        m.measure();
        assert_eq!(m.measurements(), vec![1.0, 2.0]);
        m.measure();
        m.measure();
        assert_eq!(m.measurements(), vec![3.0, 4.0]);
        assert_eq!(m.position(), 2);
        assert_eq!(m.raw_setpoints(), vec![Some(5.0), None]);
        assert_eq!(m.channel_names(), vec!["ch0".to_string(), "ch1".to_string()]);
    }
}
