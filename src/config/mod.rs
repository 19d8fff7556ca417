//! # Declarative Controller Configuration
//!
//! ## Responsibility
//! Parse and validate TOML controller configuration files, then assemble a
//! ready [`ControlLoop`](crate::ControlLoop) from them:
//! ```text
//! resource-controller --config controller.toml
//! ```
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `ControllerConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Type-safe: unknown strategies, kinds and units are rejected by serde
//!
//! ## NOT Responsible For
//! - Running the loop (that belongs to `scheduler`)
//! - Measuring anything (that belongs to `measure`)

pub mod builder;
pub mod loader;
pub mod validation;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_INTERCEPTS;
use crate::strategy::pid::{DEFAULT_INTEGRAL_WINDOW, DEFAULT_SMOOTHING_WINDOW};
use crate::trainer::{DEFAULT_COLLECT_INTERVAL, DEFAULT_RETRAIN_INTERVAL};
use crate::ControlError;

pub use builder::ControllerBuilder;
pub use validation::ConfigError;

// ── Default value functions ──────────────────────────────────────────────

/// Default sub-step count: one evaluation per tick.
fn default_control_updates() -> u32 {
    1
}

/// Default measurement interval: 1.
fn default_interval() -> u64 {
    1
}

/// Default measurement interval unit: seconds.
fn default_interval_unit() -> TimeUnit {
    TimeUnit::Seconds
}

/// Default measurement source.
fn default_source() -> MeasureSource {
    MeasureSource::System
}

/// Default actuator weight: positive.
fn default_weight() -> i32 {
    1
}

/// Default PID scale for unmapped actuator names.
fn default_scale() -> f64 {
    1.0
}

/// Default PID trailing integral window.
fn default_integral_window() -> usize {
    DEFAULT_INTEGRAL_WINDOW
}

/// Default PID moving-average window.
fn default_smoothing_window() -> usize {
    DEFAULT_SMOOTHING_WINDOW
}

/// Default codec intercepts (CPU, memory).
fn default_intercepts() -> Vec<f64> {
    DEFAULT_INTERCEPTS.to_vec()
}

/// Default collect interval in seconds.
fn default_collect_secs() -> u64 {
    DEFAULT_COLLECT_INTERVAL.as_secs()
}

/// Default retrain interval in seconds.
fn default_retrain_secs() -> u64 {
    DEFAULT_RETRAIN_INTERVAL.as_secs()
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for one controller instance.
///
/// # Example
///
/// ```toml
/// [controller]
/// strategy = "pid"
/// runtime = 10
/// runtime_unit = "minutes"
///
/// [measure]
/// cpu_setpoint = 50.0
///
/// [[actuators]]
/// name = "threads"
/// kind = "integer"
/// initial = 4
/// min = 1
/// max = 64
///
/// [pid]
/// kp = 0.5
/// ki = 0.1
/// kd = 0.0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    /// Strategy selection and loop settings.
    pub controller: ControllerSection,
    /// Measurement source and setpoints.
    #[serde(default)]
    pub measure: MeasureSection,
    /// Actuators, in the order the loop holds them.
    #[serde(default)]
    pub actuators: Vec<ActuatorConfig>,
    /// PID settings; required when `strategy = "pid"`.
    pub pid: Option<PidConfig>,
    /// LQR model; required when `strategy = "lqr"`.
    pub lqr: Option<LqrConfig>,
    /// Online training settings.
    #[serde(default)]
    pub training: TrainingConfig,
}

/// Which strategy the loop runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// No actuation.
    Null,
    /// PID control.
    Pid,
    /// Adaptive log-domain LQR.
    Lqr,
}

/// Unit for durations given as plain integers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
}

impl TimeUnit {
    /// `value` of this unit as a [`Duration`].
    pub fn to_duration(self, value: u64) -> Duration {
        match self {
            Self::Milliseconds => Duration::from_millis(value),
            Self::Seconds => Duration::from_secs(value),
            Self::Minutes => Duration::from_secs(value.saturating_mul(60)),
            Self::Hours => Duration::from_secs(value.saturating_mul(3600)),
        }
    }
}

/// Strategy selection and loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerSection {
    /// Strategy to run.
    pub strategy: StrategyKind,
    /// Strategy evaluations per tick at start.
    #[serde(default = "default_control_updates")]
    pub control_updates: u32,
    /// Total runtime; absent means run until stopped.
    pub runtime: Option<u64>,
    /// Unit of `runtime`; required whenever `runtime` is set.
    pub runtime_unit: Option<TimeUnit>,
    /// Emit a CSV row per tick.
    #[serde(default)]
    pub print_output: bool,
    /// Number of initial rows to suppress.
    #[serde(default)]
    pub skip_print_count: u32,
}

impl ControllerSection {
    /// Total runtime, if one is configured with a unit.
    pub fn runtime_limit(&self) -> Option<Duration> {
        match (self.runtime, self.runtime_unit) {
            (Some(value), Some(unit)) => Some(unit.to_duration(value)),
            _ => None,
        }
    }
}

/// Where measurements come from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MeasureSource {
    /// No channels.
    Null,
    /// Process CPU and system memory via `sysinfo`.
    System,
}

/// Measurement source and setpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasureSection {
    /// Source of measurements.
    #[serde(default = "default_source")]
    pub source: MeasureSource,
    /// Tick period.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Unit of `interval`.
    #[serde(default = "default_interval_unit")]
    pub interval_unit: TimeUnit,
    /// Target process CPU in percent.
    pub cpu_setpoint: Option<f64>,
    /// Target memory utilisation in percent.
    pub memory_setpoint: Option<f64>,
}

impl Default for MeasureSection {
    fn default() -> Self {
        Self {
            source: default_source(),
            interval: default_interval(),
            interval_unit: default_interval_unit(),
            cpu_setpoint: None,
            memory_setpoint: None,
        }
    }
}

impl MeasureSection {
    /// Tick period as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        self.interval_unit.to_duration(self.interval)
    }
}

/// Numeric type of an actuator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    /// Whole-number knob.
    Integer,
    /// Floating-point knob.
    Float,
}

/// One actuator definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActuatorConfig {
    /// Unique name; also the key for PID scales and LQR inputs.
    pub name: String,
    /// Integer or float.
    pub kind: ActuatorKind,
    /// Starting value.
    pub initial: f64,
    /// Lower bound; defaults to the kind's minimum.
    pub min: Option<f64>,
    /// Upper bound; defaults to the kind's maximum.
    pub max: Option<f64>,
    /// −1, 0 or +1.
    #[serde(default = "default_weight")]
    pub weight: i32,
    /// Whether the weight may change at runtime.
    #[serde(default)]
    pub weight_mutable: bool,
}

/// PID gains, windows and per-actuator output scales.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PidConfig {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// Derivative gain.
    pub kd: f64,
    /// Trailing integral length in ticks.
    #[serde(default = "default_integral_window")]
    pub integral_window: usize,
    /// Measurement moving-average length in ticks.
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,
    /// Scale for actuators not listed in `scales`.
    #[serde(default = "default_scale")]
    pub default_scale: f64,
    /// Output scale per actuator name.
    #[serde(default)]
    pub scales: std::collections::BTreeMap<String, f64>,
}

/// State-space model and cost weights for the LQR strategy. Matrices are
/// row-major lists of rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LqrConfig {
    /// State transition (n × n).
    pub a: Vec<Vec<f64>>,
    /// Input matrix (n × m).
    pub b: Vec<Vec<f64>>,
    /// Output matrix (p × n).
    pub c: Vec<Vec<f64>>,
    /// Feed-through (p × m).
    pub d: Vec<Vec<f64>>,
    /// State cost (n × n).
    pub q: Vec<Vec<f64>>,
    /// Input cost (m × m).
    pub r: Vec<Vec<f64>>,
    /// Initial state; defaults to zeros.
    pub x0: Option<Vec<f64>>,
    /// Codec intercept per output channel.
    #[serde(default = "default_intercepts")]
    pub intercepts: Vec<f64>,
    /// Names of the controlled actuators in input order; defaults to all
    /// actuators in declaration order.
    pub controlled: Option<Vec<String>>,
}

impl LqrConfig {
    /// Controlled actuator names, resolving the default against `actuators`.
    pub fn controlled_names(&self, actuators: &[ActuatorConfig]) -> Vec<String> {
        self.controlled
            .clone()
            .unwrap_or_else(|| actuators.iter().map(|a| a.name.clone()).collect())
    }
}

/// Online training settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingConfig {
    /// Run the trainer.
    #[serde(default)]
    pub enabled: bool,
    /// Seconds between collects.
    #[serde(default = "default_collect_secs")]
    pub collect_interval_secs: u64,
    /// Seconds between refits.
    #[serde(default = "default_retrain_secs")]
    pub retrain_interval_secs: u64,
    /// Calibration recipes, one value per controlled actuator.
    #[serde(default)]
    pub calibration: Vec<Vec<f64>>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            collect_interval_secs: default_collect_secs(),
            retrain_interval_secs: default_retrain_secs(),
            calibration: Vec::new(),
        }
    }
}

impl From<ConfigError> for ControlError {
    fn from(e: ConfigError) -> Self {
        ControlError::Configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_unit_conversions() {
        assert_eq!(TimeUnit::Milliseconds.to_duration(250), Duration::from_millis(250));
        assert_eq!(TimeUnit::Minutes.to_duration(2), Duration::from_secs(120));
        assert_eq!(TimeUnit::Hours.to_duration(1), Duration::from_secs(3600));
    }

    #[test]
    fn test_runtime_limit_requires_unit() {
        let mut section = ControllerSection {
            strategy: StrategyKind::Null,
            control_updates: 1,
            runtime: Some(5),
            runtime_unit: None,
            print_output: false,
            skip_print_count: 0,
        };
        assert_eq!(section.runtime_limit(), None);
        section.runtime_unit = Some(TimeUnit::Seconds);
        assert_eq!(section.runtime_limit(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: ControllerConfig = toml::from_str("[controller]\nstrategy = \"null\"\n")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(config.controller.control_updates, 1);
        assert_eq!(config.measure.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.measure.source, MeasureSource::System);
        assert!(config.actuators.is_empty());
        assert!(!config.training.enabled);
        assert_eq!(config.training.collect_interval_secs, 60);
        assert_eq!(config.training.retrain_interval_secs, 600);
    }

    #[test]
    fn test_unknown_strategy_rejected_by_serde() {
        let res: Result<ControllerConfig, _> = toml::from_str("[controller]\nstrategy = \"mpc\"\n");
        assert!(res.is_err());
    }

    #[test]
    fn test_controlled_names_default_to_all_actuators() {
        let lqr = LqrConfig {
            a: vec![],
            b: vec![],
            c: vec![],
            d: vec![],
            q: vec![],
            r: vec![],
            x0: None,
            intercepts: default_intercepts(),
            controlled: None,
        };
        let acts = vec![ActuatorConfig {
            name: "x".into(),
            kind: ActuatorKind::Float,
            initial: 1.0,
            min: None,
            max: None,
            weight: 1,
            weight_mutable: false,
        }];
        assert_eq!(lqr.controlled_names(&acts), vec!["x".to_string()]);
    }
}
