//! Assemble a [`ControlLoop`] from a validated [`ControllerConfig`].
//!
//! Actuator IDs come from a caller-supplied [`IdAllocator`], so two builds
//! sharing an allocator never hand out the same ID. The measurement source,
//! sink and gain solver default to the production implementations and can
//! be replaced before [`ControllerBuilder::build`].

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use tracing::{info, warn};

use super::validation::{self, ConfigError};
use super::{
    ActuatorConfig, ActuatorKind, ControllerConfig, LqrConfig, MeasureSection, MeasureSource,
    PidConfig, StrategyKind,
};
use crate::actuator::{Actuator, IdAllocator, Weight};
use crate::codec::ModelCodec;
use crate::measure::{MeasurementSource, NullMeasure};
use crate::scheduler::ControlLoop;
use crate::sink::OutputSink;
use crate::strategy::gain::{DareSolver, GainSolver};
use crate::strategy::{ControlStrategy, LqrStrategy, NullStrategy, PidGains, PidStrategy, StateSpaceModel};
use crate::trainer::{OnlineTrainer, TrainerConfig};
use crate::ControlError;

/// Builds a ready-to-start [`ControlLoop`].
pub struct ControllerBuilder {
    config: ControllerConfig,
    codec: Arc<ModelCodec>,
    measure: Option<Box<dyn MeasurementSource>>,
    sink: Option<Box<dyn OutputSink>>,
    solver: Arc<dyn GainSolver>,
}

impl ControllerBuilder {
    /// Start from a parsed configuration. The codec is created here from the
    /// LQR intercepts (or the defaults) so replacement sources can share it.
    pub fn new(config: ControllerConfig) -> Self {
        let codec = match &config.lqr {
            Some(lqr) => ModelCodec::new(&lqr.intercepts),
            None => ModelCodec::default(),
        };
        Self {
            config,
            codec: Arc::new(codec),
            measure: None,
            sink: None,
            solver: Arc::new(DareSolver::default()),
        }
    }

    /// The codec shared by the source, strategy and trainer.
    pub fn codec(&self) -> Arc<ModelCodec> {
        Arc::clone(&self.codec)
    }

    /// Use `measure` instead of the configured source.
    pub fn with_measure(mut self, measure: Box<dyn MeasurementSource>) -> Self {
        self.measure = Some(measure);
        self
    }

    /// Use `sink` instead of CSV on stdout.
    pub fn with_sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Use `solver` for LQR gains instead of [`DareSolver`].
    pub fn with_solver(mut self, solver: Arc<dyn GainSolver>) -> Self {
        self.solver = solver;
        self
    }

    /// Validate and assemble.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Configuration`] for any invalid setting.
    pub fn build(self, ids: &mut IdAllocator) -> Result<ControlLoop, ControlError> {
        let config = self.config;
        validation::validate(&config).map_err(|errors| {
            ConfigError::Validation(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        })?;

        let actuators = build_actuators(&config.actuators, ids)?;
        let measure = match self.measure {
            Some(measure) => measure,
            None => build_measure(&config.measure, Arc::clone(&self.codec))?,
        };

        let strategy: Box<dyn ControlStrategy> = match config.controller.strategy {
            StrategyKind::Null => Box::new(NullStrategy),
            StrategyKind::Pid => Box::new(build_pid(required(&config.pid, "pid")?)?),
            StrategyKind::Lqr => Box::new(build_lqr(
                required(&config.lqr, "lqr")?,
                &config.actuators,
                &actuators,
                Arc::clone(&self.codec),
                self.solver,
            )?),
        };
        let strategy_name = strategy.name();

        let mut control_loop = ControlLoop::new(measure, strategy, actuators);
        if let Some(sink) = self.sink {
            control_loop = control_loop.with_sink(sink);
        }
        if config.controller.strategy == StrategyKind::Lqr {
            let training = &config.training;
            let trainer = OnlineTrainer::new(
                TrainerConfig {
                    enabled: training.enabled,
                    collect_interval: std::time::Duration::from_secs(training.collect_interval_secs),
                    retrain_interval: std::time::Duration::from_secs(training.retrain_interval_secs),
                    calibration: training.calibration.clone(),
                },
                Arc::clone(&self.codec),
            )?;
            control_loop = control_loop.with_trainer(trainer)?;
        } else if config.training.enabled {
            warn!(strategy = strategy_name, "training is only used with the lqr strategy");
        }
        control_loop.set_number_of_control_updates(config.controller.control_updates)?;
        if let Some(limit) = config.controller.runtime_limit() {
            control_loop = control_loop.with_runtime(limit);
        }

        info!(
            strategy = strategy_name,
            actuators = config.actuators.len(),
            training = config.training.enabled,
            "controller built"
        );
        Ok(control_loop)
    }
}

fn required<'a, T>(section: &'a Option<T>, name: &str) -> Result<&'a T, ControlError> {
    section
        .as_ref()
        .ok_or_else(|| ControlError::Configuration(format!("missing [{name}] section")))
}

fn build_actuators(
    configs: &[ActuatorConfig],
    ids: &mut IdAllocator,
) -> Result<Vec<Actuator>, ControlError> {
    configs
        .iter()
        .map(|cfg| {
            let weight = Weight::try_from(cfg.weight)?;
            let actuator = match cfg.kind {
                ActuatorKind::Integer => Actuator::integer(ids, &cfg.name, cfg.initial.round() as i64),
                ActuatorKind::Float => Actuator::float(ids, &cfg.name, cfg.initial),
            };
            let min = cfg.min.unwrap_or(actuator.min());
            let max = cfg.max.unwrap_or(actuator.max());
            Ok(actuator
                .with_bounds(min, max)?
                .with_weight(weight)
                .with_weight_mutable(cfg.weight_mutable))
        })
        .collect()
}

fn build_measure(
    section: &MeasureSection,
    codec: Arc<ModelCodec>,
) -> Result<Box<dyn MeasurementSource>, ControlError> {
    let tick = section.tick_interval();
    match section.source {
        MeasureSource::Null => Ok(Box::new(NullMeasure::new(tick))),
        MeasureSource::System => system_measure(section, codec),
    }
}

#[cfg(feature = "system-measure")]
fn system_measure(
    section: &MeasureSection,
    codec: Arc<ModelCodec>,
) -> Result<Box<dyn MeasurementSource>, ControlError> {
    Ok(Box::new(crate::measure::system::SystemMeasure::new(
        section.tick_interval(),
        section.cpu_setpoint,
        section.memory_setpoint,
        codec,
    )))
}

#[cfg(not(feature = "system-measure"))]
fn system_measure(
    _section: &MeasureSection,
    _codec: Arc<ModelCodec>,
) -> Result<Box<dyn MeasurementSource>, ControlError> {
    Err(ControlError::Configuration(
        "measure.source = \"system\" needs the system-measure feature".into(),
    ))
}

fn build_pid(cfg: &PidConfig) -> Result<PidStrategy, ControlError> {
    let strategy = PidStrategy::new(PidGains::new(cfg.kp, cfg.ki, cfg.kd))
        .with_windows(cfg.integral_window, cfg.smoothing_window)?
        .with_default_scale(cfg.default_scale);
    Ok(cfg
        .scales
        .iter()
        .fold(strategy, |s, (name, scale)| s.with_scale(name.clone(), *scale)))
}

fn matrix(rows: &[Vec<f64>], field: &str) -> Result<DMatrix<f64>, ControlError> {
    let cols = rows.first().map_or(0, Vec::len);
    if rows.is_empty() || cols == 0 || rows.iter().any(|r| r.len() != cols) {
        return Err(ControlError::Configuration(format!(
            "lqr.{field} must be a non-empty rectangular matrix"
        )));
    }
    Ok(DMatrix::from_fn(rows.len(), cols, |r, c| rows[r][c]))
}

fn build_lqr(
    cfg: &LqrConfig,
    actuator_configs: &[ActuatorConfig],
    actuators: &[Actuator],
    codec: Arc<ModelCodec>,
    solver: Arc<dyn GainSolver>,
) -> Result<LqrStrategy, ControlError> {
    let model = StateSpaceModel::new(
        matrix(&cfg.a, "a")?,
        matrix(&cfg.b, "b")?,
        matrix(&cfg.c, "c")?,
        matrix(&cfg.d, "d")?,
    )?;

    let mut input_ids = Vec::new();
    let mut u0 = Vec::new();
    for name in cfg.controlled_names(actuator_configs) {
        let actuator = actuators
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| ControlError::Configuration(format!("unknown controlled actuator {name:?}")))?;
        input_ids.push(actuator.id());
        u0.push(codec.encode_parameter(actuator.value_f64()));
    }
    let x0 = match &cfg.x0 {
        Some(x0) => DVector::from_column_slice(x0),
        None => DVector::zeros(model.states()),
    };

    let q = matrix(&cfg.q, "q")?;
    let r = matrix(&cfg.r, "r")?;
    LqrStrategy::new(model, q, r, input_ids, codec, solver)?
        .with_initial_state(x0, DVector::from_vec(u0))
}
