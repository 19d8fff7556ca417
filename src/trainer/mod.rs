//! # Online Model Trainer
//!
//! ## Responsibility
//! Re-estimate the LQR input matrix `B` and the codec intercepts from data
//! observed while the loop runs.
//!
//! ## Cadences
//! Both are measured on elapsed run time and advance past the current time
//! whenever they fire, so a late tick never triggers the same deadline twice.
//! - **collect** (`collect_interval`, default 60 s): fold the current
//!   measurements into the bucket for the live recipe, then, while the
//!   calibration sweep is active, force the actuators to the next row
//! - **retrain** (`retrain_interval`, default 600 s): per channel, fit
//!   `ln(mean) ≈ intercept + Σ bᵢ·ln(recipeᵢ)` over all buckets; the slopes
//!   form row `ch` of `B`, the intercept becomes the codec intercept
//!
//! ## Failure policy
//! A fit or model-update failure surfaces as [`ControlError::ModelUpdate`]
//! and halts the loop. Intercepts are written only after the strategy
//! accepted the new `B`, so a failed update leaves both untouched. Too few
//! usable buckets is not a failure: the retrain is skipped with a warning.

pub mod regression;

use std::sync::Arc;
use std::time::Duration;

use nalgebra::DMatrix;
use tracing::{debug, info, warn};

use crate::actuator::Actuator;
use crate::codec::ModelCodec;
use crate::metrics;
use crate::strategy::TrainableModel;
use crate::ControlError;

use regression::fit_ols;

/// Default collect cadence.
pub const DEFAULT_COLLECT_INTERVAL: Duration = Duration::from_secs(60);
/// Default retrain cadence (ten collects).
pub const DEFAULT_RETRAIN_INTERVAL: Duration = Duration::from_secs(600);

/// Trainer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
    /// Whether the trainer runs at all.
    pub enabled: bool,
    /// Time between collects.
    pub collect_interval: Duration,
    /// Time between refits.
    pub retrain_interval: Duration,
    /// Calibration recipes, one value per controlled actuator, applied in
    /// order at each collect while the sweep is active.
    pub calibration: Vec<Vec<f64>>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            collect_interval: DEFAULT_COLLECT_INTERVAL,
            retrain_interval: DEFAULT_RETRAIN_INTERVAL,
            calibration: Vec::new(),
        }
    }
}

// ─── ValueSample ─────────────────────────────────────────────────────────────

/// Running mean of the measurements observed under one exact recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSample {
    recipe: Vec<f64>,
    mean: Vec<f64>,
    count: u64,
}

impl ValueSample {
    /// Start a bucket from its first observation.
    pub fn new(recipe: Vec<f64>, observation: &[f64]) -> Self {
        Self {
            recipe,
            mean: observation.to_vec(),
            count: 1,
        }
    }

    /// Exact recipe equality.
    pub fn matches(&self, recipe: &[f64]) -> bool {
        self.recipe.as_slice() == recipe
    }

    /// Fold one more observation into the mean.
    pub fn observe(&mut self, observation: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for (mean, obs) in self.mean.iter_mut().zip(observation) {
            *mean += (obs - *mean) / n;
        }
    }

    /// Actuator values that produced this bucket.
    pub fn recipe(&self) -> &[f64] {
        &self.recipe
    }

    /// Mean measurement per channel.
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Number of observations folded in.
    pub fn count(&self) -> u64 {
        self.count
    }
}

// ─── OnlineTrainer ───────────────────────────────────────────────────────────

/// Collects recipe/measurement buckets and refits the model on a schedule.
#[derive(Debug)]
pub struct OnlineTrainer {
    config: TrainerConfig,
    codec: Arc<ModelCodec>,
    samples: Vec<ValueSample>,
    next_collect: Duration,
    next_retrain: Duration,
    next_row: usize,
    retrains: u64,
}

impl OnlineTrainer {
    /// Create a trainer.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Configuration`] for a zero interval.
    pub fn new(config: TrainerConfig, codec: Arc<ModelCodec>) -> Result<Self, ControlError> {
        if config.collect_interval.is_zero() || config.retrain_interval.is_zero() {
            return Err(ControlError::Configuration(
                "trainer intervals must be non-zero".into(),
            ));
        }
        Ok(Self {
            next_collect: config.collect_interval,
            next_retrain: config.retrain_interval,
            config,
            codec,
            samples: Vec::new(),
            next_row: 0,
            retrains: 0,
        })
    }

    /// Check the trainer against a model with `inputs` controlled actuators
    /// and `outputs` fitted channels.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Configuration`] on a calibration row of the
    /// wrong width, or when an enabled trainer's codec does not have one
    /// intercept per fitted channel.
    pub fn validate_for(&self, inputs: usize, outputs: usize) -> Result<(), ControlError> {
        if self.config.enabled && self.codec.channels() != outputs {
            return Err(ControlError::Configuration(format!(
                "model fits {outputs} channels but the codec has {} intercepts",
                self.codec.channels()
            )));
        }
        match self
            .config
            .calibration
            .iter()
            .position(|row| row.len() != inputs)
        {
            Some(i) => Err(ControlError::Configuration(format!(
                "calibration row {i} has {} values for {inputs} controlled actuators",
                self.config.calibration[i].len()
            ))),
            None => Ok(()),
        }
    }

    /// Whether bookkeeping runs at all.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Whether the calibration sweep is still in progress. The loop does not
    /// evaluate the strategy while this is `true`.
    pub fn is_training(&self) -> bool {
        self.config.enabled && self.next_row < self.config.calibration.len()
    }

    /// Buckets collected so far.
    pub fn samples(&self) -> &[ValueSample] {
        &self.samples
    }

    /// Number of refits that reached the model.
    pub fn retrain_count(&self) -> u64 {
        self.retrains
    }

    /// Run whatever collect/retrain deadlines `elapsed` has passed.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::ModelUpdate`] when a refit fails.
    pub fn on_tick(
        &mut self,
        elapsed: Duration,
        measurements: &[f64],
        actuators: &mut [Actuator],
        model: &mut dyn TrainableModel,
    ) -> Result<(), ControlError> {
        if elapsed >= self.next_collect {
            self.next_collect = next_deadline(elapsed, self.config.collect_interval);
            self.collect(measurements, actuators, model)?;
        }
        if elapsed >= self.next_retrain {
            self.next_retrain = next_deadline(elapsed, self.config.retrain_interval);
            self.retrain(model)?;
        }
        Ok(())
    }

    /// Record one observation and advance the calibration sweep.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::ModelUpdate`] when the final refit at the end
    /// of the sweep fails.
    pub fn collect(
        &mut self,
        measurements: &[f64],
        actuators: &mut [Actuator],
        model: &mut dyn TrainableModel,
    ) -> Result<(), ControlError> {
        let ids = model.input_ids().to_vec();
        let recipe: Option<Vec<f64>> = ids
            .iter()
            .map(|id| actuators.iter().find(|a| a.id() == *id).map(Actuator::value_f64))
            .collect();
        match recipe {
            Some(recipe) => self.record(recipe, measurements),
            None => warn!("controlled actuator missing; observation dropped"),
        }

        if !self.is_training() {
            return Ok(());
        }
        let row = &self.config.calibration[self.next_row];
        for (id, value) in ids.iter().zip(row) {
            if let Some(actuator) = actuators.iter_mut().find(|a| a.id() == *id) {
                actuator.set(*value);
            }
        }
        debug!(row = self.next_row, "calibration recipe applied");
        self.next_row += 1;
        if !self.is_training() {
            info!(
                rows = self.config.calibration.len(),
                buckets = self.samples.len(),
                "calibration sweep complete"
            );
            self.retrain(model)?;
        }
        Ok(())
    }

    /// Fold `measurements` into the bucket for `recipe`, creating it if new.
    pub fn record(&mut self, recipe: Vec<f64>, measurements: &[f64]) {
        match self.samples.iter_mut().find(|s| s.matches(&recipe)) {
            Some(sample) => sample.observe(measurements),
            None => self.samples.push(ValueSample::new(recipe, measurements)),
        }
    }

    /// Refit `B` and the intercepts from every usable bucket.
    ///
    /// Returns `Ok(false)` when there were too few usable buckets.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::ModelUpdate`] when the fit or the model update
    /// fails; the model and codec are then unchanged.
    pub fn retrain(&mut self, model: &mut dyn TrainableModel) -> Result<bool, ControlError> {
        let channels = model.output_channels();
        let inputs = model.input_ids().len();

        let mut predictors: Vec<Vec<f64>> = Vec::new();
        let mut targets: Vec<Vec<f64>> = vec![Vec::new(); channels];
        for sample in &self.samples {
            if sample.mean().len() < channels {
                continue;
            }
            let x: Vec<f64> = sample.recipe().iter().map(|v| self.codec.encode_parameter(*v)).collect();
            let y: Vec<f64> = sample.mean()[..channels].iter().map(|m| m.ln()).collect();
            if x.len() != inputs || x.iter().chain(&y).any(|v| !v.is_finite()) {
                continue;
            }
            predictors.push(x);
            for (ch, value) in y.into_iter().enumerate() {
                targets[ch].push(value);
            }
        }

        let need = inputs + 1;
        if predictors.len() < need {
            warn!(
                usable = predictors.len(),
                need,
                buckets = self.samples.len(),
                "too few usable samples; retrain skipped"
            );
            return Ok(false);
        }

        let mut b = DMatrix::zeros(channels, inputs);
        let mut intercepts = Vec::with_capacity(channels);
        for (ch, target) in targets.iter().enumerate() {
            let fit = fit_ols(&predictors, target)
                .map_err(|e| ControlError::ModelUpdate(format!("channel {ch} regression: {e}")))?;
            for (col, slope) in fit.slopes.iter().enumerate() {
                b[(ch, col)] = *slope;
            }
            intercepts.push(fit.intercept);
        }

        model.update_model(b)?;
        for (ch, intercept) in intercepts.iter().enumerate() {
            self.codec.set_intercept(ch, *intercept);
        }
        self.retrains += 1;
        metrics::record_model_update();
        info!(
            samples = predictors.len(),
            retrains = self.retrains,
            intercepts = ?intercepts,
            "model retrained"
        );
        Ok(true)
    }
}

/// First multiple of `interval` strictly after `elapsed`.
fn next_deadline(elapsed: Duration, interval: Duration) -> Duration {
    let step = interval.as_nanos().max(1);
    let nanos = (elapsed.as_nanos() / step + 1).saturating_mul(step);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{ActuatorId, IdAllocator};

    /// Records every `B` it is given; optionally rejects them.
    struct RecordingModel {
        ids: Vec<ActuatorId>,
        channels: usize,
        reject: bool,
        updates: Vec<DMatrix<f64>>,
    }

    impl RecordingModel {
        fn new(ids: Vec<ActuatorId>, channels: usize) -> Self {
            Self {
                ids,
                channels,
                reject: false,
                updates: Vec::new(),
            }
        }
    }

    impl TrainableModel for RecordingModel {
        fn input_ids(&self) -> &[ActuatorId] {
            &self.ids
        }

        fn output_channels(&self) -> usize {
            self.channels
        }

        fn update_model(&mut self, b: DMatrix<f64>) -> Result<(), ControlError> {
            if self.reject {
                return Err(ControlError::ModelUpdate("rejected".into()));
            }
            self.updates.push(b);
            Ok(())
        }
    }

    fn trainer(config: TrainerConfig, codec: Arc<ModelCodec>) -> OnlineTrainer {
        OnlineTrainer::new(config, codec).unwrap_or_else(|e| panic!("{e}"))
    }

    fn enabled(calibration: Vec<Vec<f64>>) -> TrainerConfig {
        TrainerConfig {
            enabled: true,
            collect_interval: Duration::from_secs(1),
            retrain_interval: Duration::from_secs(10),
            calibration,
        }
    }

    #[test]
    fn test_identical_recipes_share_one_bucket() {
        let mut t = trainer(TrainerConfig::default(), Arc::new(ModelCodec::default()));
        t.record(vec![1.0, 2.0], &[10.0, 40.0]);
        t.record(vec![1.0, 2.0], &[20.0, 60.0]);
        assert_eq!(t.samples().len(), 1);
        assert_eq!(t.samples()[0].count(), 2);
        assert_eq!(t.samples()[0].mean(), &[15.0, 50.0]);
    }

    #[test]
    fn test_running_mean_is_arithmetic_mean() {
        let mut s = ValueSample::new(vec![1.0], &[3.0]);
        for v in [6.0, 9.0, 2.0] {
            s.observe(&[v]);
        }
        assert!((s.mean()[0] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_distinct_recipes_get_distinct_buckets() {
        let mut t = trainer(TrainerConfig::default(), Arc::new(ModelCodec::default()));
        t.record(vec![1.0], &[1.0]);
        t.record(vec![1.0 + f64::EPSILON], &[1.0]);
        assert_eq!(t.samples().len(), 2);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = TrainerConfig {
            collect_interval: Duration::ZERO,
            ..TrainerConfig::default()
        };
        let res = OnlineTrainer::new(config, Arc::new(ModelCodec::default()));
        assert!(matches!(res, Err(ControlError::Configuration(_))));
    }

    #[test]
    fn test_validate_for_checks_row_width() {
        let t = trainer(enabled(vec![vec![1.0, 2.0], vec![3.0]]), Arc::new(ModelCodec::default()));
        assert!(t.validate_for(2, 2).is_err());
        let t = trainer(enabled(vec![vec![1.0, 2.0]]), Arc::new(ModelCodec::default()));
        assert!(t.validate_for(2, 2).is_ok());
    }

    #[test]
    fn test_validate_for_checks_codec_channels() {
        let t = trainer(enabled(vec![]), Arc::new(ModelCodec::new(&[0.0])));
        assert!(matches!(t.validate_for(1, 2), Err(ControlError::Configuration(_))));
        assert!(t.validate_for(1, 1).is_ok());

        let idle = trainer(TrainerConfig::default(), Arc::new(ModelCodec::new(&[0.0])));
        assert!(idle.validate_for(1, 2).is_ok());
    }

    #[test]
    fn test_next_deadline_skips_past_elapsed() {
        let s = Duration::from_secs;
        assert_eq!(next_deadline(s(60), s(60)), s(120));
        assert_eq!(next_deadline(s(185), s(60)), s(240));
        assert_eq!(next_deadline(Duration::ZERO, s(60)), s(60));
    }

    #[test]
    fn test_collect_fires_once_per_deadline() {
        let mut ids = IdAllocator::new();
        let mut acts = vec![Actuator::float(&mut ids, "a", 2.0)];
        let mut model = RecordingModel::new(vec![acts[0].id()], 1);
        let config = TrainerConfig {
            enabled: true,
            collect_interval: Duration::from_secs(5),
            retrain_interval: Duration::from_secs(1000),
            calibration: Vec::new(),
        };
        let mut t = trainer(config, Arc::new(ModelCodec::new(&[0.0])));
        for ms in [0u64, 4_000, 5_000, 5_500, 7_000, 12_000] {
            t.on_tick(Duration::from_millis(ms), &[1.0], &mut acts, &mut model)
                .unwrap_or_else(|e| panic!("{e}"));
        }
        // Collected at 5 s and 12 s, both under the same recipe.
        assert_eq!(t.samples().len(), 1);
        assert_eq!(t.samples()[0].count(), 2);
    }

    #[test]
    fn test_calibration_sweep_forces_recipes_then_stops() {
        let mut ids = IdAllocator::new();
        let mut acts = vec![Actuator::integer(&mut ids, "a", 1)];
        let mut model = RecordingModel::new(vec![acts[0].id()], 1);
        let mut t = trainer(enabled(vec![vec![4.0], vec![9.0]]), Arc::new(ModelCodec::new(&[0.0])));
        assert!(t.is_training());

        t.collect(&[2.0], &mut acts, &mut model).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(acts[0].value_f64(), 4.0);
        assert!(t.is_training());

        t.collect(&[8.0], &mut acts, &mut model).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(acts[0].value_f64(), 9.0);
        assert!(!t.is_training());
        // The buckets for recipes 1 and 4 were recorded before the forced sets.
        let recipes: Vec<f64> = t.samples().iter().map(|s| s.recipe()[0]).collect();
        assert_eq!(recipes, vec![1.0, 4.0]);
        // Final refit ran on sweep completion with two usable buckets.
        assert_eq!(model.updates.len(), 1);
    }

    #[test]
    fn test_retrain_recovers_power_law() {
        // measurement = e^0.5 · a^2 · b^-1  ⇒ ln m = 0.5 + 2 ln a − ln b
        let codec = Arc::new(ModelCodec::new(&[0.0]));
        let mut t = trainer(TrainerConfig::default(), Arc::clone(&codec));
        for (a, b) in [(1.0, 1.0), (2.0, 1.0), (1.0, 3.0), (4.0, 2.0), (3.0, 5.0)] {
            let m = 0.5f64.exp() * a * a / b;
            t.record(vec![a, b], &[m]);
        }
        let mut model = RecordingModel::new(vec![ActuatorId(0), ActuatorId(1)], 1);
        assert!(matches!(t.retrain(&mut model), Ok(true)));
        let b = &model.updates[0];
        assert!((b[(0, 0)] - 2.0).abs() < 1e-9);
        assert!((b[(0, 1)] + 1.0).abs() < 1e-9);
        assert!((codec.intercept(0) - 0.5).abs() < 1e-9);
        assert_eq!(t.retrain_count(), 1);
    }

    #[test]
    fn test_retrain_skips_with_too_few_samples() {
        let codec = Arc::new(ModelCodec::new(&[0.25]));
        let mut t = trainer(TrainerConfig::default(), Arc::clone(&codec));
        t.record(vec![1.0, 1.0], &[5.0]);
        t.record(vec![0.0, 1.0], &[5.0]); // ln(0) is unusable
        let mut model = RecordingModel::new(vec![ActuatorId(0), ActuatorId(1)], 1);
        assert!(matches!(t.retrain(&mut model), Ok(false)));
        assert!(model.updates.is_empty());
        assert_eq!(codec.intercept(0), 0.25);
    }

    #[test]
    fn test_rejected_update_leaves_intercepts() {
        let codec = Arc::new(ModelCodec::new(&[0.25]));
        let mut t = trainer(TrainerConfig::default(), Arc::clone(&codec));
        for a in [1.0, 2.0, 3.0] {
            t.record(vec![a], &[a * 2.0]);
        }
        let mut model = RecordingModel::new(vec![ActuatorId(0)], 1);
        model.reject = true;
        let res = t.retrain(&mut model);
        assert!(matches!(res, Err(ControlError::ModelUpdate(_))));
        assert_eq!(codec.intercept(0), 0.25);
        assert_eq!(t.retrain_count(), 0);
    }
}
