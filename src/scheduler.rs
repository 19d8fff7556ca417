//! # Control Loop Scheduler
//!
//! ## Responsibility
//! Own the run/stop lifecycle of the fixed-period control loop: measuring,
//! evaluating the strategy `n` times per tick, running trainer bookkeeping,
//! emitting output, pacing, and backing off the sub-step count under
//! overload.
//!
//! ## Tasks
//! - **loop task**: owns the measurement source, strategy, actuators,
//!   trainer and sink for the duration of a run and hands them back on exit
//! - **deadline task** (optional): sleeps for the configured runtime, then
//!   clears the running flag; [`ControlLoop::stop`] cancels it through a
//!   `watch` channel
//!
//! ## Guarantees
//! - The running flag is read at every tick boundary, so the loop exits
//!   within one tick period of [`ControlLoop::stop`].
//! - The pacing sleep is not cancellable; only the deadline wait is.
//! - `number_of_control_updates` only shrinks under overload and never
//!   drops below 1. External writes are rejected while running.
//! - The loop never restarts itself.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::actuator::Actuator;
use crate::measure::{clamp_setpoints, MeasurementSource};
use crate::metrics;
use crate::sink::{CsvSink, OutputSink, TickSnapshot};
use crate::strategy::ControlStrategy;
use crate::trainer::OnlineTrainer;
use crate::ControlError;

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Ticks completed.
    pub ticks: u64,
    /// Ticks that overran their period.
    pub overruns: u64,
    /// Sub-step count when the loop exited.
    pub final_control_updates: u32,
    /// Wall time from start to exit.
    pub elapsed: Duration,
}

/// Everything the loop task owns while running.
struct LoopParts {
    measure: Box<dyn MeasurementSource>,
    strategy: Box<dyn ControlStrategy>,
    actuators: Vec<Actuator>,
    trainer: Option<OnlineTrainer>,
    sink: Box<dyn OutputSink>,
}

type LoopOutcome = (LoopParts, Result<RunReport, ControlError>);

/// Shared state the loop task reads.
struct LoopContext {
    running: Arc<AtomicBool>,
    control_updates: Arc<AtomicU32>,
    print_output: bool,
    skip_print_count: u32,
}

// ─── StopHandle ──────────────────────────────────────────────────────────────

/// Cloneable handle that stops a running loop from another task.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    cancel: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Clear the running flag and cancel the deadline wait.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.cancel.send_replace(true);
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("running", &self.running.load(Ordering::Acquire))
            .finish()
    }
}

// ─── ControlLoop ─────────────────────────────────────────────────────────────

/// The fixed-period control loop.
pub struct ControlLoop {
    parts: Option<LoopParts>,
    runtime: Option<Duration>,
    running: Arc<AtomicBool>,
    control_updates: Arc<AtomicU32>,
    cancel: Arc<watch::Sender<bool>>,
    task: Option<JoinHandle<LoopOutcome>>,
    deadline: Option<JoinHandle<()>>,
}

impl ControlLoop {
    /// Assemble a loop. Output goes to stdout as CSV unless replaced with
    /// [`ControlLoop::with_sink`]; the sub-step count starts at 1.
    pub fn new(
        measure: Box<dyn MeasurementSource>,
        strategy: Box<dyn ControlStrategy>,
        actuators: Vec<Actuator>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            parts: Some(LoopParts {
                measure,
                strategy,
                actuators,
                trainer: None,
                sink: Box::new(CsvSink::stdout()),
            }),
            runtime: None,
            running: Arc::new(AtomicBool::new(false)),
            control_updates: Arc::new(AtomicU32::new(1)),
            cancel: Arc::new(cancel),
            task: None,
            deadline: None,
        }
    }

    /// Attach an online trainer.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Configuration`] if the calibration table does
    /// not fit the strategy's controlled actuators, or if the trainer is
    /// enabled for a strategy that cannot be trained.
    pub fn with_trainer(mut self, trainer: OnlineTrainer) -> Result<Self, ControlError> {
        if let Some(parts) = self.parts.as_mut() {
            match parts.strategy.as_trainable() {
                Some(model) => {
                    trainer.validate_for(model.input_ids().len(), model.output_channels())?;
                }
                None if trainer.is_enabled() => {
                    return Err(ControlError::Configuration(format!(
                        "strategy '{}' does not support online training",
                        parts.strategy.name()
                    )));
                }
                None => {}
            }
            parts.trainer = Some(trainer);
        }
        Ok(self)
    }

    /// Replace the output sink.
    pub fn with_sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        if let Some(parts) = self.parts.as_mut() {
            parts.sink = sink;
        }
        self
    }

    /// Stop automatically after `limit` of wall time.
    pub fn with_runtime(mut self, limit: Duration) -> Self {
        self.runtime = Some(limit);
        self
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current sub-step count.
    pub fn number_of_control_updates(&self) -> u32 {
        self.control_updates.load(Ordering::Acquire)
    }

    /// Set the sub-step count for the next run.
    ///
    /// # Errors
    ///
    /// [`ControlError::AlreadyRunning`] while a run is active,
    /// [`ControlError::Configuration`] for `0`.
    pub fn set_number_of_control_updates(&self, n: u32) -> Result<(), ControlError> {
        if self.is_running() {
            return Err(ControlError::AlreadyRunning);
        }
        if n == 0 {
            return Err(ControlError::Configuration(
                "number of control updates must be >= 1".into(),
            ));
        }
        self.control_updates.store(n, Ordering::Release);
        Ok(())
    }

    /// A handle that can stop this loop from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
            cancel: Arc::clone(&self.cancel),
        }
    }

    /// Actuators, when no run holds them.
    pub fn actuators(&self) -> Option<&[Actuator]> {
        self.parts.as_ref().map(|p| p.actuators.as_slice())
    }

    /// The strategy, when no run holds it.
    pub fn strategy(&self) -> Option<&dyn ControlStrategy> {
        self.parts.as_ref().map(|p| p.strategy.as_ref())
    }

    /// The trainer, when attached and no run holds it.
    pub fn trainer(&self) -> Option<&OnlineTrainer> {
        self.parts.as_ref().and_then(|p| p.trainer.as_ref())
    }

    /// Spawn the loop (and the deadline task, if a runtime is set) on the
    /// current tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`ControlError::AlreadyRunning`] if a run is active
    /// - [`ControlError::StartFailure`] if there is no tokio runtime or the
    ///   loop state was lost by an earlier run
    pub async fn start(
        &mut self,
        print_output: bool,
        skip_print_count: u32,
    ) -> Result<(), ControlError> {
        if self.is_running() {
            return Err(ControlError::AlreadyRunning);
        }
        let handle = Handle::try_current()
            .map_err(|e| ControlError::StartFailure(format!("no tokio runtime: {e}")))?;

        if self.task.is_some() {
            match self.join().await {
                Ok(report) => debug!(ticks = report.ticks, "previous run reclaimed"),
                Err(e) => warn!(error = %e, "previous run ended with an error"),
            }
        }
        let parts = self
            .parts
            .take()
            .ok_or_else(|| ControlError::StartFailure("loop state is missing".into()))?;

        self.cancel.send_replace(false);
        self.running.store(true, Ordering::Release);
        metrics::set_control_updates(self.number_of_control_updates());
        info!(
            strategy = parts.strategy.name(),
            actuators = parts.actuators.len(),
            tick_ms = parts.measure.tick_interval().as_millis() as u64,
            control_updates = self.number_of_control_updates(),
            runtime_ms = self.runtime.map(|d| d.as_millis() as u64),
            "control loop starting"
        );

        let ctx = LoopContext {
            running: Arc::clone(&self.running),
            control_updates: Arc::clone(&self.control_updates),
            print_output,
            skip_print_count,
        };
        self.task = Some(handle.spawn(run_loop(parts, ctx)));
        if let Some(limit) = self.runtime {
            self.deadline = Some(handle.spawn(deadline(
                limit,
                Arc::clone(&self.running),
                self.cancel.subscribe(),
            )));
        }
        Ok(())
    }

    /// Ask the loop to exit at its next tick boundary and cancel the
    /// deadline wait.
    pub fn stop(&self) {
        info!("control loop stop requested");
        self.stop_handle().stop();
    }

    /// Wait for the loop to exit and take back its state.
    ///
    /// # Errors
    ///
    /// - [`ControlError::ModelUpdate`] if a refit failed and halted the run
    /// - [`ControlError::Other`] if nothing was started or the task failed
    pub async fn join(&mut self) -> Result<RunReport, ControlError> {
        let task = self
            .task
            .take()
            .ok_or_else(|| ControlError::Other("control loop was not started".into()))?;
        let outcome = task.await;

        self.cancel.send_replace(true);
        if let Some(deadline) = self.deadline.take() {
            let _ = deadline.await;
        }

        let (parts, result) =
            outcome.map_err(|e| ControlError::Other(format!("control loop task failed: {e}")))?;
        self.parts = Some(parts);
        result
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop_handle().stop();
        }
    }
}

// ─── Tasks ───────────────────────────────────────────────────────────────────

async fn deadline(limit: Duration, running: Arc<AtomicBool>, mut cancel: watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(limit) => {
            info!(runtime_ms = limit.as_millis() as u64, "runtime limit reached");
            running.store(false, Ordering::Release);
        }
        _ = cancel.changed() => {
            debug!("deadline cancelled");
        }
    }
}

async fn run_loop(mut parts: LoopParts, ctx: LoopContext) -> LoopOutcome {
    let started = Instant::now();
    let tick = parts.measure.tick_interval();
    let mut report = RunReport::default();
    let mut skip = ctx.skip_print_count;

    let result = loop {
        if !ctx.running.load(Ordering::Acquire) {
            break Ok(());
        }
        let tick_start = Instant::now();
        let elapsed = tick_start.duration_since(started);
        let n = ctx.control_updates.load(Ordering::Acquire).max(1);

        parts.measure.measure();
        let measurements = parts.measure.measurements();
        let setpoints = if parts.strategy.uses_encoded_setpoints() {
            parts.measure.setpoints(n, elapsed.as_secs())
        } else {
            parts.measure.raw_setpoints()
        };

        let training = parts.strategy.supports_online_training()
            && parts.trainer.as_ref().is_some_and(OnlineTrainer::is_training);
        if !training {
            let dt = tick / n;
            for _ in 0..n {
                parts
                    .strategy
                    .evaluate(&mut parts.actuators, &measurements, &setpoints, dt);
            }
        }

        if parts.strategy.supports_online_training() {
            if let (Some(trainer), Some(model)) = (
                parts.trainer.as_mut().filter(|t| t.is_enabled()),
                parts.strategy.as_trainable(),
            ) {
                if let Err(e) = trainer.on_tick(elapsed, &measurements, &mut parts.actuators, model)
                {
                    error!(error = %e, "model update failed; halting control loop");
                    break Err(e);
                }
            }
        }

        if ctx.print_output {
            if skip > 0 {
                skip -= 1;
            } else {
                let raw = parts.measure.raw_setpoints();
                let snapshot = TickSnapshot {
                    channel_names: parts.measure.channel_names(),
                    measurements,
                    targets: if parts.strategy.uses_encoded_setpoints() {
                        clamp_setpoints(&raw)
                    } else {
                        raw.clone()
                    },
                    setpoints: raw,
                };
                if let Err(e) = parts.sink.emit(elapsed, &snapshot, &parts.actuators) {
                    warn!(error = %e, "output sink failed");
                }
            }
        }

        let spent = tick_start.elapsed();
        report.ticks += 1;
        metrics::record_tick(spent);
        if spent < tick {
            tokio::time::sleep(tick - spent).await;
        } else {
            if spent > tick {
                let reduced = n.saturating_sub(1).max(1);
                ctx.control_updates.store(reduced, Ordering::Release);
                report.overruns += 1;
                metrics::inc_overrun();
                metrics::set_control_updates(reduced);
                warn!(
                    spent_ms = spent.as_millis() as u64,
                    tick_ms = tick.as_millis() as u64,
                    control_updates = reduced,
                    "tick overran its period"
                );
            }
            // No pacing sleep this tick; give other tasks a turn.
            tokio::task::yield_now().await;
        }
        debug!(tick = report.ticks, elapsed_ms = elapsed.as_millis() as u64, "tick complete");
    };

    ctx.running.store(false, Ordering::Release);
    report.final_control_updates = ctx.control_updates.load(Ordering::Acquire);
    report.elapsed = started.elapsed();
    info!(
        ticks = report.ticks,
        overruns = report.overruns,
        control_updates = report.final_control_updates,
        "control loop exited"
    );
    (parts, result.map(|()| report))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
