//! End-to-end runs of the control loop with deterministic sources.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_resource_controller::config::{loader, ControllerBuilder};
use tokio_resource_controller::measure::{NullMeasure, ScriptedMeasure};
use tokio_resource_controller::sink::CsvSink;
use tokio_resource_controller::strategy::{NullStrategy, PidGains, PidStrategy};
use tokio_resource_controller::{Actuator, ControlLoop, IdAllocator, ModelCodec};

/// Cloneable writer so a test can read what a boxed sink wrote.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut inner) = self.0.lock() {
            inner.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_null_loop_stops_within_one_tick_and_leaves_actuators_alone() {
    let tick = Duration::from_millis(100);
    let mut ids = IdAllocator::new();
    let actuator = Actuator::integer(&mut ids, "workers", 7)
        .with_bounds(1.0, 16.0)
        .unwrap_or_else(|e| panic!("{e}"));
    let buf = SharedBuf::default();
    let mut cl = ControlLoop::new(
        Box::new(NullMeasure::new(tick)),
        Box::new(NullStrategy),
        vec![actuator],
    )
    .with_sink(Box::new(CsvSink::new(buf.clone())));

    cl.start(true, 0).await.unwrap_or_else(|e| panic!("{e}"));
    tokio::time::sleep(Duration::from_millis(350)).await;
    cl.stop();

    let report = tokio::time::timeout(Duration::from_millis(200), cl.join())
        .await
        .unwrap_or_else(|_| panic!("loop did not exit within a tick"))
        .unwrap_or_else(|e| panic!("{e}"));

    assert!((3..=5).contains(&report.ticks), "ticks = {}", report.ticks);
    assert!(!cl.is_running());
    let value = cl.actuators().map(|a| a[0].value_f64());
    assert_eq!(value, Some(7.0));

    let out = buf.text();
    let mut lines = out.lines();
    assert_eq!(lines.next(), Some("workers,time"));
    assert_eq!(lines.count() as u64, report.ticks);
}

#[tokio::test(start_paused = true)]
async fn test_pid_loop_moves_actuators_by_weight() {
    let tick = Duration::from_secs(1);
    let mut ids = IdAllocator::new();
    let threads = Actuator::float(&mut ids, "threads", 10.0)
        .with_bounds(0.0, 100.0)
        .unwrap_or_else(|e| panic!("{e}"));
    let cache = Actuator::float(&mut ids, "cache", 10.0)
        .with_bounds(0.0, 100.0)
        .unwrap_or_else(|e| panic!("{e}"))
        .with_weight(tokio_resource_controller::Weight::Negative);
    let source = ScriptedMeasure::new(
        tick,
        vec![vec![80.0]],
        vec![Some(40.0)],
        Arc::new(ModelCodec::default()),
    );
    let strategy = PidStrategy::new(PidGains::new(0.01, 0.0, 0.0));
    let mut cl = ControlLoop::new(Box::new(source), Box::new(strategy), vec![threads, cache])
        .with_runtime(Duration::from_secs(5));

    cl.start(false, 0).await.unwrap_or_else(|e| panic!("{e}"));
    let report = cl.join().await.unwrap_or_else(|e| panic!("{e}"));

    assert!(report.ticks >= 4);
    let values: Vec<f64> = cl
        .actuators()
        .map(|a| a.iter().map(Actuator::value_f64).collect())
        .unwrap_or_default();
    assert!(values[0] < 10.0, "threads = {}", values[0]);
    assert!(values[1] > 10.0, "cache = {}", values[1]);
}

const LQR_TRAINING: &str = r#"
[controller]
strategy = "lqr"
runtime = 9
runtime_unit = "seconds"

[measure]
source = "null"
interval = 1
interval_unit = "seconds"

[[actuators]]
name = "sleep"
kind = "float"
initial = 1.0
min = 0.5
max = 20.0

[[actuators]]
name = "depth"
kind = "integer"
initial = 1
min = 1
max = 10

[lqr]
a = [[1.0]]
b = [[1.0, 1.0]]
c = [[1.0]]
d = [[0.0, 0.0]]
q = [[1.0]]
r = [[1.0, 0.0], [0.0, 1.0]]
intercepts = [0.0]

[training]
enabled = true
collect_interval_secs = 1
retrain_interval_secs = 600
calibration = [[2.0, 1.0], [1.0, 2.0], [4.0, 3.0], [3.0, 5.0]]
"#;

/// Steady-state response of the simulated plant: `50 · sleep^0.5 · depth^0.25`.
fn plant(sleep: f64, depth: f64) -> f64 {
    50.0 * sleep.powf(0.5) * depth.powf(0.25)
}

#[tokio::test(start_paused = true)]
async fn test_lqr_calibration_sweep_fits_the_plant() {
    let config = loader::load_from_str(LQR_TRAINING, "lqr-training").unwrap_or_else(|e| panic!("{e}"));
    let builder = ControllerBuilder::new(config);
    let codec = builder.codec();

    // Tick k measures the recipe applied at the collect of tick k-1:
    // tick 1 sees the initial values, tick 2 sees row 0, and so on.
    let recipes = [(1.0, 1.0), (1.0, 1.0), (2.0, 1.0), (1.0, 2.0), (4.0, 3.0), (3.0, 5.0)];
    let frames: Vec<Vec<f64>> = recipes.iter().map(|&(s, d)| vec![plant(s, d)]).collect();
    let source = ScriptedMeasure::new(Duration::from_secs(1), frames, vec![Some(60.0)], Arc::clone(&codec))
        .with_names(vec!["CPU".into()]);
    let buf = SharedBuf::default();

    let mut ids = IdAllocator::new();
    let mut cl = builder
        .with_measure(Box::new(source))
        .with_sink(Box::new(CsvSink::new(buf.clone())))
        .build(&mut ids)
        .unwrap_or_else(|e| panic!("{e}"));

    cl.start(true, 0).await.unwrap_or_else(|e| panic!("{e}"));
    let report = cl.join().await.unwrap_or_else(|e| panic!("{e}"));
    assert!(report.ticks >= 6, "ticks = {}", report.ticks);

    let trainer = cl.trainer().unwrap_or_else(|| panic!("trainer attached"));
    assert!(!trainer.is_training());
    assert_eq!(trainer.retrain_count(), 1);
    assert!(trainer.samples().len() >= 4);
    assert!((codec.intercept(0) - 50f64.ln()).abs() < 1e-6, "intercept = {}", codec.intercept(0));

    // Once the sweep ends the strategy drives the actuators inside bounds.
    let values: Vec<f64> = cl
        .actuators()
        .map(|a| a.iter().map(Actuator::value_f64).collect())
        .unwrap_or_default();
    assert!((0.5..=20.0).contains(&values[0]));
    assert!((1.0..=10.0).contains(&values[1]));

    let out = buf.text();
    assert_eq!(out.lines().next(), Some("CPU,sleep,depth,set CPU,change CPU,time"));
}
