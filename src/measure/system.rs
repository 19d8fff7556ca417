//! OS-backed measurement of this process's CPU usage and system memory
//! utilisation through `sysinfo`.
//!
//! - channel 0 (`CPU`): process CPU in percent; 100 per fully used core
//! - channel 1 (`MEMORY`): `(used RAM + used swap) / (total RAM + total swap)`
//!   in percent

use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use super::{shape_setpoints, MeasurementSource};
use crate::codec::ModelCodec;

/// CPU channel index.
pub const CPU: usize = 0;
/// Memory channel index.
pub const MEMORY: usize = 1;

/// Measures the current process and host through `sysinfo`.
pub struct SystemMeasure {
    system: System,
    pid: Option<Pid>,
    tick: Duration,
    setpoints: [Option<f64>; 2],
    current: [f64; 2],
    codec: Arc<ModelCodec>,
}

impl std::fmt::Debug for SystemMeasure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMeasure")
            .field("pid", &self.pid)
            .field("tick", &self.tick)
            .field("setpoints", &self.setpoints)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl SystemMeasure {
    /// Create a sampler and take the priming CPU reading.
    pub fn new(
        tick: Duration,
        cpu_setpoint: Option<f64>,
        memory_setpoint: Option<f64>,
        codec: Arc<ModelCodec>,
    ) -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = e, "current pid unavailable; process cpu will read 0");
                None
            }
        };
        Self {
            system,
            pid,
            tick,
            setpoints: [cpu_setpoint, memory_setpoint],
            current: [0.0; 2],
            codec,
        }
    }

    fn process_cpu(&mut self) -> f64 {
        let Some(pid) = self.pid else {
            return 0.0;
        };
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system
            .process(pid)
            .map(|p| f64::from(p.cpu_usage()))
            .unwrap_or(0.0)
    }

    fn memory_percent(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory() + self.system.total_swap();
        let used = self.system.used_memory() + self.system.used_swap();
        if total == 0 {
            return 0.0;
        }
        100.0 * used as f64 / total as f64
    }
}

impl MeasurementSource for SystemMeasure {
    fn measure(&mut self) {
        self.system.refresh_cpu_all();
        self.current[CPU] = self.process_cpu();
        self.current[MEMORY] = self.memory_percent();
        debug!(cpu = self.current[CPU], memory = self.current[MEMORY], "system measured");
    }

    fn measurements(&self) -> Vec<f64> {
        self.current.to_vec()
    }

    fn setpoints(&self, _n_updates: u32, _elapsed_sec: u64) -> Vec<Option<f64>> {
        // An unconfigured channel stays `None`. With neither setpoint set the
        // LQR strategy skips every evaluation and the run only observes.
        shape_setpoints(&self.codec, &self.setpoints)
    }

    fn raw_setpoints(&self) -> Vec<Option<f64>> {
        self.setpoints.to_vec()
    }

    fn tick_interval(&self) -> Duration {
        self.tick
    }

    fn channel_names(&self) -> Vec<String> {
        vec!["CPU".to_string(), "MEMORY".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_reading_is_a_percentage() {
        let mut m = SystemMeasure::new(
            Duration::from_secs(1),
            Some(50.0),
            None,
            Arc::new(ModelCodec::default()),
        );
        m.measure();
        let values = m.measurements();
        assert_eq!(values.len(), 2);
        assert!((0.0..=100.0).contains(&values[MEMORY]), "memory={}", values[MEMORY]);
        assert!(values[CPU] >= 0.0);
    }

    #[test]
    fn test_setpoints_are_encoded_and_none_preserved() {
        let codec = Arc::new(ModelCodec::default());
        let m = SystemMeasure::new(Duration::from_secs(1), Some(0.5), None, Arc::clone(&codec));
        let sp = m.setpoints(1, 0);
        assert_eq!(sp[CPU], Some(codec.encode_measurement(1.0, CPU)));
        assert!(sp[MEMORY].is_none());
        assert_eq!(m.raw_setpoints(), vec![Some(0.5), None]);
    }
}
