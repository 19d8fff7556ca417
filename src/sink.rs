//! # Output Sink
//!
//! ## Responsibility
//! Purely observational per-tick output. The control loop hands each sink a
//! [`TickSnapshot`] plus the actuator slice; a sink never mutates either,
//! and a failing sink is logged and otherwise ignored by the loop.
//!
//! ## CSV layout
//! ```text
//! CPU,MEMORY,<actuator names…>,set CPU,change CPU,time
//! 12.50,43.10,8,0.250000,50.00,50.00,3
//! ```
//! Measurements and setpoints print with two decimals, actuators in their
//! own format, time in whole seconds. `set` and `change` columns appear only
//! for channels that had a setpoint when the header was written; `change`
//! is the target the strategy actually steered toward (for log-domain
//! strategies, the setpoint after clamping to
//! [`MIN_SETPOINT`](crate::measure::MIN_SETPOINT)). Fields
//! containing separators or quotes are quoted by the `csv` writer.

use std::io::{self, Write};
use std::time::Duration;

use thiserror::Error;

use crate::actuator::Actuator;

/// Errors raised while emitting output.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The underlying writer failed.
    #[error("sink I/O error: {0}")]
    Io(#[from] io::Error),

    /// The CSV encoder rejected a record.
    #[error("sink CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// What the loop observed during one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSnapshot {
    /// Channel display names, parallel to `measurements`.
    pub channel_names: Vec<String>,
    /// Raw measurements for this tick.
    pub measurements: Vec<f64>,
    /// Raw (un-encoded) setpoints for this tick.
    pub setpoints: Vec<Option<f64>>,
    /// Setpoints as shaped for the controller, in measurement units.
    pub targets: Vec<Option<f64>>,
}

/// Receives one snapshot per emitted tick.
pub trait OutputSink: Send {
    /// Emit the snapshot taken `elapsed` after the loop started.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the output could not be written.
    fn emit(
        &mut self,
        elapsed: Duration,
        snapshot: &TickSnapshot,
        actuators: &[Actuator],
    ) -> Result<(), SinkError>;
}

// ─── CsvSink ─────────────────────────────────────────────────────────────────

/// Comma-separated output with a header row on first emit.
#[derive(Debug)]
pub struct CsvSink<W: Write + Send> {
    writer: csv::Writer<W>,
    /// Channels that got `set`/`change` columns in the header.
    setpoint_columns: Option<Vec<usize>>,
}

impl CsvSink<io::Stdout> {
    /// A sink writing to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> CsvSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(writer),
            setpoint_columns: None,
        }
    }

    /// Flush and recover the writer.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if buffered rows could not be flushed.
    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(io::Error::new(e.error().kind(), e.error().to_string())))
    }

    fn write_header(
        &mut self,
        snapshot: &TickSnapshot,
        actuators: &[Actuator],
    ) -> Result<Vec<usize>, SinkError> {
        let mut columns: Vec<String> = snapshot.channel_names.clone();
        columns.extend(actuators.iter().map(|a| a.name().to_string()));
        let with_setpoint: Vec<usize> = snapshot
            .setpoints
            .iter()
            .enumerate()
            .filter_map(|(i, sp)| sp.map(|_| i))
            .collect();
        for &i in &with_setpoint {
            let name = snapshot
                .channel_names
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("ch{i}"));
            columns.push(format!("set {name}"));
            columns.push(format!("change {name}"));
        }
        columns.push("time".to_string());
        self.writer.write_record(&columns)?;
        Ok(with_setpoint)
    }
}

fn two_decimals(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_default()
}

impl<W: Write + Send> OutputSink for CsvSink<W> {
    fn emit(
        &mut self,
        elapsed: Duration,
        snapshot: &TickSnapshot,
        actuators: &[Actuator],
    ) -> Result<(), SinkError> {
        let setpoint_columns = match self.setpoint_columns.take() {
            Some(cols) => cols,
            None => self.write_header(snapshot, actuators)?,
        };

        let mut fields: Vec<String> = snapshot
            .measurements
            .iter()
            .map(|m| format!("{m:.2}"))
            .collect();
        fields.extend(actuators.iter().map(|a| a.get().to_string()));
        for &i in &setpoint_columns {
            fields.push(two_decimals(snapshot.setpoints.get(i).copied().flatten()));
            fields.push(two_decimals(snapshot.targets.get(i).copied().flatten()));
        }
        fields.push(elapsed.as_secs().to_string());

        let result = self
            .writer
            .write_record(&fields)
            .map_err(SinkError::from)
            .and_then(|()| self.writer.flush().map_err(SinkError::from));
        self.setpoint_columns = Some(setpoint_columns);
        result
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
