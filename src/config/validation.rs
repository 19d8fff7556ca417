//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`ControllerConfig`] that cannot
//! be expressed through the type system alone: runtime units, actuator
//! bounds and weights, matrix shapes, controlled-actuator references and
//! calibration rows.
//!
//! ## Guarantees
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value

use std::collections::HashSet;

use super::{ActuatorConfig, ControllerConfig, LqrConfig, StrategyKind};

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "lqr.b").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: impl Into<String>, value: impl ToString, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Validate all semantic constraints on a [`ControllerConfig`].
///
/// # Errors
///
/// Returns every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &ControllerConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Controller ───────────────────────────────────────────────────
    let controller = &config.controller;
    if controller.control_updates == 0 {
        errors.push(invalid("controller.control_updates", 0, "must be at least 1"));
    }
    if let Some(runtime) = controller.runtime {
        if controller.runtime_unit.is_none() {
            errors.push(invalid(
                "controller.runtime_unit",
                "<missing>",
                "required when controller.runtime is set",
            ));
        }
        if runtime == 0 {
            errors.push(invalid("controller.runtime", 0, "must be at least 1"));
        }
    }

    // ── Measurement ──────────────────────────────────────────────────
    if config.measure.interval == 0 {
        errors.push(invalid("measure.interval", 0, "must be at least 1"));
    }
    for (field, value) in [
        ("measure.cpu_setpoint", config.measure.cpu_setpoint),
        ("measure.memory_setpoint", config.measure.memory_setpoint),
    ] {
        if let Some(v) = value.filter(|v| !v.is_finite()) {
            errors.push(invalid(field, v, "must be finite"));
        }
    }

    // ── Actuators ────────────────────────────────────────────────────
    let mut names = HashSet::new();
    for (i, actuator) in config.actuators.iter().enumerate() {
        validate_actuator(i, actuator, &mut names, &mut errors);
    }

    // ── Strategy sections ────────────────────────────────────────────
    match controller.strategy {
        StrategyKind::Null => {}
        StrategyKind::Pid => match &config.pid {
            None => errors.push(ConfigError::Validation(
                "strategy \"pid\" requires a [pid] section".into(),
            )),
            Some(pid) => {
                if pid.integral_window == 0 {
                    errors.push(invalid("pid.integral_window", 0, "must be at least 1"));
                }
                if pid.smoothing_window == 0 {
                    errors.push(invalid("pid.smoothing_window", 0, "must be at least 1"));
                }
                for (name, scale) in &pid.scales {
                    if !scale.is_finite() {
                        errors.push(invalid(format!("pid.scales.{name}"), scale, "must be finite"));
                    }
                }
            }
        },
        StrategyKind::Lqr => match &config.lqr {
            None => errors.push(ConfigError::Validation(
                "strategy \"lqr\" requires an [lqr] section".into(),
            )),
            Some(lqr) => validate_lqr(lqr, &config.actuators, config.training.enabled, &mut errors),
        },
    }

    // ── Training ─────────────────────────────────────────────────────
    let training = &config.training;
    if training.collect_interval_secs == 0 {
        errors.push(invalid("training.collect_interval_secs", 0, "must be at least 1"));
    }
    if training.retrain_interval_secs == 0 {
        errors.push(invalid("training.retrain_interval_secs", 0, "must be at least 1"));
    }
    let width = config
        .lqr
        .as_ref()
        .map(|lqr| lqr.controlled_names(&config.actuators).len());
    for (i, row) in training.calibration.iter().enumerate() {
        if row.is_empty() {
            errors.push(invalid(format!("training.calibration[{i}]"), "[]", "must not be empty"));
        } else if let Some(width) = width.filter(|w| *w != row.len()) {
            errors.push(invalid(
                format!("training.calibration[{i}]"),
                row.len(),
                format!("expected {width} values, one per controlled actuator"),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_actuator(
    i: usize,
    actuator: &ActuatorConfig,
    names: &mut HashSet<String>,
    errors: &mut Vec<ConfigError>,
) {
    let field = |f: &str| format!("actuators[{i}].{f}");
    if actuator.name.trim().is_empty() {
        errors.push(invalid(field("name"), "\"\"", "must not be empty"));
    } else if !names.insert(actuator.name.clone()) {
        errors.push(invalid(field("name"), &actuator.name, "duplicate actuator name"));
    }
    if !(-1..=1).contains(&actuator.weight) {
        errors.push(invalid(field("weight"), actuator.weight, "must be -1, 0 or 1"));
    }
    if let (Some(min), Some(max)) = (actuator.min, actuator.max) {
        if min > max {
            errors.push(invalid(field("min"), min, format!("must be <= max ({max})")));
        }
    }
    if !actuator.initial.is_finite() {
        errors.push(invalid(field("initial"), actuator.initial, "must be finite"));
    }
}

/// Shape of a row-major matrix, or `None` if it is empty or ragged.
fn shape(rows: &[Vec<f64>]) -> Option<(usize, usize)> {
    let cols = rows.first()?.len();
    if cols == 0 || rows.iter().any(|r| r.len() != cols) {
        return None;
    }
    Some((rows.len(), cols))
}

fn validate_lqr(
    lqr: &LqrConfig,
    actuators: &[ActuatorConfig],
    training: bool,
    errors: &mut Vec<ConfigError>,
) {
    let mut shapes = Vec::new();
    for (name, rows) in [
        ("a", &lqr.a),
        ("b", &lqr.b),
        ("c", &lqr.c),
        ("d", &lqr.d),
        ("q", &lqr.q),
        ("r", &lqr.r),
    ] {
        match shape(rows) {
            Some(s) => shapes.push(s),
            None => errors.push(invalid(
                format!("lqr.{name}"),
                format!("{} rows", rows.len()),
                "must be a non-empty rectangular matrix",
            )),
        }
    }
    if let [a, b, c, d, q, r] = shapes[..] {
        let n = a.0;
        let m = b.1;
        let p = c.0;
        let expect = [
            ("a", a, (n, n)),
            ("b", b, (n, m)),
            ("c", c, (p, n)),
            ("d", d, (p, m)),
            ("q", q, (n, n)),
            ("r", r, (m, m)),
        ];
        for (name, got, want) in expect {
            if got != want {
                errors.push(invalid(
                    format!("lqr.{name}"),
                    format!("{}x{}", got.0, got.1),
                    format!("expected {}x{}", want.0, want.1),
                ));
            }
        }
        // The refit regresses each measured output onto the inputs and
        // writes the result as rows of B, so one state per output.
        if training && n != p {
            errors.push(invalid(
                "lqr.c",
                format!("{p} outputs"),
                format!("online training needs one output per state ({n})"),
            ));
        }
        if let Some(x0) = lqr.x0.as_ref().filter(|x0| x0.len() != n) {
            errors.push(invalid("lqr.x0", x0.len(), format!("expected {n} entries")));
        }
        if lqr.intercepts.len() != p {
            errors.push(invalid(
                "lqr.intercepts",
                lqr.intercepts.len(),
                format!("expected {p} entries, one per output"),
            ));
        }
        let controlled = lqr.controlled_names(actuators);
        if controlled.len() != m {
            errors.push(invalid(
                "lqr.controlled",
                controlled.len(),
                format!("expected {m} actuators, one per column of B"),
            ));
        }
    }

    for name in lqr.controlled_names(actuators) {
        match actuators.iter().find(|a| a.name == name) {
            None => errors.push(invalid("lqr.controlled", &name, "no actuator with this name")),
            Some(a) => {
                if a.max.is_some_and(|max| max <= 0.0) || a.initial <= 0.0 {
                    errors.push(invalid(
                        format!("actuators.{name}"),
                        a.initial,
                        "LQR-controlled actuators need a positive initial value and max",
                    ));
                }
            }
        }
    }
}
