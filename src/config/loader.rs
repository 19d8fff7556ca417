//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into a [`ControllerConfig`], and run
//! validation before returning. This is the entry point the CLI uses at
//! startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message

use std::path::Path;

use super::validation::{self, ConfigError};
use super::ControllerConfig;

/// Load a [`ControllerConfig`] from a TOML file.
///
/// # Returns
///
/// - `Ok(ControllerConfig)` if the file is readable, well-formed, and valid.
/// - `Err(ConfigError::Io)` if the file cannot be read.
/// - `Err(ConfigError::Parse)` if the TOML is malformed.
/// - `Err(ConfigError::Validation)` if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_file(path: &Path) -> Result<ControllerConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`ControllerConfig`] from a TOML string. `source_name` appears in
/// error messages.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<ControllerConfig, ConfigError> {
    let config: ControllerConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyKind;
    use std::io::Write;

    const VALID_TOML: &str = r#"
[controller]
strategy = "pid"
runtime = 30
runtime_unit = "seconds"

[measure]
source = "null"
interval = 250
interval_unit = "milliseconds"
cpu_setpoint = 40.0

[[actuators]]
name = "threads"
kind = "integer"
initial = 4
min = 1
max = 32

[pid]
kp = 0.5
ki = 0.1
kd = 0.0

[pid.scales]
threads = 0.2
"#;

    #[test]
    fn test_load_from_str_valid_toml_succeeds() {
        let config = load_from_str(VALID_TOML, "test").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(config.controller.strategy, StrategyKind::Pid);
        assert_eq!(config.actuators[0].name, "threads");
        assert_eq!(config.pid.map(|p| p.scales.get("threads").copied()), Some(Some(0.2)));
    }

    #[test]
    fn test_load_from_str_invalid_toml_returns_parse_error() {
        let result = load_from_str("not valid toml [[[", "bad.toml");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_from_str_source_name_appears_in_error() {
        let result = load_from_str("invalid [[[", "my-source.toml");
        let msg = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(msg.contains("my-source.toml"));
    }

    #[test]
    fn test_load_from_str_unknown_kind_fails_parse() {
        let toml_str = VALID_TOML.replace("kind = \"integer\"", "kind = \"complex\"");
        let result = load_from_str(&toml_str, "kind.toml");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_from_file_valid_toml_succeeds() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("controller.toml");
        let mut f = std::fs::File::create(&path).unwrap_or_else(|e| panic!("create: {e}"));
        f.write_all(VALID_TOML.as_bytes())
            .unwrap_or_else(|e| panic!("write: {e}"));
        drop(f);

        let config = load_from_file(&path).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(config.controller.runtime, Some(30));
    }

    #[test]
    fn test_load_from_file_missing_file_returns_io_error() {
        let result = load_from_file(Path::new("/nonexistent/path/controller.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_from_file_invalid_values_returns_validation_error() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("invalid.toml");
        let toml_str = VALID_TOML.replace("runtime_unit = \"seconds\"\n", "");
        std::fs::write(&path, toml_str).unwrap_or_else(|e| panic!("write: {e}"));

        let result = load_from_file(&path);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
