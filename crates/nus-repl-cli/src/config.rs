//! Layered configuration.
//!
//! # Load Order
//!
//! 1. Default values
//! 2. Config file (`--config`, or `~/.config/nus-repl/config.toml`)
//! 3. Environment variables (`NUS_REPL_*`)
//! 4. CLI arguments, applied by the caller
//!
//! A later layer wins over an earlier one, field by field.

use std::path::{Path, PathBuf};

use nus_repl_ble::{ScanConfig, WriteMode};
use nus_repl_core::BridgeConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::exit_key::parse_exit_key;

/// Why the settings could not be assembled.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("cannot read {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid nus-repl TOML.
    #[error("{} is not a valid config: {source}", .path.display())]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A `NUS_REPL_*` variable holds an unusable value.
    #[error("${name}: {message}")]
    InvalidEnvVar { name: String, message: String },

    /// Failed to open the log file.
    #[error("cannot open log file {}: {source}", .path.display())]
    OpenLogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid command-line value.
    #[error("invalid value for '--{flag}': {message}")]
    InvalidArg { flag: &'static str, message: String },

    /// The merged settings are inconsistent.
    #[error(transparent)]
    Invalid(#[from] nus_repl_core::ConfigError),
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn parse_toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ParseToml {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// File to append logs to. Logs go to stderr when unset.
    pub file: Option<PathBuf>,
    /// `EnvFilter` directive, e.g. `debug` or `nus_repl_ble=trace`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: "warn".into(),
        }
    }
}

/// Everything the binary needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub bridge: BridgeConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Parse from TOML.
    ///
    /// # Errors
    /// Returns the TOML error if the text is not a valid config.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Check the merged settings.
    ///
    /// # Errors
    /// Returns the first inconsistent setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bridge.validate()?;
        if self.scan.scan_timeout_ms == 0 {
            return Err(nus_repl_core::ConfigError::invalid(
                "scan_timeout_ms",
                "must be greater than zero",
            )
            .into());
        }
        Ok(())
    }
}

/// Default config file location.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("nus-repl").join("config.toml"))
}

/// Overwrite `$field` with `$var` when set, via `FromStr`.
macro_rules! parse_env {
    ($lookup:expr, $field:expr, $var:literal, $what:literal) => {
        if let Some(val) = $lookup($var) {
            $field = val
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_env_var($var, concat!("expected ", $what)))?;
        }
    };
}

/// Assembles [`AppConfig`] from the file and environment layers.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Explicit config file; [`default_config_path`] otherwise.
    config_path: Option<PathBuf>,

    /// Ignore [`default_config_path`].
    skip_default_file: bool,
}

impl ConfigLoader {
    /// Default file plus environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load this file instead of the default one. It must exist.
    #[must_use]
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Start from built-in defaults instead of the default file.
    #[must_use]
    pub const fn skip_default_file(mut self) -> Self {
        self.skip_default_file = true;
        self
    }

    /// Resolve the file layer, then apply the environment over it.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a file cannot be read or parsed, or an
    /// environment variable is malformed.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with_env(|name| std::env::var(name).ok())
    }

    /// Like [`load`](Self::load), reading variables through `lookup`.
    fn load_with_env(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<AppConfig, ConfigError> {
        let mut config = match &self.config_path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
                debug!(path = %path.display(), "Loaded config file");
                AppConfig::from_toml(&content).map_err(|e| ConfigError::parse_toml(path, e))?
            }
            None if self.skip_default_file => AppConfig::default(),
            None => match default_config_path() {
                Some(path) => load_optional(&path)?.unwrap_or_default(),
                None => AppConfig::default(),
            },
        };

        apply_env_vars(&mut config, lookup)?;
        Ok(config)
    }
}

/// Read the default file if it is there. Absence is not an error.
fn load_optional(path: &Path) -> Result<Option<AppConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    let config = AppConfig::from_toml(&content).map_err(|e| ConfigError::parse_toml(path, e))?;
    debug!(path = %path.display(), "Loaded config file");
    Ok(Some(config))
}

/// Overlay the `NUS_REPL_*` variables that `lookup` finds.
fn apply_env_vars(
    config: &mut AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(val) = lookup("NUS_REPL_NAME") {
        config.scan.name = Some(val);
    }
    if let Some(val) = lookup("NUS_REPL_SERVICE") {
        let uuid = Uuid::parse_str(val.trim())
            .map_err(|e| ConfigError::invalid_env_var("NUS_REPL_SERVICE", e.to_string()))?;
        config.scan.service = Some(uuid);
    }
    parse_env!(lookup, config.scan.scan_timeout_ms, "NUS_REPL_SCAN_TIMEOUT_MS", "milliseconds");
    if let Some(val) = lookup("NUS_REPL_PYBRICKS") {
        config.scan.pybricks = parse_bool(&val)
            .ok_or_else(|| ConfigError::invalid_env_var("NUS_REPL_PYBRICKS", "expected bool"))?;
    }
    if let Some(val) = lookup("NUS_REPL_WRITE_MODE") {
        config.scan.write_mode = parse_write_mode(&val)
            .ok_or_else(|| ConfigError::invalid_env_var("NUS_REPL_WRITE_MODE", WRITE_MODES))?;
    }
    if let Some(val) = lookup("NUS_REPL_PAYLOAD_SIZE") {
        let size = val.trim().parse().map_err(|_| {
            ConfigError::invalid_env_var("NUS_REPL_PAYLOAD_SIZE", "expected byte count")
        })?;
        config.bridge.payload_size = Some(size);
    }
    if let Some(val) = lookup("NUS_REPL_EXIT_KEY") {
        config.bridge.exit_sequence = parse_exit_key(&val)
            .map_err(|e| ConfigError::invalid_env_var("NUS_REPL_EXIT_KEY", e.to_string()))?;
    }
    if let Some(val) = lookup("NUS_REPL_LOG_FILE") {
        config.logging.file = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("NUS_REPL_LOG_LEVEL") {
        config.logging.level = val;
    }
    Ok(())
}

const WRITE_MODES: &str = "expected auto, with-response or without-response";

/// Write mode by name, short aliases included.
pub fn parse_write_mode(s: &str) -> Option<WriteMode> {
    match s.trim().to_lowercase().as_str() {
        "auto" => Some(WriteMode::Auto),
        "with-response" | "response" => Some(WriteMode::WithResponse),
        "without-response" | "no-response" => Some(WriteMode::WithoutResponse),
        _ => None,
    }
}

/// Truthy and falsy spellings: true/false, 1/0, yes/no, on/off, any case.
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn load_defaults_only() {
        let config = ConfigLoader::new()
            .skip_default_file()
            .load_with_env(|_| None)
            .unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.bridge.exit_sequence, vec![0x1d]);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn parse_sections() {
        let config = AppConfig::from_toml(
            r#"
[scan]
name = "Pybricks Hub"
pybricks = true

[bridge]
payload_size = 100
exit_sequence = [4]

[logging]
file = "/tmp/nus-repl.log"
level = "debug"
"#,
        )
        .unwrap();

        assert_eq!(config.scan.name.as_deref(), Some("Pybricks Hub"));
        assert!(config.scan.pybricks);
        assert_eq!(config.bridge.payload_size, Some(100));
        assert_eq!(config.bridge.exit_sequence, vec![4]);
        assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/nus-repl.log")));
        config.validate().unwrap();
    }

    #[test]
    fn missing_explicit_file_is_error() {
        let result = ConfigLoader::new()
            .with_config_file("/nonexistent/nus-repl.toml")
            .load_with_env(|_| None);
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let path = std::env::temp_dir().join(format!("nus-repl-test-{}.toml", std::process::id()));
        std::fs::write(&path, "[scan]\nscan_timeout_ms = 2500\n").unwrap();

        let config = ConfigLoader::new()
            .with_config_file(&path)
            .load_with_env(env(&[("NUS_REPL_NAME", "from-env")]));
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.scan.scan_timeout_ms, 2500);
        assert_eq!(config.scan.name.as_deref(), Some("from-env"));
    }

    #[test]
    fn env_var_override() {
        let mut config = AppConfig::default();
        apply_env_vars(
            &mut config,
            env(&[
                ("NUS_REPL_NAME", "esp32"),
                ("NUS_REPL_PYBRICKS", "yes"),
                ("NUS_REPL_SCAN_TIMEOUT_MS", "3000"),
                ("NUS_REPL_WRITE_MODE", "without-response"),
                ("NUS_REPL_EXIT_KEY", "^D"),
                ("NUS_REPL_LOG_LEVEL", "debug"),
            ]),
        )
        .unwrap();

        assert_eq!(config.scan.name.as_deref(), Some("esp32"));
        assert!(config.scan.pybricks);
        assert_eq!(config.scan.scan_timeout_ms, 3000);
        assert_eq!(config.scan.write_mode, WriteMode::WithoutResponse);
        assert_eq!(config.bridge.exit_sequence, vec![0x04]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn invalid_env_var_is_error() {
        let mut config = AppConfig::default();
        let err = apply_env_vars(&mut config, env(&[("NUS_REPL_PYBRICKS", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { ref name, .. } if name == "NUS_REPL_PYBRICKS"));

        let err =
            apply_env_vars(&mut config, env(&[("NUS_REPL_SERVICE", "not-a-uuid")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { .. }));
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = AppConfig::default();
        config.scan.scan_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn parse_write_mode_values() {
        assert_eq!(parse_write_mode("Auto"), Some(WriteMode::Auto));
        assert_eq!(parse_write_mode("with-response"), Some(WriteMode::WithResponse));
        assert_eq!(parse_write_mode("sometimes"), None);
    }

    #[test]
    fn error_messages_name_the_source() {
        let err = ConfigError::invalid_env_var("NUS_REPL_PYBRICKS", "expected bool");
        assert_eq!(err.to_string(), "$NUS_REPL_PYBRICKS: expected bool");

        let err = ConfigError::read_file(
            "/etc/nus-repl.toml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.to_string(), "cannot read /etc/nus-repl.toml: gone");
    }
}
