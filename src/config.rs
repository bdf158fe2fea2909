//! # Dispatcher Configuration
//!
//! Layered configuration for the [`Dispatcher`](crate::Dispatcher): built-in
//! defaults, then `dispatch.toml`, then `dispatch.<env>.toml`, then
//! `DISPATCH_*` environment variables.
//!
//! ```toml
//! max_machine_steps = 256
//! default_deadline_ms = 500
//! catch_panics = true
//!
//! [logging]
//! level = "info"
//! json = true
//! ```
//!
//! Nested keys use a double underscore in the environment:
//! `DISPATCH_LOGGING__LEVEL=warn`.

use crate::error::{DispatchError, DispatchResult};
use crate::logging::get_environment;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_MACHINE_STEPS: usize = 1024;
pub const CONFIG_FILE_STEM: &str = "dispatch";
pub const ENV_PREFIX: &str = "DISPATCH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Upper bound on states entered by a single state machine run.
    pub max_machine_steps: usize,
    /// Deadline applied to runs that are not given an explicit token.
    pub default_deadline_ms: Option<u64>,
    /// Convert handler panics into `Fault` outcomes.
    pub catch_panics: bool,
    pub logging: LoggingConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_machine_steps: DEFAULT_MAX_MACHINE_STEPS,
            default_deadline_ms: None,
            catch_panics: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> DispatchResult<()> {
        if self.max_machine_steps == 0 {
            return Err(DispatchError::Configuration(
                "max_machine_steps must be greater than zero".to_string(),
            ));
        }
        if self.default_deadline_ms == Some(0) {
            return Err(DispatchError::Configuration(
                "default_deadline_ms must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; falls back to the environment default.
    pub level: Option<String>,
    pub json: bool,
}

/// Environment-aware configuration loading
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    directory: PathBuf,
    environment: String,
}

impl ConfigLoader {
    /// Loader for `directory`, with the environment taken from `DISPATCH_ENV`
    /// or `APP_ENV`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_environment(directory, get_environment())
    }

    /// Useful for testing without modifying global environment variables
    pub fn with_environment(directory: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            environment: environment.into(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn load(&self) -> DispatchResult<DispatcherConfig> {
        self.load_with(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
    }

    fn load_with(&self, environment: Environment) -> DispatchResult<DispatcherConfig> {
        let base = self.directory.join(format!("{CONFIG_FILE_STEM}.toml"));
        let overlay = self
            .directory
            .join(format!("{CONFIG_FILE_STEM}.{}.toml", self.environment));

        debug!(
            environment = %self.environment,
            base = %base.display(),
            overlay = %overlay.display(),
            "Loading dispatcher configuration"
        );

        let defaults = DispatcherConfig::default();
        let config = Config::builder()
            .set_default("max_machine_steps", defaults.max_machine_steps as u64)?
            .set_default("catch_panics", defaults.catch_panics)?
            .set_default("logging.json", defaults.logging.json)?
            .add_source(File::from(base).required(false))
            .add_source(File::from(overlay).required(false))
            .add_source(environment)
            .build()?;

        let loaded: DispatcherConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Load a single file, ignoring directory layering and the environment.
    pub fn load_file(path: impl AsRef<Path>) -> DispatchResult<DispatcherConfig> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;
        let loaded: DispatcherConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn no_env() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(Some(HashMap::new()))
    }

    #[test]
    fn test_defaults_without_files() {
        let dir = TempDir::new().unwrap();
        let config = ConfigLoader::with_environment(dir.path(), "test")
            .load_with(no_env())
            .unwrap();
        assert_eq!(config, DispatcherConfig::default());
    }

    #[test]
    fn test_environment_overlay_wins() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("dispatch.toml"),
            "max_machine_steps = 64\ndefault_deadline_ms = 250\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("dispatch.production.toml"),
            "max_machine_steps = 16\n[logging]\nlevel = \"info\"\njson = true\n",
        )
        .unwrap();

        let config = ConfigLoader::with_environment(dir.path(), "production")
            .load_with(no_env())
            .unwrap();
        assert_eq!(config.max_machine_steps, 16);
        assert_eq!(config.default_deadline(), Some(Duration::from_millis(250)));
        assert_eq!(config.logging.level.as_deref(), Some("info"));
        assert!(config.logging.json);
        assert!(config.catch_panics);

        let development = ConfigLoader::with_environment(dir.path(), "development")
            .load_with(no_env())
            .unwrap();
        assert_eq!(development.max_machine_steps, 64);
    }

    #[test]
    fn test_environment_variables_override_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("dispatch.toml"), "max_machine_steps = 64\n").unwrap();

        let vars = HashMap::from([
            ("DISPATCH_MAX_MACHINE_STEPS".to_string(), "8".to_string()),
            ("DISPATCH_LOGGING__JSON".to_string(), "true".to_string()),
        ]);
        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(Some(vars));

        let config = ConfigLoader::with_environment(dir.path(), "test")
            .load_with(environment)
            .unwrap();
        assert_eq!(config.max_machine_steps, 8);
        assert!(config.logging.json);
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("dispatch.toml"), "max_machine_steps = 0\n").unwrap();

        let err = ConfigLoader::with_environment(dir.path(), "test")
            .load_with(no_env())
            .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));

        let zero_deadline = DispatcherConfig {
            default_deadline_ms: Some(0),
            ..DispatcherConfig::default()
        };
        assert!(zero_deadline.validate().is_err());
    }

    #[test]
    fn test_load_single_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.json");
        fs::write(&path, r#"{"catch_panics": false}"#).unwrap();

        let config = ConfigLoader::load_file(&path).unwrap();
        assert!(!config.catch_panics);
        assert_eq!(config.max_machine_steps, DEFAULT_MAX_MACHINE_STEPS);
    }

    #[test]
    fn test_missing_single_file_is_configuration_error() {
        let err = ConfigLoader::load_file("/nonexistent/dispatch.toml").unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }
}
