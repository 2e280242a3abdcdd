//! Configuration loading
//!
//! Layers, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. A TOML file: the explicit path, else `PROTOFLOW_CONFIG_PATH`, else an
//!    optional `protoflow.toml` in the working directory
//! 3. Environment variables `PROTOFLOW_<SECTION>__<KEY>`, e.g.
//!    `PROTOFLOW_ORCHESTRATOR__STEP_TIMEOUT_SECS=30`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::compiler::CompileOptions;
use crate::orchestrator::OrchestratorConfig;

pub const DEFAULT_CONFIG_FILE: &str = "protoflow.toml";
pub const DEFAULT_ENV_PREFIX: &str = "PROTOFLOW";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub compiler: CompileOptions,
    pub orchestrator: OrchestratorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load with the default search path and environment prefix
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            config_path: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }
}

impl ConfigBuilder {
    /// Config file to load; it must exist when given
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Prefix for environment overrides and the config path variable
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<Config> {
        let defaults = config::Config::try_from(&Config::default())
            .context("Failed to encode default configuration")?;

        let explicit = self.config_path.or_else(|| {
            std::env::var_os(format!("{}_CONFIG_PATH", self.env_prefix)).map(PathBuf::from)
        });

        let file = match &explicit {
            Some(path) => config::File::from(path.as_path()).required(true),
            None => config::File::new(DEFAULT_CONFIG_FILE, config::FileFormat::Toml)
                .required(false),
        };

        let loaded = config::Config::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| match &explicit {
                Some(path) => format!("Failed to read config file {}", path.display()),
                None => "Failed to read configuration".to_string(),
            })?;

        loaded
            .try_deserialize()
            .context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ExecutionMode;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = Config::builder()
            .env_prefix("PROTOFLOW_TEST_DEFAULTS")
            .build()
            .unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.compiler.max_memory, 32.0);
        assert_eq!(config.logging.filter, "info");
        assert!(config.orchestrator.step_timeout_secs.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = write_config(
            r#"
[compiler]
strict_dependencies = true
max_cpu = 16

[orchestrator]
step_timeout_secs = 45
mode_override = "adaptive"

[logging]
filter = "protoflow_core=debug"
"#,
        );

        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .env_prefix("PROTOFLOW_TEST_FILE")
            .build()
            .unwrap();

        assert!(config.compiler.strict_dependencies);
        assert_eq!(config.compiler.max_cpu, 16.0);
        assert_eq!(config.compiler.max_gpu, 2.0);
        assert_eq!(config.orchestrator.step_timeout_secs, Some(45));
        assert_eq!(
            config.orchestrator.mode_override,
            Some(ExecutionMode::Adaptive)
        );
        assert!(!config.orchestrator.gate_on_success);
        assert_eq!(config.logging.filter, "protoflow_core=debug");
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_config("[orchestrator]\nstep_timeout_secs = 45\n");
        std::env::set_var("PROTOFLOW_TEST_ENV_ORCHESTRATOR__STEP_TIMEOUT_SECS", "5");
        std::env::set_var("PROTOFLOW_TEST_ENV_ORCHESTRATOR__GATE_ON_SUCCESS", "true");

        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .env_prefix("PROTOFLOW_TEST_ENV")
            .build()
            .unwrap();

        assert_eq!(config.orchestrator.step_timeout_secs, Some(5));
        assert!(config.orchestrator.gate_on_success);
    }

    #[test]
    fn test_config_path_from_environment() {
        let file = write_config("[compiler]\nmax_memory = 64\n");
        std::env::set_var("PROTOFLOW_TEST_PATH_CONFIG_PATH", file.path());

        let config = Config::builder()
            .env_prefix("PROTOFLOW_TEST_PATH")
            .build()
            .unwrap();

        assert_eq!(config.compiler.max_memory, 64.0);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = Config::builder()
            .config_path(Some(PathBuf::from("/nonexistent/protoflow.toml")))
            .env_prefix("PROTOFLOW_TEST_MISSING")
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("/nonexistent/protoflow.toml"));
    }
}
