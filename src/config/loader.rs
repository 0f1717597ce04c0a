//! Configuration Loader
//!
//! Builds an [`EngineConfig`] from an optional file (YAML, TOML or JSON,
//! chosen by extension) layered with `TASKLANE__SECTION__FIELD` environment
//! variables, then validates it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::EngineConfig;

const ENV_PREFIX: &str = "TASKLANE";
const ENV_SEPARATOR: &str = "__";

/// Holds a validated configuration for one engine instance
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<EngineConfig>,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load defaults overlaid with environment variables only
    pub fn load() -> ConfigResult<Self> {
        let builder = config::Config::builder().add_source(Self::environment_source());
        Self::build(builder, None)
    }

    /// Load a configuration file overlaid with environment variables
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from file: {}", path.display());

        if !path.exists() {
            return Err(ConfigurationError::load_failed(
                path.display().to_string(),
                "file not found",
            ));
        }

        let builder = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(Self::environment_source());

        Self::build(builder, Some(path.to_path_buf()))
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(config: EngineConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            source: None,
        })
    }

    fn environment_source() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        source: Option<PathBuf>,
    ) -> ConfigResult<Self> {
        let source_name = source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_string());

        let settings = builder
            .build()
            .map_err(|e| ConfigurationError::load_failed(&source_name, e))?;

        let config: EngineConfig = settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::load_failed(&source_name, e))?;

        config.validate()?;

        info!(
            source = %source_name,
            pool_max = config.pool.max,
            concurrency = config.executor.concurrency,
            distributed = config.distributed_cache.enabled,
            durable = config.durable_cache.enabled,
            "🔧 CONFIG: Configuration loaded successfully"
        );

        Ok(Self {
            config: Arc::new(config),
            source,
        })
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared handle to the loaded configuration
    pub fn shared(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.config)
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "pool:\n  min: 1\n  max: 3\nexecutor:\n  concurrency: 2\n  batch_size: 4\ndistributed_cache:\n  enabled: true\n  nodes: [\"cache-a\", \"cache-b\"]"
        )
        .unwrap();

        let manager = ConfigManager::load_from_file(file.path()).unwrap();
        let config = manager.config();

        assert_eq!(config.pool.min, 1);
        assert_eq!(config.pool.max, 3);
        assert_eq!(config.executor.concurrency, 2);
        assert_eq!(config.executor.batch_size, 4);
        assert!(config.distributed_cache.enabled);
        assert_eq!(config.distributed_cache.nodes, vec!["cache-a", "cache-b"]);
        // Untouched sections keep defaults
        assert_eq!(config.hot_cache, super::super::HotCacheConfig::default());
        assert_eq!(manager.source(), Some(file.path()));
    }

    #[test]
    fn test_invalid_file_values_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "pool:\n  min: 9\n  max: 2").unwrap();

        let result = ConfigManager::load_from_file(file.path());
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_missing_file_rejected() {
        let result = ConfigManager::load_from_file("/nonexistent/tasklane.yaml");
        assert!(matches!(result, Err(ConfigurationError::LoadFailed { .. })));
    }

    #[test]
    fn test_from_config_validates() {
        let mut config = EngineConfig::for_test();
        assert!(ConfigManager::from_config(config.clone()).is_ok());

        config.executor.batch_size = 0;
        assert!(ConfigManager::from_config(config).is_err());
    }
}
