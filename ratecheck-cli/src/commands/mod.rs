//! Command handlers -- one module per subcommand

pub mod config;
pub mod render;
pub mod run;

use std::path::Path;

use ratecheck_core::config::RatecheckConfig;
use ratecheck_core::error::{ConfigError, RatecheckError};
use tracing::info;

/// Loads the effective configuration.
///
/// A missing file falls back to defaults, with environment overrides still applied.
pub async fn load_config(path: &Path) -> Result<RatecheckConfig, RatecheckError> {
    match RatecheckConfig::load(path).await {
        Err(RatecheckError::Config(ConfigError::FileNotFound { .. })) => {
            info!(path = %path.display(), "config file not found, using defaults");
            let mut config = RatecheckConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_config_missing_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/ratecheck.toml"))
            .await
            .expect("defaults should be valid");
        assert_eq!(config.traffic.batch_size, 300);
    }

    #[tokio::test]
    async fn test_load_config_invalid_file_is_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("ratecheck.toml");
        std::fs::write(&path, "[traffic]\nbatch_size = 0\n").expect("write config");

        let err = load_config(&path).await.unwrap_err();
        assert!(matches!(err, RatecheckError::Config(_)));
    }
}
