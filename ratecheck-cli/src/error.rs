//! CLI-specific error types and exit code mapping

use ratecheck_core::error::RatecheckError;
use ratecheck_harness::HarnessError;

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// At least one scenario failed or was aborted.
    #[error("{failed} of {total} scenario(s) did not pass")]
    ScenariosFailed {
        /// Failed or aborted scenarios.
        failed: usize,
        /// Scenarios run.
        total: usize,
    },

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from ratecheck-core.
    #[error("{0}")]
    Core(#[from] RatecheckError),
}

impl From<HarnessError> for CliError {
    fn from(e: HarnessError) -> Self {
        Self::Core(e.into())
    }
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                                  |
    /// |------|------------------------------------------|
    /// | 0    | Success, every scenario passed           |
    /// | 1    | A scenario failed / general error        |
    /// | 2    | Configuration error                      |
    /// | 3    | Test environment could not be provisioned |
    /// | 10   | IO error                                 |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Io(_) => 10,
            Self::Core(core) => match core {
                RatecheckError::Config(_) => 2,
                RatecheckError::Environment(_) => 3,
                RatecheckError::Io(_) => 10,
                RatecheckError::Policy(_) | RatecheckError::Traffic(_) => 1,
            },
            Self::ScenariosFailed { .. } | Self::JsonSerialize(_) | Self::Command(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use ratecheck_core::error::{ConfigError, EnvironmentError};

    use super::*;

    #[test]
    fn test_exit_code_config_error() {
        let err = CliError::Config("test error".to_owned());
        assert_eq!(err.exit_code(), 2, "config error should return exit code 2");
    }

    #[test]
    fn test_exit_code_core_config_error() {
        let err = CliError::Core(RatecheckError::Config(ConfigError::FileNotFound {
            path: "ratecheck.toml".to_owned(),
        }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_provisioning_failure() {
        let err: CliError = HarnessError::Provisioning {
            stage: "readiness_gate".to_owned(),
            reason: "app=redis not ready".to_owned(),
        }
        .into();
        assert_eq!(err.exit_code(), 3, "environment failure should return exit code 3");
        assert!(matches!(
            err,
            CliError::Core(RatecheckError::Environment(EnvironmentError::Provisioning { .. }))
        ));
    }

    #[test]
    fn test_exit_code_scenarios_failed() {
        let err = CliError::ScenariosFailed {
            failed: 1,
            total: 2,
        };
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "1 of 2 scenario(s) did not pass");
    }

    #[test]
    fn test_exit_code_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = CliError::Io(io_err);
        assert_eq!(err.exit_code(), 10, "io error should return exit code 10");
    }

    #[test]
    fn test_exit_code_harness_template_error() {
        let err: CliError = HarnessError::TemplateRender("missing parameter".to_owned()).into();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_harness_config_error_maps_to_config_exit_code() {
        let err: CliError = HarnessError::Config {
            field: "batch_size".to_owned(),
            reason: "must be 1-100000".to_owned(),
        }
        .into();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_error_display_command() {
        let err = CliError::Command("execution failed".to_owned());
        assert_eq!(format!("{err}"), "execution failed");
    }
}
