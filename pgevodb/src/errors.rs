use miette::Diagnostic;
use pgevodb_core::errors::LockError;
use pgevodb_core::EngineError;
use pgevodb_configuration::{ConfigurationLoadingError, ProfileSelectionError};
use thiserror::Error;


/// Exit codes promised by the CLI contract:
/// 0 success, 1 user error, 2 lock busy, 3 execution failure,
/// 4 configuration error.
pub const EXIT_CODE_USER_ERROR: u8 = 1;
pub const EXIT_CODE_LOCK_BUSY: u8 = 2;
pub const EXIT_CODE_EXECUTION_FAILURE: u8 = 3;
pub const EXIT_CODE_CONFIGURATION_ERROR: u8 = 4;


#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("failed to load configuration")]
    Configuration {
        #[source]
        error: ConfigurationLoadingError,
    },

    #[error("failed to select a connection profile")]
    ProfileSelection {
        #[source]
        error: ProfileSelectionError,
    },

    #[error(
        "profile \"{}\" has no dsn and the DATABASE_URL environment variable is not set",
        .profile_name
    )]
    MissingDsn { profile_name: String },

    #[error(
        "profile \"{}\" has an invalid dsn",
        .profile_name
    )]
    InvalidDsn {
        profile_name: String,

        #[source]
        error: sqlx::Error,
    },

    #[error("{}", .message)]
    InvalidInvocation { message: String },

    #[error(transparent)]
    Engine {
        #[from]
        error: EngineError,
    },

    #[error("failed to initialize tokio async runtime")]
    Runtime {
        #[source]
        error: std::io::Error,
    },
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Configuration { .. }
            | CliError::ProfileSelection { .. }
            | CliError::MissingDsn { .. }
            | CliError::InvalidDsn { .. } => EXIT_CODE_CONFIGURATION_ERROR,

            CliError::InvalidInvocation { .. } => EXIT_CODE_USER_ERROR,

            CliError::Engine { error } => match error {
                EngineError::Lock(LockError::Busy { .. }) => EXIT_CODE_LOCK_BUSY,
                _ if error.is_user_error() => EXIT_CODE_USER_ERROR,
                _ => EXIT_CODE_EXECUTION_FAILURE,
            },

            CliError::Runtime { .. } => EXIT_CODE_EXECUTION_FAILURE,
        }
    }

    /// The stable error identifier printed alongside the message.
    pub fn stable_identifier(&self) -> &'static str {
        match self {
            CliError::Configuration { .. }
            | CliError::ProfileSelection { .. }
            | CliError::MissingDsn { .. }
            | CliError::InvalidDsn { .. } => "ConfigError",

            CliError::InvalidInvocation { .. } => "InvalidInvocation",

            CliError::Engine { error } => error.stable_identifier(),

            CliError::Runtime { .. } => "ExecutionError",
        }
    }
}



#[cfg(test)]
mod test {
    use super::*;
    use pgevodb_core::errors::{ExecutionError, PlanError};
    use pgevodb_core::{Fingerprint, MigrationId};

    fn id() -> MigrationId {
        MigrationId::parse_from_str("2025-01-01T10-00-00__example").unwrap()
    }

    #[test]
    fn lock_busy_maps_to_exit_code_two() {
        let error = CliError::Engine {
            error: EngineError::Lock(LockError::Busy { lock_key: 42 }),
        };

        assert_eq!(error.exit_code(), EXIT_CODE_LOCK_BUSY);
        assert_eq!(error.stable_identifier(), "LockBusy");
    }

    #[test]
    fn planner_blocks_map_to_exit_code_one() {
        let drift = CliError::Engine {
            error: EngineError::Plan(PlanError::Drift {
                id: id(),
                recorded_checksum: "00".repeat(32),
                disk_fingerprint: Fingerprint::calculate("SELECT 1;", ""),
            }),
        };
        assert_eq!(drift.exit_code(), EXIT_CODE_USER_ERROR);
        assert_eq!(drift.stable_identifier(), "DriftError");

        let irreversible = CliError::Engine {
            error: EngineError::Plan(PlanError::Irreversible { id: id() }),
        };
        assert_eq!(irreversible.exit_code(), EXIT_CODE_USER_ERROR);
        assert_eq!(irreversible.stable_identifier(), "IrreversibleError");
    }

    #[test]
    fn script_failures_map_to_exit_code_three() {
        let error = CliError::Engine {
            error: EngineError::Execution(ExecutionError::ScriptFailed {
                id: id(),
                error: sqlx::Error::PoolClosed,
            }),
        };

        assert_eq!(error.exit_code(), EXIT_CODE_EXECUTION_FAILURE);
        assert_eq!(error.stable_identifier(), "ExecutionError");
    }

    #[test]
    fn configuration_problems_map_to_exit_code_four() {
        let error = CliError::MissingDsn {
            profile_name: "dev".to_string(),
        };

        assert_eq!(error.exit_code(), EXIT_CODE_CONFIGURATION_ERROR);
        assert_eq!(error.stable_identifier(), "ConfigError");
    }
}
