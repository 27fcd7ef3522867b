use std::{env, path::PathBuf, str::FromStr};

use pgevodb_configuration::Configuration;
use pgevodb_core::{CancellationHandle, MigrationId, OrchestratorConfig};
use sqlx::postgres::PgConnectOptions;
use tracing::warn;

use crate::cli::GlobalArgs;
use crate::errors::CliError;

pub mod down;
pub mod plan;
pub mod repair;
pub mod reset_failed;
pub mod retry;
pub mod status;
pub mod up;
pub mod verify;


pub(crate) struct CommandContext {
    pub orchestrator_config: OrchestratorConfig,

    pub interactive: bool,

    pub log_dir: PathBuf,
}


/// Loads the configuration, selects the profile, and resolves everything
/// the orchestrator needs. Shared by every command.
pub(crate) fn prepare_command_context(
    global_args: &GlobalArgs,
) -> Result<CommandContext, CliError> {
    let configuration = match global_args.configuration_file_path.as_ref() {
        Some(configuration_file_path) => Configuration::load_from_path(configuration_file_path),
        None => Configuration::load_from_default_path(),
    }
    .map_err(|error| CliError::Configuration { error })?;

    let (profile_name, profile) = configuration
        .select_profile(global_args.profile.as_deref())
        .map_err(|error| CliError::ProfileSelection { error })?;

    let dsn = match profile.dsn.clone() {
        Some(dsn) => dsn,
        None => env::var("DATABASE_URL").map_err(|_| CliError::MissingDsn {
            profile_name: profile_name.to_string(),
        })?,
    };

    // Fail on an unparseable dsn here, before any session work starts.
    PgConnectOptions::from_str(&dsn).map_err(|error| CliError::InvalidDsn {
        profile_name: profile_name.to_string(),
        error,
    })?;

    let orchestrator_config = OrchestratorConfig {
        dsn,
        profile_name: profile_name.to_string(),
        schema: profile.schema.clone(),
        migrations_dir: configuration.global.migrations_dir.clone(),
        lock_key: configuration.global.lock_key,
        global_timeout_sec: configuration.global.timeout_sec,
        allow_tags: configuration.global.allow_tags.clone(),
        applied_by: actor_label(),
        confirm_prod: profile.confirm_prod,
    };

    Ok(CommandContext {
        orchestrator_config,
        interactive: configuration.global.interactive,
        log_dir: configuration.global.log_dir.clone(),
    })
}


/// The `applied_by` label: `user@host`, best effort from the environment.
fn actor_label() -> String {
    let user = env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());

    format!("{}@{}", user, host)
}


pub(crate) fn parse_migration_id(raw_id: &str) -> Result<MigrationId, CliError> {
    MigrationId::parse_from_str(raw_id).map_err(|error| CliError::InvalidInvocation {
        message: format!("invalid migration id \"{}\": {}", raw_id, error),
    })
}


/// On Ctrl-C, asks the server to cancel whatever statement the engine's
/// session is executing. The cancelled statement then errors out through
/// the executor's normal failure path, which records the `failed` row,
/// releases the advisory lock, and exits non-zero.
pub(crate) fn spawn_cancellation_watcher(cancellation_handle: CancellationHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling the in-flight statement.");

            if let Err(error) = cancellation_handle.cancel_in_flight_statement().await {
                warn!(
                    error = %error,
                    "Unable to cancel the in-flight statement."
                );
            }
        }
    });
}
