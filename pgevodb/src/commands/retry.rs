use std::process::ExitCode;

use pgevodb_core::{MigrationOrchestrator, RetryRunOptions};

use crate::cli::{GlobalArgs, RetryCommandArguments};
use crate::commands::{parse_migration_id, prepare_command_context, spawn_cancellation_watcher};
use crate::errors::CliError;
use crate::hooks::CommandHookRunner;
use crate::step_logs::FileStepLogSink;
use crate::terminal::TerminalConfirmation;


pub fn cli_retry(
    global_args: &GlobalArgs,
    arguments: RetryCommandArguments,
) -> Result<ExitCode, CliError> {
    let async_runtime =
        tokio::runtime::Runtime::new().map_err(|error| CliError::Runtime { error })?;

    async_runtime.block_on(cli_retry_inner(global_args, arguments))
}


async fn cli_retry_inner(
    global_args: &GlobalArgs,
    arguments: RetryCommandArguments,
) -> Result<ExitCode, CliError> {
    let context = prepare_command_context(global_args)?;

    let migration_id = parse_migration_id(&arguments.migration_id)?;

    let hook_runner = CommandHookRunner;
    let log_sink = FileStepLogSink::new(context.log_dir.clone());
    let confirmation = TerminalConfirmation {
        interactive: context.interactive,
    };

    let mut orchestrator = MigrationOrchestrator::initialize(
        context.orchestrator_config,
        &hook_runner,
        &log_sink,
        &confirmation,
    )
    .await?;

    spawn_cancellation_watcher(orchestrator.cancellation_handle());

    let applied_ids = orchestrator
        .retry(
            &migration_id,
            RetryRunOptions {
                accept_checksum: arguments.accept_checksum,
                force: arguments.force,
                timeout_sec: arguments.timeout_sec,
                production_confirmed: arguments.confirm_prod,
            },
        )
        .await?;

    if applied_ids.is_empty() {
        println!("{} is already applied; nothing to do.", migration_id);
    } else {
        for applied_id in &applied_ids {
            println!("Applied {}.", applied_id);
        }
        println!();
        println!(
            "Retry complete: {} migration(s) applied through {}.",
            applied_ids.len(),
            migration_id
        );
    }

    let _ = orchestrator.close().await;

    Ok(ExitCode::SUCCESS)
}
