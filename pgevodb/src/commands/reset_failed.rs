use std::process::ExitCode;

use pgevodb_core::MigrationOrchestrator;

use crate::cli::{GlobalArgs, ResetFailedCommandArguments};
use crate::commands::{parse_migration_id, prepare_command_context};
use crate::errors::CliError;
use crate::hooks::CommandHookRunner;
use crate::step_logs::FileStepLogSink;
use crate::terminal::TerminalConfirmation;


pub fn cli_reset_failed(
    global_args: &GlobalArgs,
    arguments: ResetFailedCommandArguments,
) -> Result<ExitCode, CliError> {
    let async_runtime =
        tokio::runtime::Runtime::new().map_err(|error| CliError::Runtime { error })?;

    async_runtime.block_on(cli_reset_failed_inner(global_args, arguments))
}


async fn cli_reset_failed_inner(
    global_args: &GlobalArgs,
    arguments: ResetFailedCommandArguments,
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

    orchestrator
        .reset_failed(&migration_id, arguments.delete)
        .await?;

    if arguments.delete {
        println!("Deleted the record for {}.", migration_id);
    } else {
        println!(
            "Reset {} to \"reverted\"; execution fields cleared.",
            migration_id
        );
    }

    let _ = orchestrator.close().await;

    Ok(ExitCode::SUCCESS)
}
