use std::process::ExitCode;

use pgevodb_core::MigrationOrchestrator;

use crate::cli::{GlobalArgs, RepairCommandArguments};
use crate::commands::{parse_migration_id, prepare_command_context};
use crate::errors::CliError;
use crate::hooks::CommandHookRunner;
use crate::step_logs::FileStepLogSink;
use crate::terminal::TerminalConfirmation;


pub fn cli_repair(
    global_args: &GlobalArgs,
    arguments: RepairCommandArguments,
) -> Result<ExitCode, CliError> {
    let async_runtime =
        tokio::runtime::Runtime::new().map_err(|error| CliError::Runtime { error })?;

    async_runtime.block_on(cli_repair_inner(global_args, arguments))
}


async fn cli_repair_inner(
    global_args: &GlobalArgs,
    arguments: RepairCommandArguments,
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

    orchestrator.repair(&migration_id).await?;

    println!(
        "Checksum for {} now matches the on-disk fingerprint.",
        migration_id
    );

    let _ = orchestrator.close().await;

    Ok(ExitCode::SUCCESS)
}
