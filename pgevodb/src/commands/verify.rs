use std::process::ExitCode;

use pgevodb_core::MigrationOrchestrator;

use crate::cli::{GlobalArgs, VerifyCommandArguments};
use crate::commands::{prepare_command_context, spawn_cancellation_watcher};
use crate::errors::{CliError, EXIT_CODE_EXECUTION_FAILURE};
use crate::hooks::CommandHookRunner;
use crate::step_logs::FileStepLogSink;
use crate::terminal::TerminalConfirmation;


pub fn cli_verify(
    global_args: &GlobalArgs,
    arguments: VerifyCommandArguments,
) -> Result<ExitCode, CliError> {
    let async_runtime =
        tokio::runtime::Runtime::new().map_err(|error| CliError::Runtime { error })?;

    async_runtime.block_on(cli_verify_inner(global_args, arguments))
}


async fn cli_verify_inner(
    global_args: &GlobalArgs,
    _arguments: VerifyCommandArguments,
) -> Result<ExitCode, CliError> {
    let context = prepare_command_context(global_args)?;

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

    let outcomes = orchestrator.verify().await?;

    if outcomes.is_empty() {
        println!("Nothing to verify: no applied migration has a verify.sql.");

        let _ = orchestrator.close().await;
        return Ok(ExitCode::SUCCESS);
    }


    let mut failed_count = 0usize;

    for (verified_id, verify_ok) in &outcomes {
        if *verify_ok {
            println!("{}  ok", verified_id);
        } else {
            println!("{}  FAILED", verified_id);
            failed_count += 1;
        }
    }

    let _ = orchestrator.close().await;

    if failed_count > 0 {
        println!();
        println!(
            "{} of {} verification(s) failed; see verify_ok in schema_migrations.",
            failed_count,
            outcomes.len()
        );

        return Ok(ExitCode::from(EXIT_CODE_EXECUTION_FAILURE));
    }

    println!();
    println!("All {} verification(s) passed.", outcomes.len());

    Ok(ExitCode::SUCCESS)
}
