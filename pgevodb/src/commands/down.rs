use std::process::ExitCode;

use pgevodb_core::{DownRunOptions, MigrationOrchestrator};

use crate::cli::{DownCommandArguments, GlobalArgs};
use crate::commands::{parse_migration_id, prepare_command_context, spawn_cancellation_watcher};
use crate::errors::CliError;
use crate::hooks::CommandHookRunner;
use crate::step_logs::FileStepLogSink;
use crate::terminal::TerminalConfirmation;


pub fn cli_down(
    global_args: &GlobalArgs,
    arguments: DownCommandArguments,
) -> Result<ExitCode, CliError> {
    let async_runtime =
        tokio::runtime::Runtime::new().map_err(|error| CliError::Runtime { error })?;

    async_runtime.block_on(cli_down_inner(global_args, arguments))
}


async fn cli_down_inner(
    global_args: &GlobalArgs,
    arguments: DownCommandArguments,
) -> Result<ExitCode, CliError> {
    let context = prepare_command_context(global_args)?;

    let target_id = parse_migration_id(&arguments.to)?;

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

    let preview = orchestrator.preview_down_plan(&target_id).await?;

    if preview.is_empty() {
        println!(
            "Nothing to roll back: no applied migrations above {}.",
            target_id
        );

        let _ = orchestrator.close().await;
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "Rolling back {} migration(s), newest first:",
        preview.len()
    );
    for step in &preview.steps {
        println!("  {}", step.id);
    }
    println!();

    spawn_cancellation_watcher(orchestrator.cancellation_handle());

    let reverted_ids = orchestrator
        .down(DownRunOptions {
            to: target_id,
            timeout_sec: arguments.timeout_sec,
            production_confirmed: arguments.confirm_prod,
        })
        .await?;

    for reverted_id in &reverted_ids {
        println!("Reverted {}.", reverted_id);
    }
    println!();
    println!("Rolled back {} migration(s).", reverted_ids.len());

    let _ = orchestrator.close().await;

    Ok(ExitCode::SUCCESS)
}
