use std::process::ExitCode;

use itertools::Itertools;
use pgevodb_core::{MigrationOrchestrator, UpRunOptions};

use crate::cli::{GlobalArgs, UpCommandArguments};
use crate::commands::{parse_migration_id, prepare_command_context, spawn_cancellation_watcher};
use crate::errors::CliError;
use crate::hooks::CommandHookRunner;
use crate::step_logs::FileStepLogSink;
use crate::terminal::TerminalConfirmation;


pub fn cli_up(
    global_args: &GlobalArgs,
    arguments: UpCommandArguments,
) -> Result<ExitCode, CliError> {
    let async_runtime =
        tokio::runtime::Runtime::new().map_err(|error| CliError::Runtime { error })?;

    async_runtime.block_on(cli_up_inner(global_args, arguments))
}


async fn cli_up_inner(
    global_args: &GlobalArgs,
    arguments: UpCommandArguments,
) -> Result<ExitCode, CliError> {
    let context = prepare_command_context(global_args)?;

    let target_id = arguments
        .to
        .as_deref()
        .map(parse_migration_id)
        .transpose()?;

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

    println!(
        "Loaded {} migration bundle(s).",
        orchestrator.bundles().len()
    );

    spawn_cancellation_watcher(orchestrator.cancellation_handle());

    let applied_ids = orchestrator
        .up(UpRunOptions {
            to: target_id,
            timeout_sec: arguments.timeout_sec,
            ignore_tag_filter: arguments.ignore_tag_filter,
            production_confirmed: arguments.confirm_prod,
        })
        .await?;

    if applied_ids.is_empty() {
        println!("No migrations to apply: the database is up to date.");
    } else {
        println!(
            "Applied {} migration(s): {}.",
            applied_ids.len(),
            applied_ids.iter().join(", ")
        );
    }

    let _ = orchestrator.close().await;

    Ok(ExitCode::SUCCESS)
}
