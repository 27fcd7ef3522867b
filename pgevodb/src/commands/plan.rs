use std::process::ExitCode;

use pgevodb_core::MigrationOrchestrator;

use crate::cli::{GlobalArgs, PlanCommandArguments};
use crate::commands::{parse_migration_id, prepare_command_context};
use crate::errors::CliError;
use crate::hooks::CommandHookRunner;
use crate::step_logs::FileStepLogSink;
use crate::terminal::TerminalConfirmation;


pub fn cli_plan(
    global_args: &GlobalArgs,
    arguments: PlanCommandArguments,
) -> Result<ExitCode, CliError> {
    let async_runtime =
        tokio::runtime::Runtime::new().map_err(|error| CliError::Runtime { error })?;

    async_runtime.block_on(cli_plan_inner(global_args, arguments))
}


async fn cli_plan_inner(
    global_args: &GlobalArgs,
    arguments: PlanCommandArguments,
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

    let plan = orchestrator
        .preview_up_plan(target_id.as_ref(), arguments.ignore_tag_filter)
        .await?;

    if plan.is_empty() {
        println!("Nothing to apply: the database is up to date.");
    } else {
        println!("{} migration(s) would be applied, in this order:", plan.len());
        for step in &plan.steps {
            println!("  {}", step.id);
        }
    }

    let _ = orchestrator.close().await;

    Ok(ExitCode::SUCCESS)
}
