use std::process::ExitCode;

use pgevodb_core::MigrationOrchestrator;

use crate::cli::{GlobalArgs, StatusCommandArguments};
use crate::commands::prepare_command_context;
use crate::errors::CliError;
use crate::hooks::CommandHookRunner;
use crate::step_logs::FileStepLogSink;
use crate::terminal::TerminalConfirmation;


pub fn cli_status(
    global_args: &GlobalArgs,
    arguments: StatusCommandArguments,
) -> Result<ExitCode, CliError> {
    let async_runtime =
        tokio::runtime::Runtime::new().map_err(|error| CliError::Runtime { error })?;

    async_runtime.block_on(cli_status_inner(global_args, arguments))
}


async fn cli_status_inner(
    global_args: &GlobalArgs,
    _arguments: StatusCommandArguments,
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

    let overviews = orchestrator.status().await?;

    if overviews.is_empty() {
        println!("No migrations found.");

        let _ = orchestrator.close().await;
        return Ok(ExitCode::SUCCESS);
    }


    let id_column_width = overviews
        .iter()
        .map(|overview| overview.id.as_str().len())
        .max()
        .unwrap_or(0);

    for overview in &overviews {
        let status_label = overview
            .status
            .map(|status| status.as_str())
            .unwrap_or("pending");

        let mut line = format!(
            "{:<id_column_width$}  {:<8}",
            overview.id, status_label
        );

        if let Some(applied_at) = overview.applied_at {
            line.push_str(&format!(
                "  applied {}",
                applied_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }

        if let Some(execution_ms) = overview.execution_ms {
            line.push_str(&format!("  {} ms", execution_ms));
        }

        match overview.verify_ok {
            Some(true) => line.push_str("  verify ok"),
            Some(false) => line.push_str("  verify FAILED"),
            None => {}
        }

        if overview.drift {
            line.push_str("  [DRIFT: on-disk script differs from the recorded checksum]");
        }

        if overview.missing_bundle {
            line.push_str("  [MISSING: bundle no longer exists on disk]");
        }

        println!("{}", line);
    }

    let _ = orchestrator.close().await;

    Ok(ExitCode::SUCCESS)
}
