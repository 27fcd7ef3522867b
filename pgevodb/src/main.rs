//! PGEVODB command-line interface.
//!
//! A thin surface over [`pgevodb_core`]: it parses arguments, loads the
//! configuration, wires up the terminal-facing collaborators (confirmation
//! prompt, file log sink, shell hook runner), and maps errors to the
//! documented exit codes (0 success, 1 user error, 2 lock busy,
//! 3 execution failure, 4 configuration error).

use std::process::ExitCode;

use clap::Parser;
use cli::{CliArgs, CliCommand, GlobalArgs};
use commands::{
    down::cli_down,
    plan::cli_plan,
    repair::cli_repair,
    reset_failed::cli_reset_failed,
    retry::cli_retry,
    status::cli_status,
    up::cli_up,
    verify::cli_verify,
};

mod cli;
mod commands;
mod errors;
mod hooks;
mod logging;
mod step_logs;
mod terminal;


pub fn main() -> ExitCode {
    let cli_args = CliArgs::parse();

    // A missing .env file is fine; an unreadable one is not worth dying for.
    let _ = dotenvy::dotenv();

    logging::initialize_tracing();


    let CliArgs {
        configuration_file_path,
        profile,
        command,
    } = cli_args;

    let global_args = GlobalArgs {
        configuration_file_path,
        profile,
    };

    let command_result = match command {
        CliCommand::Status(status_command_args) => cli_status(&global_args, status_command_args),
        CliCommand::Plan(plan_command_args) => cli_plan(&global_args, plan_command_args),
        CliCommand::Up(up_command_args) => cli_up(&global_args, up_command_args),
        CliCommand::Down(down_command_args) => cli_down(&global_args, down_command_args),
        CliCommand::Verify(verify_command_args) => cli_verify(&global_args, verify_command_args),
        CliCommand::Repair(repair_command_args) => cli_repair(&global_args, repair_command_args),
        CliCommand::Retry(retry_command_args) => cli_retry(&global_args, retry_command_args),
        CliCommand::ResetFailed(reset_failed_command_args) => {
            cli_reset_failed(&global_args, reset_failed_command_args)
        }
    };

    match command_result {
        Ok(exit_code) => exit_code,
        Err(cli_error) => {
            let exit_code = cli_error.exit_code();

            eprintln!("Error [{}]", cli_error.stable_identifier());
            eprintln!("{:?}", miette::Report::new(cli_error));

            ExitCode::from(exit_code)
        }
    }
}
