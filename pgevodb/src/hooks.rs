use std::process::Command;

use pgevodb_core::errors::HookError;
use pgevodb_core::hooks::HookRunner;
use tracing::debug;


/// Runs hook commands through the system shell.
///
/// Hooks exist precisely for work the engine's transaction cannot hold
/// (e.g. `CREATE INDEX CONCURRENTLY` via psql), so they get a real shell
/// and inherit the process environment.
pub struct CommandHookRunner;

impl HookRunner for CommandHookRunner {
    fn run_hook(&self, command: &str) -> Result<(), HookError> {
        debug!(command, "Running hook command.");

        let exit_status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .map_err(|error| HookError {
                command: command.to_string(),
                error: Box::new(error),
            })?;

        if !exit_status.success() {
            return Err(HookError {
                command: command.to_string(),
                error: format!("hook exited with {}", exit_status).into(),
            });
        }

        Ok(())
    }
}
