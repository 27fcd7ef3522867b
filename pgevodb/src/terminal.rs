use std::io::{self, Write};

use pgevodb_core::{ConfirmationGate, MigrationPlan};


/// Interactive production confirmation on the terminal.
///
/// When the configuration disables interactivity this gate denies without
/// prompting, leaving `--confirm-prod` as the only way to proceed against
/// a `confirm_prod` profile.
pub struct TerminalConfirmation {
    pub interactive: bool,
}

impl ConfirmationGate for TerminalConfirmation {
    fn confirm_production_run(&self, plan: &MigrationPlan) -> bool {
        if !self.interactive {
            return false;
        }

        println!("This profile requires production confirmation.");
        println!("The following {} step(s) will be executed:", plan.len());
        for step in &plan.steps {
            println!("  {}", step.id);
        }

        print!("Are you sure you want to continue? [y/N] ");
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut user_response = String::new();
        if io::stdin().read_line(&mut user_response).is_err() {
            return false;
        }

        user_response.trim_end().eq_ignore_ascii_case("y")
    }
}
