use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "pgevodb",
    author,
    about = "Schema-migration manager for PostgreSQL 14+.",
    version
)]
pub struct CliArgs {
    #[arg(
        long = "config",
        short = 'c',
        global = true,
        help = "Path to the configuration file. Defaults to \"./pgevodb.yaml\" \
                (relative to the working directory)."
    )]
    pub configuration_file_path: Option<PathBuf>,

    #[arg(
        long = "profile",
        short = 'p',
        global = true,
        help = "Name of the connection profile to use. If unspecified, the \
                default_profile key from the configuration file applies."
    )]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: CliCommand,
}


/// The global arguments, detached from the parsed command so the two can
/// travel separately.
pub struct GlobalArgs {
    pub configuration_file_path: Option<PathBuf>,

    pub profile: Option<String>,
}



#[derive(Subcommand)]
pub enum CliCommand {
    #[command(
        name = "status",
        about = "Displays every migration with its recorded state, including drift \
                and missing-bundle diagnoses."
    )]
    Status(StatusCommandArguments),

    #[command(
        name = "plan",
        about = "Computes and prints the pending forward plan without executing anything."
    )]
    Plan(PlanCommandArguments),

    #[command(
        name = "up",
        about = "Applies pending migrations in ascending id order, optionally up to \
                a target migration."
    )]
    Up(UpCommandArguments),

    #[command(
        name = "down",
        about = "Rolls back applied migrations with ids above the target, in descending \
                order. Note that in general, this is a destructive action."
    )]
    Down(DownCommandArguments),

    #[command(
        name = "verify",
        about = "Re-runs verify.sql for every applied migration that has one and records \
                the outcomes."
    )]
    Verify(VerifyCommandArguments),

    #[command(
        name = "repair",
        about = "Rewrites an applied migration's recorded checksum to the current on-disk \
                fingerprint. No SQL side effects."
    )]
    Repair(RepairCommandArguments),

    #[command(
        name = "retry",
        about = "Recycles a failed migration record and re-executes up through the given \
                migration."
    )]
    Retry(RetryCommandArguments),

    #[command(
        name = "reset-failed",
        about = "Resets (or, with --delete, removes) a non-applied migration record. \
                Touches only the state table."
    )]
    ResetFailed(ResetFailedCommandArguments),
}



#[derive(Args)]
pub struct StatusCommandArguments {}


#[derive(Args)]
pub struct PlanCommandArguments {
    #[arg(
        long = "to",
        help = "Plan only up to (and including) this migration id. \
                The id must name an existing bundle."
    )]
    pub to: Option<String>,

    #[arg(
        long = "ignore-tag-filter",
        action = ArgAction::SetTrue,
        help = "Compute the plan as if global.allow_tags was not configured."
    )]
    pub ignore_tag_filter: bool,
}


#[derive(Args)]
pub struct UpCommandArguments {
    #[arg(
        long = "to",
        help = "Apply only up to (and including) this migration id. \
                The id must name an existing bundle. If unspecified, every \
                pending migration is applied."
    )]
    pub to: Option<String>,

    #[arg(
        long = "timeout-sec",
        help = "Statement timeout in seconds for this invocation. A migration's \
                own timeout_sec still takes precedence; the global default applies \
                when neither is set."
    )]
    pub timeout_sec: Option<u32>,

    #[arg(
        long = "ignore-tag-filter",
        action = ArgAction::SetTrue,
        help = "Run even migrations the global.allow_tags filter would block."
    )]
    pub ignore_tag_filter: bool,

    #[arg(
        long = "confirm-prod",
        action = ArgAction::SetTrue,
        help = "Confirm execution against a profile with confirm_prod = true without \
                an interactive prompt."
    )]
    pub confirm_prod: bool,
}


#[derive(Args)]
pub struct DownCommandArguments {
    #[arg(
        long = "to",
        help = "Roll back every applied migration with an id above this one, \
                leaving this migration (and everything before it) applied."
    )]
    pub to: String,

    #[arg(
        long = "timeout-sec",
        help = "Statement timeout in seconds for this invocation. A migration's \
                own timeout_sec still takes precedence; the global default applies \
                when neither is set."
    )]
    pub timeout_sec: Option<u32>,

    #[arg(
        long = "confirm-prod",
        action = ArgAction::SetTrue,
        help = "Confirm execution against a profile with confirm_prod = true without \
                an interactive prompt."
    )]
    pub confirm_prod: bool,
}


#[derive(Args)]
pub struct VerifyCommandArguments {}


#[derive(Args)]
pub struct RepairCommandArguments {
    #[arg(help = "Id of the applied migration whose checksum should be rewritten.")]
    pub migration_id: String,

    #[arg(
        long = "accept-checksum",
        action = ArgAction::SetTrue,
        required = true,
        help = "Required acknowledgement that the on-disk script is the one to trust \
                from now on."
    )]
    pub accept_checksum: bool,
}


#[derive(Args)]
pub struct RetryCommandArguments {
    #[arg(long = "id", help = "Id of the migration to retry.")]
    pub migration_id: String,

    #[arg(
        long = "accept-checksum",
        action = ArgAction::SetTrue,
        help = "Adopt the on-disk fingerprint when it no longer matches the recorded \
                checksum (e.g. after fixing the failed script)."
    )]
    pub accept_checksum: bool,

    #[arg(
        long = "force",
        action = ArgAction::SetTrue,
        help = "Recycle a stale \"running\" record. Only use this after confirming no \
                other executor is alive."
    )]
    pub force: bool,

    #[arg(
        long = "timeout-sec",
        help = "Statement timeout in seconds for this invocation."
    )]
    pub timeout_sec: Option<u32>,

    #[arg(
        long = "confirm-prod",
        action = ArgAction::SetTrue,
        help = "Confirm execution against a profile with confirm_prod = true without \
                an interactive prompt."
    )]
    pub confirm_prod: bool,
}


#[derive(Args)]
pub struct ResetFailedCommandArguments {
    #[arg(long = "id", help = "Id of the migration record to reset.")]
    pub migration_id: String,

    #[arg(
        long = "delete",
        action = ArgAction::SetTrue,
        help = "Delete the row instead of resetting it to \"reverted\". This is also \
                the only escape hatch for a record whose bundle no longer exists on disk."
    )]
    pub delete: bool,
}
