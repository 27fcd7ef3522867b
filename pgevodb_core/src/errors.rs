use std::{borrow::Cow, collections::BTreeSet, error::Error, path::PathBuf};

use thiserror::Error;

use crate::{
    bundle::metadata::BundleMetadataError,
    fingerprint::Fingerprint,
    identifier::{InvalidMigrationIdError, MigrationId},
    state::RecordStatus,
};



/// An error that can occur while discovering and loading migration bundles.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error(
        "failed to read migrations directory at \"{}\"",
        .directory_path.display()
    )]
    UnableToScanDirectory {
        directory_path: PathBuf,

        #[source]
        error: fs_more::error::DirectoryScanError,
    },

    #[error(
        "invalid structure for migration bundle at \"{}\": {}",
        .bundle_directory_path.display(),
        .reason
    )]
    InvalidBundleStructure {
        bundle_directory_path: PathBuf,

        reason: Cow<'static, str>,
    },

    #[error(
        "invalid migration id \"{}\"",
        .id
    )]
    InvalidBundleId {
        id: String,

        #[source]
        error: InvalidMigrationIdError,
    },

    #[error(
        "migration id {} is not unique",
        .id
    )]
    DuplicateId { id: MigrationId },

    #[error(
        "failed to read migration script at \"{}\"",
        .path.display()
    )]
    UnableToReadScript {
        path: PathBuf,

        #[source]
        error: std::io::Error,
    },

    #[error(
        "failed to load metadata for migration {}",
        .id
    )]
    MetadataError {
        id: MigrationId,

        #[source]
        error: BundleMetadataError,
    },

    #[error(
        "script \"{}\" includes \"{}\", which does not exist",
        .script_path.display(),
        .include_path.display()
    )]
    IncludeTargetMissing {
        script_path: PathBuf,

        include_path: PathBuf,
    },

    #[error(
        "failed to read included file at \"{}\"",
        .include_path.display()
    )]
    UnableToReadInclude {
        include_path: PathBuf,

        #[source]
        error: std::io::Error,
    },

    #[error(
        "script \"{}\" includes itself",
        .script_path.display()
    )]
    IncludeCycle { script_path: PathBuf },

    #[error(
        "included file \"{}\" contains an @include directive; includes do not nest",
        .include_path.display()
    )]
    NestedInclude {
        script_path: PathBuf,

        include_path: PathBuf,
    },
}



/// An error produced while reconciling on-disk bundles with the state table
/// into an executable plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(
        "checksum drift detected for migration {}: recorded {}, on disk {}; \
        run \"repair --accept-checksum\" to accept the on-disk script",
        .id,
        .recorded_checksum,
        .disk_fingerprint
    )]
    Drift {
        id: MigrationId,

        recorded_checksum: String,

        disk_fingerprint: Fingerprint,
    },

    #[error(
        "migration {} is recorded in the database, but its bundle no longer exists on disk; \
        \"reset-failed --delete\" is the only way to discard the record",
        .id
    )]
    MissingBundle { id: MigrationId },

    #[error(
        "migration {} requires {}, which is neither applied nor planned earlier",
        .id,
        .requires
    )]
    Dependency {
        id: MigrationId,

        requires: MigrationId,
    },

    #[error(
        "migration {} is marked reversible: false and cannot be rolled back",
        .id
    )]
    Irreversible { id: MigrationId },

    #[error(
        "migration {} is blocked by the tag filter (tags: {:?})",
        .id,
        .tags
    )]
    TagBlocked {
        id: MigrationId,

        tags: BTreeSet<String>,
    },

    #[error(
        "migration {} is recorded as running; another executor may have crashed mid-flight \
        (use \"retry --force\" after confirming nothing else is running)",
        .id
    )]
    StaleRunning { id: MigrationId },

    #[error(
        "migration {} previously failed; use \"retry\" or \"reset-failed\" before continuing",
        .id
    )]
    FailedRecord { id: MigrationId },

    #[error(
        "no migration bundle with id {} exists",
        .id
    )]
    UnknownTarget { id: MigrationId },
}



/// An error related to the cross-process advisory lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "another migration executor holds the advisory lock (key {})",
        .lock_key
    )]
    Busy { lock_key: i64 },

    #[error("failed to execute advisory lock query")]
    QueryFailed {
        #[source]
        error: sqlx::Error,
    },
}



/// An error raised by the `schema_migrations` state store.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("failed to execute query against the migration state table")]
    QueryFailed {
        #[source]
        error: sqlx::Error,
    },

    #[error("failed while setting up or committing a state transaction")]
    TransactionFailed {
        #[source]
        error: sqlx::Error,
    },

    #[error(
        "invalid row \"{}\" encountered in migration state table: {}",
        .id,
        .reason
    )]
    InvalidRow {
        id: String,

        reason: Cow<'static, str>,
    },
}



/// An error during the execution of a hook command.
///
/// Subprocess handling lives outside the engine; implementations of
/// [`HookRunner`][crate::hooks::HookRunner] box whatever went wrong.
#[derive(Debug, Error)]
#[error("hook command failed: {}", .command)]
pub struct HookError {
    pub command: String,

    #[source]
    pub error: Box<dyn Error + Send + Sync + 'static>,
}



/// An error that occurs while executing a single plan step.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(
        "pre-hook failed for migration {}; no state was recorded",
        .id
    )]
    PreHookFailed {
        id: MigrationId,

        #[source]
        error: HookError,
    },

    #[error(
        "migration script for {} failed",
        .id
    )]
    ScriptFailed {
        id: MigrationId,

        #[source]
        error: sqlx::Error,
    },

    #[error("failed while setting up or committing the script transaction")]
    TransactionFailed {
        #[source]
        error: sqlx::Error,
    },

    #[error("failed to record migration state")]
    StateWriteFailed {
        #[from]
        #[source]
        error: StateStoreError,
    },

    #[error(
        "verify script for migration {} failed",
        .id
    )]
    VerifyFailed {
        id: MigrationId,

        #[source]
        error: sqlx::Error,
    },

    #[error(
        "failed to open the step log for migration {}",
        .id
    )]
    LogStreamFailed {
        id: MigrationId,

        #[source]
        error: std::io::Error,
    },
}



/// An error raised by the recovery operations (`repair`, `retry`, `reset-failed`).
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(
        "no migration bundle with id {} exists on disk",
        .id
    )]
    BundleNotFound { id: MigrationId },

    #[error(
        "no record for migration {} exists in the state table",
        .id
    )]
    RecordNotFound { id: MigrationId },

    #[error(
        "repair requires migration {} to be applied, but its status is {}",
        .id,
        .status.as_str()
    )]
    NotApplied {
        id: MigrationId,

        status: RecordStatus,
    },

    #[error(
        "migration {} is recorded as running; pass --force after confirming \
        no other executor is alive",
        .id
    )]
    StaleRunning { id: MigrationId },

    #[error(
        "checksum drift detected for migration {}; pass --accept-checksum to \
        adopt the on-disk script",
        .id
    )]
    DriftNotAccepted { id: MigrationId },

    #[error(
        "migration {} is applied; reset-failed never transitions a record away from applied",
        .id
    )]
    CannotResetApplied { id: MigrationId },

    #[error(transparent)]
    StateStore(#[from] StateStoreError),
}



/// Top-level engine error: everything an orchestrator run can surface.
///
/// Each variant carries a stable identifier (see [`EngineError::stable_identifier`])
/// used in terminal output and exit-code mapping.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error("failed to establish database session")]
    Connection {
        #[source]
        error: sqlx::Error,
    },

    #[error(
        "profile \"{}\" requires production confirmation; confirm interactively or pass --confirm-prod",
        .profile_name
    )]
    ProductionNotConfirmed { profile_name: String },
}

impl EngineError {
    /// Stable identifier of the underlying error kind.
    pub fn stable_identifier(&self) -> &'static str {
        match self {
            EngineError::Bundle(_) => "BundleError",
            EngineError::Plan(plan_error) => match plan_error {
                PlanError::Drift { .. } | PlanError::MissingBundle { .. } => "DriftError",
                PlanError::Dependency { .. } => "DependencyError",
                PlanError::Irreversible { .. } => "IrreversibleError",
                PlanError::TagBlocked { .. } => "TagBlocked",
                PlanError::StaleRunning { .. } => "StaleRunning",
                PlanError::FailedRecord { .. } => "FailedRecord",
                PlanError::UnknownTarget { .. } => "UnknownTarget",
            },
            EngineError::Lock(lock_error) => match lock_error {
                LockError::Busy { .. } => "LockBusy",
                LockError::QueryFailed { .. } => "StateError",
            },
            EngineError::StateStore(_) => "StateError",
            EngineError::Execution(execution_error) => match execution_error {
                ExecutionError::VerifyFailed { .. } => "VerifyFailed",
                _ => "ExecutionError",
            },
            EngineError::Recovery(recovery_error) => match recovery_error {
                RecoveryError::BundleNotFound { .. } => "NotFound",
                RecoveryError::RecordNotFound { .. } => "NotFound",
                RecoveryError::NotApplied { .. } => "NotApplied",
                RecoveryError::StaleRunning { .. } => "StaleRunning",
                RecoveryError::DriftNotAccepted { .. } => "DriftError",
                RecoveryError::CannotResetApplied { .. } => "NotApplied",
                RecoveryError::StateStore(_) => "StateError",
            },
            EngineError::Connection { .. } => "ExecutionError",
            EngineError::ProductionNotConfirmed { .. } => "ConfirmationRequired",
        }
    }

    /// Whether the error is the caller's to fix (bad request, drift, unmet
    /// gates) rather than an execution-time failure.
    pub fn is_user_error(&self) -> bool {
        match self {
            EngineError::Bundle(_) | EngineError::Plan(_) => true,
            EngineError::Lock(LockError::Busy { .. }) => true,
            EngineError::Lock(LockError::QueryFailed { .. }) => false,
            EngineError::StateStore(_) => false,
            EngineError::Execution(_) => false,
            EngineError::Recovery(RecoveryError::StateStore(_)) => false,
            EngineError::Recovery(_) => true,
            EngineError::Connection { .. } => false,
            EngineError::ProductionNotConfirmed { .. } => true,
        }
    }
}
