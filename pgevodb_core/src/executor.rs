use std::{
    io::Write,
    time::{Duration, Instant},
};

use chrono::Utc;
use sqlx::{Connection, Executor, PgConnection};
use tracing::warn;

use crate::{
    bundle::MigrationBundle,
    errors::ExecutionError,
    hooks::HookRunner,
    identifier::MigrationId,
    plan::StepDirection,
    state::{RecordStatus, RecordUpsert, StateStore},
    step_log::StepLog,
};



/// Resolves the statement timeout for one step: the bundle's own
/// `timeout_sec` wins, then the CLI override, then the global default.
pub fn effective_timeout(
    bundle_timeout_sec: Option<u32>,
    cli_timeout_sec: Option<u32>,
    global_timeout_sec: u32,
) -> Duration {
    let seconds = bundle_timeout_sec
        .or(cli_timeout_sec)
        .unwrap_or(global_timeout_sec);

    Duration::from_secs(u64::from(seconds))
}


/// Everything the executor needs to run one plan step.
pub struct StepExecution<'a> {
    pub bundle: &'a MigrationBundle,

    pub direction: StepDirection,

    pub timeout: Duration,

    /// Actor label recorded in `applied_by` (e.g. `user@host`).
    pub applied_by: &'a str,
}


fn write_marker(log_stream: &mut dyn Write, message: &str) {
    // The log stream is advisory; a broken sink must not fail the step.
    let _ = writeln!(
        log_stream,
        "[{}] {}",
        Utc::now().to_rfc3339(),
        message
    );
}


/// Runs a script inside its own transaction with `SET LOCAL
/// statement_timeout` applied first. The script runs over the simple query
/// protocol, so multi-statement files execute as written.
async fn run_script_in_transaction(
    database_connection: &mut PgConnection,
    id: &MigrationId,
    script: &str,
    timeout: Duration,
) -> Result<(), ExecutionError> {
    let mut transaction = database_connection
        .begin()
        .await
        .map_err(|error| ExecutionError::TransactionFailed { error })?;

    let timeout_statement = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());

    (&mut *transaction)
        .execute(timeout_statement.as_str())
        .await
        .map_err(|error| ExecutionError::TransactionFailed { error })?;

    if let Err(error) = (&mut *transaction).execute(script).await {
        // The server already aborted the transaction; the rollback just
        // returns the session to a clean state before the failed-row write.
        let _ = transaction.rollback().await;

        return Err(ExecutionError::ScriptFailed {
            id: id.clone(),
            error,
        });
    }

    transaction
        .commit()
        .await
        .map_err(|error| ExecutionError::TransactionFailed { error })?;

    Ok(())
}


/// Runs a bundle's `verify.sql` in its own transaction and records the
/// outcome in `verify_ok`. A database error during verification does not
/// roll the migration back; it surfaces as
/// [`ExecutionError::VerifyFailed`] after the `verify_ok = false` write.
pub async fn run_verify_script(
    database_connection: &mut PgConnection,
    store: &StateStore,
    id: &MigrationId,
    verify_script: &str,
    timeout: Duration,
) -> Result<(), ExecutionError> {
    let mut transaction = database_connection
        .begin()
        .await
        .map_err(|error| ExecutionError::TransactionFailed { error })?;

    let timeout_statement = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());

    (&mut *transaction)
        .execute(timeout_statement.as_str())
        .await
        .map_err(|error| ExecutionError::TransactionFailed { error })?;

    match (&mut *transaction).execute(verify_script).await {
        Ok(_) => {
            transaction
                .commit()
                .await
                .map_err(|error| ExecutionError::TransactionFailed { error })?;

            store.set_verify(database_connection, id, true).await?;

            Ok(())
        }
        Err(error) => {
            let _ = transaction.rollback().await;

            store.set_verify(database_connection, id, false).await?;

            Err(ExecutionError::VerifyFailed {
                id: id.clone(),
                error,
            })
        }
    }
}


/// Executes a single plan step against the database.
///
/// The step's state machine, with each state write committed in its own
/// transaction disjoint from the script's:
///
/// 1. pre-hooks (a failure aborts with no record change),
/// 2. record transitions to `running` with the on-disk checksum and the
///    step's `log_ref`,
/// 3. the up (or down) script runs in a single transaction under the
///    effective statement timeout,
/// 4. record transitions to `applied` (or `reverted` with execution fields
///    cleared),
/// 5. post-hooks (failures are logged and change nothing),
/// 6. `verify.sql`, if present, runs in its own transaction and records
///    `verify_ok`.
///
/// On a script error the record is marked `failed` in a separate,
/// best-effort transaction and the error surfaces to the caller.
pub async fn execute_step(
    database_connection: &mut PgConnection,
    store: &StateStore,
    hook_runner: &dyn HookRunner,
    step_log: StepLog,
    execution: StepExecution<'_>,
) -> Result<(), ExecutionError> {
    let bundle = execution.bundle;
    let mut log_stream = step_log.stream;

    let direction_name = match execution.direction {
        StepDirection::Up => "up",
        StepDirection::Down => "down",
    };


    for hook_command in &bundle.metadata.pre_hooks {
        if let Err(error) = hook_runner.run_hook(hook_command) {
            write_marker(
                log_stream.as_mut(),
                &format!("pre-hook failed, aborting step: {}", hook_command),
            );

            return Err(ExecutionError::PreHookFailed {
                id: bundle.id.clone(),
                error,
            });
        }
    }


    let disk_checksum = bundle.fingerprint.to_hex();

    store
        .upsert_status(
            database_connection,
            &bundle.id,
            RecordStatus::Running,
            RecordUpsert {
                checksum: Some(&disk_checksum),
                log_ref: Some(&step_log.reference),
                ..Default::default()
            },
        )
        .await?;


    let script = match execution.direction {
        StepDirection::Up => &bundle.up_script,
        StepDirection::Down => &bundle.down_script,
    };

    write_marker(
        log_stream.as_mut(),
        &format!(
            "executing {} script for {} (statement timeout {} ms)",
            direction_name,
            bundle.id,
            execution.timeout.as_millis()
        ),
    );

    let started_at = Instant::now();

    if let Err(script_error) = run_script_in_transaction(
        database_connection,
        &bundle.id,
        script,
        execution.timeout,
    )
    .await
    {
        let failed_after_ms = (started_at.elapsed().as_millis() as i64).max(1);

        // Best-effort: the step already failed and that error is the one
        // that must surface, even if this bookkeeping write fails too.
        if let Err(state_error) = store
            .upsert_status(
                database_connection,
                &bundle.id,
                RecordStatus::Failed,
                RecordUpsert {
                    execution_ms: Some(failed_after_ms),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(
                migration_id = %bundle.id,
                error = %state_error,
                "Unable to record failed status after a script error."
            );
        }

        write_marker(
            log_stream.as_mut(),
            &format!(
                "{} script for {} failed after {} ms",
                direction_name, bundle.id, failed_after_ms
            ),
        );
        let _ = log_stream.flush();

        return Err(script_error);
    }

    // Sub-millisecond scripts still record 1 ms.
    let execution_ms = (started_at.elapsed().as_millis() as i64).max(1);


    match execution.direction {
        StepDirection::Up => {
            store
                .upsert_status(
                    database_connection,
                    &bundle.id,
                    RecordStatus::Applied,
                    RecordUpsert {
                        applied_at: Some(Utc::now()),
                        applied_by: Some(execution.applied_by),
                        execution_ms: Some(execution_ms),
                        ..Default::default()
                    },
                )
                .await?;
        }
        StepDirection::Down => {
            store
                .reset_to_reverted(database_connection, &bundle.id)
                .await?;
        }
    }

    write_marker(
        log_stream.as_mut(),
        &format!(
            "{} script for {} committed in {} ms",
            direction_name, bundle.id, execution_ms
        ),
    );


    for hook_command in &bundle.metadata.post_hooks {
        if let Err(hook_error) = hook_runner.run_hook(hook_command) {
            warn!(
                migration_id = %bundle.id,
                error = %hook_error,
                "Post-hook failed; migration state is unaffected."
            );

            write_marker(
                log_stream.as_mut(),
                &format!("post-hook failed (state unaffected): {}", hook_command),
            );
        }
    }


    if execution.direction == StepDirection::Up {
        if let Some(verify_script) = bundle.verify_script.as_deref() {
            write_marker(
                log_stream.as_mut(),
                &format!("running verify script for {}", bundle.id),
            );

            let verify_result = run_verify_script(
                database_connection,
                store,
                &bundle.id,
                verify_script,
                execution.timeout,
            )
            .await;

            if let Err(verify_error) = verify_result {
                write_marker(
                    log_stream.as_mut(),
                    &format!("verify script for {} failed", bundle.id),
                );
                let _ = log_stream.flush();

                return Err(verify_error);
            }
        }
    }


    write_marker(log_stream.as_mut(), &format!("step for {} done", bundle.id));
    let _ = log_stream.flush();

    Ok(())
}



#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bundle_timeout_takes_precedence() {
        assert_eq!(
            effective_timeout(Some(30), Some(60), 600),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn cli_timeout_overrides_the_global_default() {
        assert_eq!(
            effective_timeout(None, Some(60), 600),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn global_timeout_is_the_fallback() {
        assert_eq!(
            effective_timeout(None, None, 600),
            Duration::from_secs(600)
        );
    }
}
