use std::{
    collections::{BTreeSet, HashMap},
    path::PathBuf,
};

use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection};
use tracing::{debug, warn};

use crate::{
    bundle::{load_bundles, MigrationBundle},
    errors::{EngineError, ExecutionError, RecoveryError},
    executor::{effective_timeout, execute_step, run_verify_script, StepExecution},
    hooks::HookRunner,
    identifier::MigrationId,
    lock::AdvisoryLock,
    plan::{plan_down, plan_up, plan_verify, DownPlanOptions, MigrationPlan, UpPlanOptions},
    recovery::{check_repair, check_reset_failed, check_retry, RetryDecision, RetryOptions},
    state::{MigrationRecord, RecordStatus, StateStore},
    step_log::StepLogSink,
};



/// Asks the operator to confirm execution against a `confirm_prod` profile.
///
/// The engine never touches the terminal itself; interactive surfaces
/// implement this, and non-interactive contexts deny by default so a
/// production run cannot slip through unconfirmed.
pub trait ConfirmationGate {
    fn confirm_production_run(&self, plan: &MigrationPlan) -> bool;
}

/// The non-interactive default: every production confirmation is denied.
pub struct DenyAllConfirmation;

impl ConfirmationGate for DenyAllConfirmation {
    fn confirm_production_run(&self, _plan: &MigrationPlan) -> bool {
        false
    }
}


/// Everything the orchestrator needs to know about its target, resolved
/// from the active profile and global configuration by the caller.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub dsn: String,

    /// Name of the active profile, used in messages.
    pub profile_name: String,

    /// Schema holding `schema_migrations`; validated as a plain identifier
    /// at configuration-resolution time.
    pub schema: String,

    pub migrations_dir: PathBuf,

    /// Advisory lock key shared by all executors of this database.
    pub lock_key: i64,

    pub global_timeout_sec: u32,

    /// Tag whitelist; `None` disables tag filtering.
    pub allow_tags: Option<BTreeSet<String>>,

    /// Actor label recorded in `applied_by`.
    pub applied_by: String,

    /// Whether this profile demands production confirmation.
    pub confirm_prod: bool,
}


#[derive(Clone, Debug, Default)]
pub struct UpRunOptions {
    pub to: Option<MigrationId>,

    pub timeout_sec: Option<u32>,

    pub ignore_tag_filter: bool,

    /// `--confirm-prod` was supplied.
    pub production_confirmed: bool,
}

#[derive(Clone, Debug)]
pub struct DownRunOptions {
    pub to: MigrationId,

    pub timeout_sec: Option<u32>,

    pub production_confirmed: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RetryRunOptions {
    pub accept_checksum: bool,

    pub force: bool,

    pub timeout_sec: Option<u32>,

    pub production_confirmed: bool,
}


/// One line of the `status` report: a migration as seen from both the
/// filesystem and the state table.
#[derive(Clone, Debug)]
pub struct MigrationOverview {
    pub id: MigrationId,

    /// `None` when no record exists yet (the migration is pending on disk).
    pub status: Option<RecordStatus>,

    /// The recorded checksum no longer matches the on-disk fingerprint.
    pub drift: bool,

    /// A record exists but its bundle is gone from disk.
    pub missing_bundle: bool,

    pub applied_at: Option<DateTime<Utc>>,

    pub execution_ms: Option<i64>,

    pub verify_ok: Option<bool>,
}


/// Builds the status report from the union of on-disk bundles and state
/// rows, ordered by id. Purely informational: drift and missing bundles
/// are rendered here, not raised.
pub fn build_overview(
    bundles: &[MigrationBundle],
    records: &[MigrationRecord],
) -> Vec<MigrationOverview> {
    let bundles_by_id: HashMap<&MigrationId, &MigrationBundle> =
        bundles.iter().map(|bundle| (&bundle.id, bundle)).collect();

    let mut overviews: Vec<MigrationOverview> = Vec::with_capacity(bundles.len());

    for record in records {
        let bundle = bundles_by_id.get(&record.id).copied();

        let drift = bundle
            .map(|bundle| record.checksum != bundle.fingerprint.to_hex())
            .unwrap_or(false);

        overviews.push(MigrationOverview {
            id: record.id.clone(),
            status: Some(record.status),
            drift,
            missing_bundle: bundle.is_none(),
            applied_at: record.applied_at,
            execution_ms: record.execution_ms,
            verify_ok: record.verify_ok,
        });
    }

    let recorded_ids: std::collections::HashSet<&MigrationId> =
        records.iter().map(|record| &record.id).collect();

    for bundle in bundles {
        if recorded_ids.contains(&bundle.id) {
            continue;
        }

        overviews.push(MigrationOverview {
            id: bundle.id.clone(),
            status: None,
            drift: false,
            missing_bundle: false,
            applied_at: None,
            execution_ms: None,
            verify_ok: None,
        });
    }

    overviews.sort_unstable_by(|first, second| first.id.cmp(&second.id));

    overviews
}


/// Cancels the orchestrator's in-flight statement from another session.
///
/// Signal handlers hold one of these: on interruption they connect
/// separately and ask the server to cancel whatever the engine's backend
/// is executing. The cancelled statement then errors out through the
/// executor's normal failure path, which records the `failed` row and
/// releases the lock.
#[derive(Clone, Debug)]
pub struct CancellationHandle {
    dsn: String,

    backend_pid: i32,
}

impl CancellationHandle {
    pub async fn cancel_in_flight_statement(&self) -> Result<(), sqlx::Error> {
        let mut cancel_connection = PgConnection::connect(&self.dsn).await?;

        sqlx::query("SELECT pg_cancel_backend($1)")
            .bind(self.backend_pid)
            .execute(&mut cancel_connection)
            .await?;

        cancel_connection.close().await?;

        Ok(())
    }
}



/// The top-level driver: the only component that touches every other one.
///
/// Owns the single database session for its entire lifetime. Mutating
/// operations take the advisory lock for the whole run (plan plus every
/// step) and release it on every exit path; `status` and `plan` previews
/// read without it.
pub struct MigrationOrchestrator<'a> {
    config: OrchestratorConfig,

    bundles: Vec<MigrationBundle>,

    store: StateStore,

    lock: AdvisoryLock,

    connection: PgConnection,

    backend_pid: i32,

    hook_runner: &'a dyn HookRunner,

    log_sink: &'a dyn StepLogSink,

    confirmation: &'a dyn ConfirmationGate,
}

impl<'a> MigrationOrchestrator<'a> {
    /// Loads the bundles and establishes the engine's database session.
    pub async fn initialize(
        config: OrchestratorConfig,
        hook_runner: &'a dyn HookRunner,
        log_sink: &'a dyn StepLogSink,
        confirmation: &'a dyn ConfirmationGate,
    ) -> Result<MigrationOrchestrator<'a>, EngineError> {
        let bundles = load_bundles(&config.migrations_dir)?;

        debug!(
            bundle_count = bundles.len(),
            migrations_dir = %config.migrations_dir.display(),
            "Loaded migration bundles."
        );

        let mut connection = PgConnection::connect(&config.dsn)
            .await
            .map_err(|error| EngineError::Connection { error })?;

        let backend_pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut connection)
            .await
            .map_err(|error| EngineError::Connection { error })?;

        let store = StateStore::new(config.schema.clone());
        let lock = AdvisoryLock::new(config.lock_key);

        Ok(Self {
            config,
            bundles,
            store,
            lock,
            connection,
            backend_pid,
            hook_runner,
            log_sink,
            confirmation,
        })
    }

    pub fn bundles(&self) -> &[MigrationBundle] {
        &self.bundles
    }

    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle {
            dsn: self.config.dsn.clone(),
            backend_pid: self.backend_pid,
        }
    }

    /// Closes the engine's database session, releasing any advisory lock
    /// the server still associates with it.
    pub async fn close(self) -> Result<(), sqlx::Error> {
        self.connection.close().await
    }


    async fn release_lock_best_effort(&mut self) {
        if let Err(release_error) = self.lock.release(&mut self.connection).await {
            warn!(
                error = %release_error,
                "Failed to release advisory lock; the server frees it on session teardown."
            );
        }
    }

    fn require_production_confirmation(
        &self,
        plan: &MigrationPlan,
        confirmed_via_flag: bool,
    ) -> Result<(), EngineError> {
        if !self.config.confirm_prod || confirmed_via_flag {
            return Ok(());
        }

        if self.confirmation.confirm_production_run(plan) {
            return Ok(());
        }

        Err(EngineError::ProductionNotConfirmed {
            profile_name: self.config.profile_name.clone(),
        })
    }

    async fn load_records(&mut self) -> Result<Vec<MigrationRecord>, EngineError> {
        self.store.ensure_table(&mut self.connection).await?;

        Ok(self.store.list(&mut self.connection).await?)
    }

    /// Executes every step of a plan in order, halting on the first error.
    /// Each record write commits before the next step begins, so a
    /// concurrent reader of `schema_migrations` sees a prefix of the plan
    /// plus at most one `running` row.
    async fn execute_plan(
        &mut self,
        plan: &MigrationPlan,
        cli_timeout_sec: Option<u32>,
    ) -> Result<Vec<MigrationId>, EngineError> {
        let mut completed_ids = Vec::with_capacity(plan.len());

        for step in &plan.steps {
            // PANIC SAFETY: Planners only emit ids of loaded bundles.
            let bundle = self
                .bundles
                .iter()
                .find(|bundle| bundle.id == step.id)
                .expect("planned step refers to a loaded bundle");

            let timeout = effective_timeout(
                bundle.timeout_sec(),
                cli_timeout_sec,
                self.config.global_timeout_sec,
            );

            let step_log = self.log_sink.open_step_log(&step.id).map_err(|error| {
                ExecutionError::LogStreamFailed {
                    id: step.id.clone(),
                    error,
                }
            })?;

            execute_step(
                &mut self.connection,
                &self.store,
                self.hook_runner,
                step_log,
                StepExecution {
                    bundle,
                    direction: step.direction,
                    timeout,
                    applied_by: &self.config.applied_by,
                },
            )
            .await?;

            completed_ids.push(step.id.clone());
        }

        Ok(completed_ids)
    }


    /// The `status` report; reads state without taking the lock.
    pub async fn status(&mut self) -> Result<Vec<MigrationOverview>, EngineError> {
        let records = self.load_records().await?;

        Ok(build_overview(&self.bundles, &records))
    }

    /// Computes the forward plan without executing anything.
    pub async fn preview_up_plan(
        &mut self,
        to: Option<&MigrationId>,
        ignore_tag_filter: bool,
    ) -> Result<MigrationPlan, EngineError> {
        let records = self.load_records().await?;

        Ok(plan_up(
            &self.bundles,
            &records,
            UpPlanOptions {
                to,
                allow_tags: self.config.allow_tags.as_ref(),
                ignore_tag_filter,
                accept_checksum: false,
                force: false,
            },
        )?)
    }


    /// Computes the rollback plan without executing anything.
    pub async fn preview_down_plan(
        &mut self,
        to: &MigrationId,
    ) -> Result<MigrationPlan, EngineError> {
        let records = self.load_records().await?;

        Ok(plan_down(
            &self.bundles,
            &records,
            to,
            DownPlanOptions {
                allow_tags: self.config.allow_tags.as_ref(),
                ignore_tag_filter: false,
            },
        )?)
    }


    /// Applies pending migrations, in order, up to the optional target.
    pub async fn up(&mut self, options: UpRunOptions) -> Result<Vec<MigrationId>, EngineError> {
        self.lock.acquire(&mut self.connection).await?;

        let run_result = self.up_locked(options).await;

        self.release_lock_best_effort().await;

        run_result
    }

    async fn up_locked(
        &mut self,
        options: UpRunOptions,
    ) -> Result<Vec<MigrationId>, EngineError> {
        let records = self.load_records().await?;

        let plan = plan_up(
            &self.bundles,
            &records,
            UpPlanOptions {
                to: options.to.as_ref(),
                allow_tags: self.config.allow_tags.as_ref(),
                ignore_tag_filter: options.ignore_tag_filter,
                accept_checksum: false,
                force: false,
            },
        )?;

        if plan.is_empty() {
            return Ok(Vec::new());
        }

        self.require_production_confirmation(&plan, options.production_confirmed)?;

        self.execute_plan(&plan, options.timeout_sec).await
    }


    /// Rolls back applied migrations with id above the target, in
    /// descending order.
    pub async fn down(&mut self, options: DownRunOptions) -> Result<Vec<MigrationId>, EngineError> {
        self.lock.acquire(&mut self.connection).await?;

        let run_result = self.down_locked(options).await;

        self.release_lock_best_effort().await;

        run_result
    }

    async fn down_locked(
        &mut self,
        options: DownRunOptions,
    ) -> Result<Vec<MigrationId>, EngineError> {
        let records = self.load_records().await?;

        let plan = plan_down(
            &self.bundles,
            &records,
            &options.to,
            DownPlanOptions {
                allow_tags: self.config.allow_tags.as_ref(),
                ignore_tag_filter: false,
            },
        )?;

        if plan.is_empty() {
            return Ok(Vec::new());
        }

        self.require_production_confirmation(&plan, options.production_confirmed)?;

        self.execute_plan(&plan, options.timeout_sec).await
    }


    /// Re-runs `verify.sql` for every applied migration that has one,
    /// recording each outcome. Verification failures are collected rather
    /// than aborting, so one bad verification does not hide the rest.
    pub async fn verify(&mut self) -> Result<Vec<(MigrationId, bool)>, EngineError> {
        self.lock.acquire(&mut self.connection).await?;

        let run_result = self.verify_locked().await;

        self.release_lock_best_effort().await;

        run_result
    }

    async fn verify_locked(&mut self) -> Result<Vec<(MigrationId, bool)>, EngineError> {
        let records = self.load_records().await?;

        let verifiable_ids = plan_verify(&self.bundles, &records)?;

        let mut outcomes = Vec::with_capacity(verifiable_ids.len());

        for id in verifiable_ids {
            // PANIC SAFETY: plan_verify only returns ids of loaded bundles
            // that carry a verify script.
            let bundle = self
                .bundles
                .iter()
                .find(|bundle| bundle.id == id)
                .expect("verifiable id refers to a loaded bundle");
            let verify_script = bundle
                .verify_script
                .as_deref()
                .expect("verifiable bundle has a verify script");

            let timeout = effective_timeout(
                bundle.timeout_sec(),
                None,
                self.config.global_timeout_sec,
            );

            match run_verify_script(
                &mut self.connection,
                &self.store,
                &id,
                verify_script,
                timeout,
            )
            .await
            {
                Ok(()) => outcomes.push((id, true)),
                Err(ExecutionError::VerifyFailed { .. }) => outcomes.push((id, false)),
                Err(other_error) => return Err(other_error.into()),
            }
        }

        Ok(outcomes)
    }


    /// `repair --accept-checksum`: rewrites the recorded checksum to the
    /// current on-disk fingerprint. Requires an `applied` record; has no
    /// SQL side effects beyond the state table. Idempotent.
    pub async fn repair(&mut self, id: &MigrationId) -> Result<(), EngineError> {
        self.lock.acquire(&mut self.connection).await?;

        let run_result = self.repair_locked(id).await;

        self.release_lock_best_effort().await;

        run_result
    }

    async fn repair_locked(&mut self, id: &MigrationId) -> Result<(), EngineError> {
        let disk_checksum = self
            .bundles
            .iter()
            .find(|bundle| &bundle.id == id)
            .map(|bundle| bundle.fingerprint.to_hex())
            .ok_or_else(|| RecoveryError::BundleNotFound { id: id.clone() })?;

        self.store.ensure_table(&mut self.connection).await?;

        let record = self.store.get(&mut self.connection, id).await?;

        check_repair(id, record.as_ref())?;

        self.store
            .set_checksum(&mut self.connection, id, &disk_checksum)
            .await?;

        Ok(())
    }


    /// `retry`: recycles a failed (or, with `--force`, stale running)
    /// record and re-executes `up` sequentially through and including the
    /// given migration.
    pub async fn retry(
        &mut self,
        id: &MigrationId,
        options: RetryRunOptions,
    ) -> Result<Vec<MigrationId>, EngineError> {
        self.lock.acquire(&mut self.connection).await?;

        let run_result = self.retry_locked(id, options).await;

        self.release_lock_best_effort().await;

        run_result
    }

    async fn retry_locked(
        &mut self,
        id: &MigrationId,
        options: RetryRunOptions,
    ) -> Result<Vec<MigrationId>, EngineError> {
        self.store.ensure_table(&mut self.connection).await?;

        let record = self.store.get(&mut self.connection, id).await?;

        let bundle = self.bundles.iter().find(|bundle| &bundle.id == id);

        let decision = check_retry(
            id,
            bundle,
            record.as_ref(),
            RetryOptions {
                accept_checksum: options.accept_checksum,
                force: options.force,
            },
        )?;

        let needs_checksum_repair = match decision {
            RetryDecision::AlreadyApplied => return Ok(Vec::new()),
            RetryDecision::Proceed {
                needs_checksum_repair,
            } => needs_checksum_repair,
        };

        if needs_checksum_repair {
            // PANIC SAFETY: check_retry fails earlier when the bundle is absent.
            let disk_checksum = bundle
                .map(|bundle| bundle.fingerprint.to_hex())
                .expect("retry gate verified the bundle exists");

            self.store
                .set_checksum(&mut self.connection, id, &disk_checksum)
                .await?;
        }

        if record.is_some() {
            self.store.reset_to_reverted(&mut self.connection, id).await?;
        }

        let records = self.store.list(&mut self.connection).await?;

        let plan = plan_up(
            &self.bundles,
            &records,
            UpPlanOptions {
                to: Some(id),
                allow_tags: self.config.allow_tags.as_ref(),
                ignore_tag_filter: false,
                accept_checksum: options.accept_checksum,
                force: options.force,
            },
        )?;

        if plan.is_empty() {
            return Ok(Vec::new());
        }

        self.require_production_confirmation(&plan, options.production_confirmed)?;

        self.execute_plan(&plan, options.timeout_sec).await
    }


    /// `reset-failed`: recycles a non-applied record without running any
    /// SQL. By default the record becomes `reverted` with its execution
    /// fields cleared; with `delete` the row is removed entirely, which is
    /// also the only way out for a record whose bundle left the disk.
    pub async fn reset_failed(
        &mut self,
        id: &MigrationId,
        delete: bool,
    ) -> Result<(), EngineError> {
        self.lock.acquire(&mut self.connection).await?;

        let run_result = self.reset_failed_locked(id, delete).await;

        self.release_lock_best_effort().await;

        run_result
    }

    async fn reset_failed_locked(
        &mut self,
        id: &MigrationId,
        delete: bool,
    ) -> Result<(), EngineError> {
        self.store.ensure_table(&mut self.connection).await?;

        let record = self.store.get(&mut self.connection, id).await?;

        check_reset_failed(id, record.as_ref())?;

        if delete {
            self.store.delete(&mut self.connection, id).await?;
        } else {
            self.store.reset_to_reverted(&mut self.connection, id).await?;
        }

        Ok(())
    }
}



#[cfg(test)]
mod test {
    use super::*;
    use crate::{bundle::metadata::BundleMetadata, fingerprint::Fingerprint};

    fn test_bundle(id: &str) -> MigrationBundle {
        let up_script = "SELECT 1;\n".to_string();
        let down_script = String::new();
        let fingerprint = Fingerprint::calculate(&up_script, &down_script);

        MigrationBundle {
            id: MigrationId::parse_from_str(id).unwrap(),
            up_script,
            down_script,
            verify_script: None,
            metadata: BundleMetadata::default(),
            fingerprint,
        }
    }

    fn test_record(bundle: &MigrationBundle, status: RecordStatus) -> MigrationRecord {
        MigrationRecord {
            id: bundle.id.clone(),
            checksum: bundle.fingerprint.to_hex(),
            status,
            applied_at: None,
            applied_by: None,
            execution_ms: None,
            verify_ok: None,
            log_ref: None,
        }
    }

    #[test]
    fn overview_merges_disk_and_database_views() {
        let applied = test_bundle("2025-01-01T10-00-00__first");
        let pending = test_bundle("2025-01-02T10-00-00__second");
        let gone = test_bundle("2025-01-03T10-00-00__third");

        let mut drifted_record = test_record(&applied, RecordStatus::Applied);
        drifted_record.checksum = Fingerprint::calculate("edited", "").to_hex();

        let records = vec![
            drifted_record,
            test_record(&gone, RecordStatus::Applied),
        ];
        let bundles = vec![applied, pending];

        let overviews = build_overview(&bundles, &records);

        assert_eq!(overviews.len(), 3);

        assert_eq!(overviews[0].status, Some(RecordStatus::Applied));
        assert!(overviews[0].drift);
        assert!(!overviews[0].missing_bundle);

        assert_eq!(overviews[1].status, None);
        assert!(!overviews[1].drift);

        assert_eq!(overviews[2].status, Some(RecordStatus::Applied));
        assert!(overviews[2].missing_bundle);
    }
}
