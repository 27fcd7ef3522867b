use crate::{
    bundle::MigrationBundle,
    errors::RecoveryError,
    identifier::MigrationId,
    state::{MigrationRecord, RecordStatus},
};



/// Caller-supplied switches for `retry`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryOptions {
    /// Adopt the on-disk fingerprint when it drifted from the recorded one.
    pub accept_checksum: bool,

    /// Recycle a stale `running` record.
    pub force: bool,
}


/// What `retry` should do once its gates pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// The migration is already applied; retry is a no-op success.
    AlreadyApplied,

    /// Reset the record and re-execute up through the migration.
    Proceed {
        /// The recorded checksum drifted and `--accept-checksum` was
        /// given, so the checksum is rewritten before the reset.
        needs_checksum_repair: bool,
    },
}


/// `repair` gate: the record must exist and be `applied`.
pub(crate) fn check_repair(
    id: &MigrationId,
    record: Option<&MigrationRecord>,
) -> Result<(), RecoveryError> {
    let Some(record) = record else {
        return Err(RecoveryError::RecordNotFound { id: id.clone() });
    };

    if record.status != RecordStatus::Applied {
        return Err(RecoveryError::NotApplied {
            id: id.clone(),
            status: record.status,
        });
    }

    Ok(())
}


/// `retry` gates, in spec order: the bundle must exist locally, an applied
/// record short-circuits to success, a stale `running` record needs
/// `--force`, and checksum drift needs `--accept-checksum`.
pub(crate) fn check_retry(
    id: &MigrationId,
    bundle: Option<&MigrationBundle>,
    record: Option<&MigrationRecord>,
    options: RetryOptions,
) -> Result<RetryDecision, RecoveryError> {
    let Some(bundle) = bundle else {
        return Err(RecoveryError::BundleNotFound { id: id.clone() });
    };

    let Some(record) = record else {
        // Never attempted; there is nothing to reset, just re-plan.
        return Ok(RetryDecision::Proceed {
            needs_checksum_repair: false,
        });
    };

    if record.status == RecordStatus::Applied {
        return Ok(RetryDecision::AlreadyApplied);
    }

    if record.status == RecordStatus::Running && !options.force {
        return Err(RecoveryError::StaleRunning { id: id.clone() });
    }

    let drifted = record.checksum != bundle.fingerprint.to_hex();

    if drifted && !options.accept_checksum {
        return Err(RecoveryError::DriftNotAccepted { id: id.clone() });
    }

    Ok(RetryDecision::Proceed {
        needs_checksum_repair: drifted,
    })
}


/// `reset-failed` gate: the record must exist and must not be `applied`;
/// this operation never transitions a record away from `applied`.
pub(crate) fn check_reset_failed(
    id: &MigrationId,
    record: Option<&MigrationRecord>,
) -> Result<(), RecoveryError> {
    let Some(record) = record else {
        return Err(RecoveryError::RecordNotFound { id: id.clone() });
    };

    if record.status == RecordStatus::Applied {
        return Err(RecoveryError::CannotResetApplied { id: id.clone() });
    }

    Ok(())
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

    const ID: &str = "2025-01-01T10-00-00__example";


    #[test]
    fn repair_requires_an_applied_record() {
        let bundle = test_bundle(ID);

        assert!(matches!(
            check_repair(&bundle.id, None),
            Err(RecoveryError::RecordNotFound { .. })
        ));

        let failed_record = test_record(&bundle, RecordStatus::Failed);
        assert!(matches!(
            check_repair(&bundle.id, Some(&failed_record)),
            Err(RecoveryError::NotApplied { .. })
        ));

        let applied_record = test_record(&bundle, RecordStatus::Applied);
        assert!(check_repair(&bundle.id, Some(&applied_record)).is_ok());
    }

    #[test]
    fn retry_requires_the_bundle_to_exist() {
        let id = MigrationId::parse_from_str(ID).unwrap();

        assert!(matches!(
            check_retry(&id, None, None, RetryOptions::default()),
            Err(RecoveryError::BundleNotFound { .. })
        ));
    }

    #[test]
    fn retry_of_an_applied_record_is_a_no_op() {
        let bundle = test_bundle(ID);
        let record = test_record(&bundle, RecordStatus::Applied);

        assert_eq!(
            check_retry(
                &bundle.id,
                Some(&bundle),
                Some(&record),
                RetryOptions::default()
            )
            .unwrap(),
            RetryDecision::AlreadyApplied
        );
    }

    #[test]
    fn retry_of_a_running_record_needs_force() {
        let bundle = test_bundle(ID);
        let record = test_record(&bundle, RecordStatus::Running);

        assert!(matches!(
            check_retry(
                &bundle.id,
                Some(&bundle),
                Some(&record),
                RetryOptions::default()
            ),
            Err(RecoveryError::StaleRunning { .. })
        ));

        assert_eq!(
            check_retry(
                &bundle.id,
                Some(&bundle),
                Some(&record),
                RetryOptions {
                    force: true,
                    ..Default::default()
                }
            )
            .unwrap(),
            RetryDecision::Proceed {
                needs_checksum_repair: false
            }
        );
    }

    #[test]
    fn retry_of_a_drifted_record_needs_accept_checksum() {
        let bundle = test_bundle(ID);
        let mut record = test_record(&bundle, RecordStatus::Failed);
        record.checksum = Fingerprint::calculate("edited", "").to_hex();

        assert!(matches!(
            check_retry(
                &bundle.id,
                Some(&bundle),
                Some(&record),
                RetryOptions::default()
            ),
            Err(RecoveryError::DriftNotAccepted { .. })
        ));

        assert_eq!(
            check_retry(
                &bundle.id,
                Some(&bundle),
                Some(&record),
                RetryOptions {
                    accept_checksum: true,
                    ..Default::default()
                }
            )
            .unwrap(),
            RetryDecision::Proceed {
                needs_checksum_repair: true
            }
        );
    }

    #[test]
    fn retry_without_a_record_plans_from_scratch() {
        let bundle = test_bundle(ID);

        assert_eq!(
            check_retry(&bundle.id, Some(&bundle), None, RetryOptions::default()).unwrap(),
            RetryDecision::Proceed {
                needs_checksum_repair: false
            }
        );
    }

    #[test]
    fn reset_failed_never_touches_applied_records() {
        let bundle = test_bundle(ID);

        let applied_record = test_record(&bundle, RecordStatus::Applied);
        assert!(matches!(
            check_reset_failed(&bundle.id, Some(&applied_record)),
            Err(RecoveryError::CannotResetApplied { .. })
        ));

        let failed_record = test_record(&bundle, RecordStatus::Failed);
        assert!(check_reset_failed(&bundle.id, Some(&failed_record)).is_ok());

        assert!(matches!(
            check_reset_failed(&bundle.id, None),
            Err(RecoveryError::RecordNotFound { .. })
        ));
    }
}
