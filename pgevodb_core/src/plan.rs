use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{
    bundle::MigrationBundle,
    errors::PlanError,
    identifier::MigrationId,
    state::{MigrationRecord, RecordStatus},
};



#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepDirection {
    Up,
    Down,
}

/// A single planned execution: one migration, one direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanStep {
    pub id: MigrationId,

    pub direction: StepDirection,
}

/// An ordered sequence of steps the engine intends to execute.
///
/// Plans are computed purely from the loaded bundles and the current state
/// rows, so the same inputs always produce the same plan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    pub steps: Vec<PlanStep>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}


#[derive(Clone, Copy, Debug, Default)]
pub struct UpPlanOptions<'a> {
    /// Upper bound (inclusive) on planned ids; `None` plans everything.
    pub to: Option<&'a MigrationId>,

    /// The configured tag whitelist; `None` disables tag filtering.
    pub allow_tags: Option<&'a BTreeSet<String>>,

    /// Skip the tag filter for this invocation.
    pub ignore_tag_filter: bool,

    /// Tolerate checksum drift. Only `repair` and `retry` may set this.
    pub accept_checksum: bool,

    /// Treat a stale `running` record as re-executable (`retry --force`).
    pub force: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DownPlanOptions<'a> {
    pub allow_tags: Option<&'a BTreeSet<String>>,

    pub ignore_tag_filter: bool,
}


/// Every recorded id must still exist on disk; a record whose bundle is
/// gone blocks all further work until the operator resolves it
/// (`reset-failed --delete` being the only escape hatch).
fn ensure_records_have_bundles(
    bundles: &[MigrationBundle],
    records: &[MigrationRecord],
) -> Result<(), PlanError> {
    let bundle_ids: HashSet<&MigrationId> = bundles.iter().map(|bundle| &bundle.id).collect();

    for record in records {
        if !bundle_ids.contains(&record.id) {
            return Err(PlanError::MissingBundle {
                id: record.id.clone(),
            });
        }
    }

    Ok(())
}

fn record_matches_disk(record: &MigrationRecord, bundle: &MigrationBundle) -> bool {
    record.checksum == bundle.fingerprint.to_hex()
}

fn check_tag_filter(
    bundle: &MigrationBundle,
    allow_tags: Option<&BTreeSet<String>>,
    ignore_tag_filter: bool,
) -> Result<(), PlanError> {
    if ignore_tag_filter {
        return Ok(());
    }

    let Some(allow_tags) = allow_tags else {
        return Ok(());
    };

    if bundle.metadata.tags.is_disjoint(allow_tags) {
        return Err(PlanError::TagBlocked {
            id: bundle.id.clone(),
            tags: bundle.metadata.tags.clone(),
        });
    }

    Ok(())
}


/// Computes the forward plan: every bundle with status in
/// {absent, pending, reverted} and id within the target bound, in strict
/// ascending id order.
///
/// Classification happens for *all* bundles before the bound is applied:
/// drift, a stale `running` row, or a `failed` row anywhere block the plan
/// (spec'd recovery operations are the way out).
pub fn plan_up(
    bundles: &[MigrationBundle],
    records: &[MigrationRecord],
    options: UpPlanOptions<'_>,
) -> Result<MigrationPlan, PlanError> {
    ensure_records_have_bundles(bundles, records)?;

    if let Some(target_id) = options.to {
        if !bundles.iter().any(|bundle| &bundle.id == target_id) {
            return Err(PlanError::UnknownTarget {
                id: target_id.clone(),
            });
        }
    }

    let records_by_id: HashMap<&MigrationId, &MigrationRecord> =
        records.iter().map(|record| (&record.id, record)).collect();

    let mut sorted_bundles: Vec<&MigrationBundle> = bundles.iter().collect();
    sorted_bundles.sort_unstable_by(|first, second| first.id.cmp(&second.id));


    let mut planned_ids: HashSet<&MigrationId> = HashSet::new();
    let mut steps = Vec::new();

    for bundle in sorted_bundles {
        if let Some(record) = records_by_id.get(&bundle.id).copied() {
            match record.status {
                RecordStatus::Applied => {
                    if !record_matches_disk(record, bundle) && !options.accept_checksum {
                        return Err(PlanError::Drift {
                            id: bundle.id.clone(),
                            recorded_checksum: record.checksum.clone(),
                            disk_fingerprint: bundle.fingerprint.clone(),
                        });
                    }

                    continue;
                }
                RecordStatus::Running => {
                    if !options.force {
                        return Err(PlanError::StaleRunning {
                            id: bundle.id.clone(),
                        });
                    }
                }
                RecordStatus::Failed => {
                    return Err(PlanError::FailedRecord {
                        id: bundle.id.clone(),
                    });
                }
                RecordStatus::Pending | RecordStatus::Reverted => {}
            }
        }

        if let Some(target_id) = options.to {
            if &bundle.id > target_id {
                continue;
            }
        }

        for required_id in &bundle.metadata.requires {
            let required_is_applied = records_by_id
                .get(required_id)
                .map(|record| record.status == RecordStatus::Applied)
                .unwrap_or(false);

            if !required_is_applied && !planned_ids.contains(required_id) {
                return Err(PlanError::Dependency {
                    id: bundle.id.clone(),
                    requires: required_id.clone(),
                });
            }
        }

        check_tag_filter(bundle, options.allow_tags, options.ignore_tag_filter)?;

        planned_ids.insert(&bundle.id);
        steps.push(PlanStep {
            id: bundle.id.clone(),
            direction: StepDirection::Up,
        });
    }

    Ok(MigrationPlan { steps })
}


/// Computes the rollback plan: applied records with id strictly above the
/// target, in strict descending id order. The target itself stays applied.
///
/// An irreversible migration in that range is a hard block with no
/// override, and drifted records must be repaired before they can be
/// rolled back (the on-disk down script is the one that would run).
pub fn plan_down(
    bundles: &[MigrationBundle],
    records: &[MigrationRecord],
    to: &MigrationId,
    options: DownPlanOptions<'_>,
) -> Result<MigrationPlan, PlanError> {
    ensure_records_have_bundles(bundles, records)?;

    let bundles_by_id: HashMap<&MigrationId, &MigrationBundle> =
        bundles.iter().map(|bundle| (&bundle.id, bundle)).collect();

    if let Some(running_record) = records
        .iter()
        .find(|record| record.status == RecordStatus::Running)
    {
        return Err(PlanError::StaleRunning {
            id: running_record.id.clone(),
        });
    }

    let mut applied_above_target: Vec<&MigrationRecord> = records
        .iter()
        .filter(|record| record.status == RecordStatus::Applied && &record.id > to)
        .collect();

    applied_above_target.sort_unstable_by(|first, second| second.id.cmp(&first.id));


    let mut steps = Vec::new();

    for record in applied_above_target {
        // PANIC SAFETY: ensure_records_have_bundles checked every record.
        let bundle = bundles_by_id.get(&record.id).unwrap();

        if !record_matches_disk(record, bundle) {
            return Err(PlanError::Drift {
                id: record.id.clone(),
                recorded_checksum: record.checksum.clone(),
                disk_fingerprint: bundle.fingerprint.clone(),
            });
        }

        if !bundle.metadata.reversible {
            return Err(PlanError::Irreversible {
                id: record.id.clone(),
            });
        }

        check_tag_filter(bundle, options.allow_tags, options.ignore_tag_filter)?;

        steps.push(PlanStep {
            id: record.id.clone(),
            direction: StepDirection::Down,
        });
    }

    Ok(MigrationPlan { steps })
}


/// Applied migrations that carry a `verify.sql`, in ascending id order.
/// This drives the standalone `verify` operation.
pub fn plan_verify(
    bundles: &[MigrationBundle],
    records: &[MigrationRecord],
) -> Result<Vec<MigrationId>, PlanError> {
    ensure_records_have_bundles(bundles, records)?;

    let applied_ids: HashSet<&MigrationId> = records
        .iter()
        .filter(|record| record.status == RecordStatus::Applied)
        .map(|record| &record.id)
        .collect();

    let mut verifiable_ids: Vec<MigrationId> = bundles
        .iter()
        .filter(|bundle| bundle.verify_script.is_some() && applied_ids.contains(&bundle.id))
        .map(|bundle| bundle.id.clone())
        .collect();

    verifiable_ids.sort_unstable();

    Ok(verifiable_ids)
}



#[cfg(test)]
mod test {
    use super::*;
    use crate::{bundle::metadata::BundleMetadata, fingerprint::Fingerprint};

    fn test_bundle(id: &str) -> MigrationBundle {
        let up_script = format!("-- {}\nSELECT 1;\n", id);
        let down_script = "SELECT 2;\n".to_string();
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

    fn id(id: &str) -> MigrationId {
        MigrationId::parse_from_str(id).unwrap()
    }

    const FIRST: &str = "2025-01-01T10-00-00__first";
    const SECOND: &str = "2025-01-02T10-00-00__second";
    const THIRD: &str = "2025-01-03T10-00-00__third";


    #[test]
    fn fresh_database_plans_every_bundle_in_ascending_order() {
        // Bundles are deliberately passed out of order.
        let bundles = vec![test_bundle(SECOND), test_bundle(FIRST), test_bundle(THIRD)];

        let plan = plan_up(&bundles, &[], UpPlanOptions::default()).unwrap();

        let planned: Vec<&str> = plan.steps.iter().map(|step| step.id.as_str()).collect();
        assert_eq!(planned, vec![FIRST, SECOND, THIRD]);
        assert!(plan
            .steps
            .iter()
            .all(|step| step.direction == StepDirection::Up));
    }

    #[test]
    fn planning_is_deterministic() {
        let bundles = vec![test_bundle(FIRST), test_bundle(SECOND)];
        let records = vec![test_record(&bundles[0], RecordStatus::Applied)];

        let first_plan = plan_up(&bundles, &records, UpPlanOptions::default()).unwrap();
        let second_plan = plan_up(&bundles, &records, UpPlanOptions::default()).unwrap();

        assert_eq!(first_plan, second_plan);
    }

    #[test]
    fn target_bound_is_inclusive() {
        let bundles = vec![test_bundle(FIRST), test_bundle(SECOND), test_bundle(THIRD)];
        let target = id(SECOND);

        let plan = plan_up(
            &bundles,
            &[],
            UpPlanOptions {
                to: Some(&target),
                ..Default::default()
            },
        )
        .unwrap();

        let planned: Vec<&str> = plan.steps.iter().map(|step| step.id.as_str()).collect();
        assert_eq!(planned, vec![FIRST, SECOND]);
    }

    #[test]
    fn unknown_target_is_an_error() {
        let bundles = vec![test_bundle(FIRST)];
        let target = id("2030-01-01T00-00-00__nope");

        assert!(matches!(
            plan_up(
                &bundles,
                &[],
                UpPlanOptions {
                    to: Some(&target),
                    ..Default::default()
                }
            ),
            Err(PlanError::UnknownTarget { .. })
        ));
    }

    #[test]
    fn applied_and_reverted_records_classify_correctly() {
        let bundles = vec![test_bundle(FIRST), test_bundle(SECOND)];
        let records = vec![
            test_record(&bundles[0], RecordStatus::Applied),
            test_record(&bundles[1], RecordStatus::Reverted),
        ];

        let plan = plan_up(&bundles, &records, UpPlanOptions::default()).unwrap();

        let planned: Vec<&str> = plan.steps.iter().map(|step| step.id.as_str()).collect();
        assert_eq!(planned, vec![SECOND]);
    }

    #[test]
    fn checksum_drift_blocks_the_plan() {
        let bundles = vec![test_bundle(FIRST)];
        let mut drifted_record = test_record(&bundles[0], RecordStatus::Applied);
        drifted_record.checksum = Fingerprint::calculate("something else", "").to_hex();

        let records = vec![drifted_record];

        assert!(matches!(
            plan_up(&bundles, &records, UpPlanOptions::default()),
            Err(PlanError::Drift { .. })
        ));

        // Only recovery operations may tolerate drift.
        let plan = plan_up(
            &bundles,
            &records,
            UpPlanOptions {
                accept_checksum: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn running_record_blocks_unless_forced() {
        let bundles = vec![test_bundle(FIRST)];
        let records = vec![test_record(&bundles[0], RecordStatus::Running)];

        assert!(matches!(
            plan_up(&bundles, &records, UpPlanOptions::default()),
            Err(PlanError::StaleRunning { .. })
        ));

        let plan = plan_up(
            &bundles,
            &records,
            UpPlanOptions {
                force: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn failed_record_blocks_normal_up() {
        let bundles = vec![test_bundle(FIRST), test_bundle(SECOND)];
        let records = vec![test_record(&bundles[0], RecordStatus::Failed)];

        assert!(matches!(
            plan_up(&bundles, &records, UpPlanOptions::default()),
            Err(PlanError::FailedRecord { .. })
        ));
    }

    #[test]
    fn record_without_bundle_blocks_everything() {
        let bundles = vec![test_bundle(FIRST)];
        let orphan_bundle = test_bundle(SECOND);
        let records = vec![test_record(&orphan_bundle, RecordStatus::Applied)];

        assert!(matches!(
            plan_up(&bundles, &records, UpPlanOptions::default()),
            Err(PlanError::MissingBundle { .. })
        ));
        assert!(matches!(
            plan_down(&bundles, &records, &id(FIRST), DownPlanOptions::default()),
            Err(PlanError::MissingBundle { .. })
        ));
    }

    #[test]
    fn requirement_satisfied_by_applied_record() {
        let dependency = test_bundle(FIRST);
        let mut dependent = test_bundle(SECOND);
        dependent.metadata.requires.insert(id(FIRST));

        let records = vec![test_record(&dependency, RecordStatus::Applied)];
        let bundles = vec![dependency, dependent];

        let plan = plan_up(&bundles, &records, UpPlanOptions::default()).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn requirement_satisfied_earlier_in_the_same_plan() {
        let dependency = test_bundle(FIRST);
        let mut dependent = test_bundle(SECOND);
        dependent.metadata.requires.insert(id(FIRST));

        let bundles = vec![dependency, dependent];

        let plan = plan_up(&bundles, &[], UpPlanOptions::default()).unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn unmet_requirement_is_an_error() {
        let mut dependent = test_bundle(SECOND);
        dependent.metadata.requires.insert(id(FIRST));

        let bundles = vec![dependent];

        assert!(matches!(
            plan_up(&bundles, &[], UpPlanOptions::default()),
            Err(PlanError::Dependency { .. })
        ));
    }

    #[test]
    fn requirement_beyond_the_target_bound_is_unmet() {
        let dependency = test_bundle(SECOND);
        let mut dependent = test_bundle(FIRST);
        dependent.metadata.requires.insert(id(SECOND));

        let bundles = vec![dependency, dependent];
        let target = id(FIRST);

        assert!(matches!(
            plan_up(
                &bundles,
                &[],
                UpPlanOptions {
                    to: Some(&target),
                    ..Default::default()
                }
            ),
            Err(PlanError::Dependency { .. })
        ));
    }

    #[test]
    fn disjoint_tags_are_blocked_by_the_filter() {
        let mut tagged = test_bundle(FIRST);
        tagged.metadata.tags.insert("data".to_string());
        let untagged = test_bundle(SECOND);

        let allow_tags: BTreeSet<String> = ["schema".to_string()].into();

        // A disjoint tag set is blocked, and so is an empty one.
        assert!(matches!(
            plan_up(
                &[tagged.clone()],
                &[],
                UpPlanOptions {
                    allow_tags: Some(&allow_tags),
                    ..Default::default()
                }
            ),
            Err(PlanError::TagBlocked { .. })
        ));
        assert!(matches!(
            plan_up(
                &[untagged],
                &[],
                UpPlanOptions {
                    allow_tags: Some(&allow_tags),
                    ..Default::default()
                }
            ),
            Err(PlanError::TagBlocked { .. })
        ));

        // An explicit ignore lets the plan through.
        let plan = plan_up(
            &[tagged],
            &[],
            UpPlanOptions {
                allow_tags: Some(&allow_tags),
                ignore_tag_filter: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn matching_tag_passes_the_filter() {
        let mut tagged = test_bundle(FIRST);
        tagged.metadata.tags.insert("schema".to_string());

        let allow_tags: BTreeSet<String> = ["schema".to_string()].into();

        let plan = plan_up(
            &[tagged],
            &[],
            UpPlanOptions {
                allow_tags: Some(&allow_tags),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn down_plans_applied_records_above_target_in_descending_order() {
        let bundles = vec![test_bundle(FIRST), test_bundle(SECOND), test_bundle(THIRD)];
        let records = vec![
            test_record(&bundles[0], RecordStatus::Applied),
            test_record(&bundles[1], RecordStatus::Applied),
            test_record(&bundles[2], RecordStatus::Applied),
        ];

        let plan = plan_down(&bundles, &records, &id(FIRST), DownPlanOptions::default()).unwrap();

        let planned: Vec<&str> = plan.steps.iter().map(|step| step.id.as_str()).collect();
        assert_eq!(planned, vec![THIRD, SECOND]);
        assert!(plan
            .steps
            .iter()
            .all(|step| step.direction == StepDirection::Down));
    }

    #[test]
    fn down_skips_records_that_were_never_applied() {
        let bundles = vec![test_bundle(FIRST), test_bundle(SECOND)];
        let records = vec![
            test_record(&bundles[0], RecordStatus::Applied),
            test_record(&bundles[1], RecordStatus::Reverted),
        ];

        let plan = plan_down(&bundles, &records, &id(FIRST), DownPlanOptions::default()).unwrap();

        assert!(plan.is_empty());
    }

    #[test]
    fn irreversible_migration_blocks_down_with_no_override() {
        let reversible = test_bundle(FIRST);
        let mut irreversible = test_bundle(SECOND);
        irreversible.metadata.reversible = false;

        let records = vec![
            test_record(&reversible, RecordStatus::Applied),
            test_record(&irreversible, RecordStatus::Applied),
        ];
        let bundles = vec![reversible, irreversible];

        assert!(matches!(
            plan_down(&bundles, &records, &id(FIRST), DownPlanOptions::default()),
            Err(PlanError::Irreversible { .. })
        ));
    }

    #[test]
    fn drifted_record_blocks_down() {
        let bundles = vec![test_bundle(FIRST), test_bundle(SECOND)];
        let mut drifted_record = test_record(&bundles[1], RecordStatus::Applied);
        drifted_record.checksum = Fingerprint::calculate("edited", "").to_hex();

        let records = vec![
            test_record(&bundles[0], RecordStatus::Applied),
            drifted_record,
        ];

        assert!(matches!(
            plan_down(&bundles, &records, &id(FIRST), DownPlanOptions::default()),
            Err(PlanError::Drift { .. })
        ));
    }

    #[test]
    fn verify_plan_covers_applied_bundles_with_verify_scripts() {
        let mut verifiable = test_bundle(FIRST);
        verifiable.verify_script = Some("SELECT 1;".to_string());
        let unverifiable = test_bundle(SECOND);
        let mut pending_verifiable = test_bundle(THIRD);
        pending_verifiable.verify_script = Some("SELECT 1;".to_string());

        let records = vec![
            test_record(&verifiable, RecordStatus::Applied),
            test_record(&unverifiable, RecordStatus::Applied),
        ];
        let bundles = vec![verifiable, unverifiable, pending_verifiable];

        let verifiable_ids = plan_verify(&bundles, &records).unwrap();

        assert_eq!(verifiable_ids.len(), 1);
        assert_eq!(verifiable_ids[0].as_str(), FIRST);
    }
}
