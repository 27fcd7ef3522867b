use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, PgConnection};

use crate::{errors::StateStoreError, identifier::MigrationId};



/// The persisted status of a migration record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecordStatus {
    /// A record exists, but the migration has not been attempted yet.
    Pending,

    /// The migration is currently being executed. At most one record per
    /// database may hold this status at any time.
    Running,

    /// The migration's up script has committed.
    Applied,

    /// The most recent attempt failed; the record stays until recovered.
    Failed,

    /// The migration was applied at some point and has since been rolled
    /// back (or recycled by a recovery operation).
    Reverted,
}

impl RecordStatus {
    pub fn try_from_str(status_name: &str) -> Result<Self, ()> {
        match status_name {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "applied" => Ok(Self::Applied),
            "failed" => Ok(Self::Failed),
            "reverted" => Ok(Self::Reverted),
            _ => Err(()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Running => "running",
            RecordStatus::Applied => "applied",
            RecordStatus::Failed => "failed",
            RecordStatus::Reverted => "reverted",
        }
    }
}


/// A row of the `schema_migrations` table.
#[derive(Clone, Debug)]
pub struct MigrationRecord {
    pub id: MigrationId,

    /// Bundle fingerprint at the time of the last state transition,
    /// hex-encoded. Kept as raw text so that a corrupted value reads as
    /// drift instead of making the whole table unreadable.
    pub checksum: String,

    pub status: RecordStatus,

    pub applied_at: Option<DateTime<Utc>>,

    pub applied_by: Option<String>,

    pub execution_ms: Option<i64>,

    pub verify_ok: Option<bool>,

    pub log_ref: Option<String>,
}


#[derive(FromRow)]
struct IntermediateRecord {
    id: String,

    checksum: String,

    status: String,

    applied_at: Option<DateTime<Utc>>,

    applied_by: Option<String>,

    execution_ms: Option<i64>,

    verify_ok: Option<bool>,

    log_ref: Option<String>,
}

impl IntermediateRecord {
    fn try_into_record(self) -> Result<MigrationRecord, StateStoreError> {
        let id = MigrationId::parse_from_str(&self.id).map_err(|_| {
            StateStoreError::InvalidRow {
                id: self.id.clone(),
                reason: "id is not a valid migration id".into(),
            }
        })?;

        let status =
            RecordStatus::try_from_str(&self.status).map_err(|_| StateStoreError::InvalidRow {
                id: self.id.clone(),
                reason:
                    "invalid status value, expected one of \
                    \"pending\", \"running\", \"applied\", \"failed\" or \"reverted\""
                        .into(),
            })?;

        Ok(MigrationRecord {
            id,
            checksum: self.checksum,
            status,
            applied_at: self.applied_at,
            applied_by: self.applied_by,
            execution_ms: self.execution_ms,
            verify_ok: self.verify_ok,
            log_ref: self.log_ref,
        })
    }
}


/// Optional field values for [`StateStore::upsert_status`].
///
/// A `None` leaves the stored value untouched on conflict (and `NULL` on
/// first insert), so status transitions only ever write the fields they
/// are about.
#[derive(Clone, Debug, Default)]
pub struct RecordUpsert<'a> {
    pub checksum: Option<&'a str>,

    pub applied_at: Option<DateTime<Utc>>,

    pub applied_by: Option<&'a str>,

    pub execution_ms: Option<i64>,

    pub log_ref: Option<&'a str>,
}


/// Owner of the `schema_migrations` table in the configured schema.
///
/// Every operation is a single short transaction on the provided
/// connection; the store never holds a transaction open across a return.
/// The schema name is validated as a plain identifier at configuration
/// time, which is what makes interpolating it into statements sound.
pub struct StateStore {
    schema: String,
}

impl StateStore {
    pub fn new<S>(schema: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            schema: schema.into(),
        }
    }

    fn qualified_table_name(&self) -> String {
        format!("\"{}\".schema_migrations", self.schema)
    }

    /// Creates the configured schema and the `schema_migrations` table if
    /// either is missing. Safe to call repeatedly.
    pub async fn ensure_table(
        &self,
        database_connection: &mut PgConnection,
    ) -> Result<(), StateStoreError> {
        sqlx::query(&format!(
            "CREATE SCHEMA IF NOT EXISTS \"{}\"",
            self.schema
        ))
        .execute(&mut *database_connection)
        .await
        .map_err(|error| StateStoreError::QueryFailed { error })?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                checksum TEXT,
                status TEXT,
                applied_at TIMESTAMPTZ,
                applied_by TEXT,
                execution_ms BIGINT,
                verify_ok BOOLEAN,
                log_ref TEXT
            )
            "#,
            self.qualified_table_name()
        ))
        .execute(database_connection)
        .await
        .map_err(|error| StateStoreError::QueryFailed { error })?;

        Ok(())
    }

    /// Returns all records, ordered by id ascending.
    pub async fn list(
        &self,
        database_connection: &mut PgConnection,
    ) -> Result<Vec<MigrationRecord>, StateStoreError> {
        let intermediate_records: Vec<IntermediateRecord> = sqlx::query_as(&format!(
            "SELECT id, checksum, status, applied_at, applied_by, execution_ms, verify_ok, log_ref \
            FROM {} ORDER BY id ASC",
            self.qualified_table_name()
        ))
        .fetch_all(database_connection)
        .await
        .map_err(|error| StateStoreError::QueryFailed { error })?;

        let mut records = Vec::with_capacity(intermediate_records.len());

        for intermediate_record in intermediate_records {
            records.push(intermediate_record.try_into_record()?);
        }

        Ok(records)
    }

    pub async fn get(
        &self,
        database_connection: &mut PgConnection,
        id: &MigrationId,
    ) -> Result<Option<MigrationRecord>, StateStoreError> {
        let optional_intermediate_record: Option<IntermediateRecord> = sqlx::query_as(&format!(
            "SELECT id, checksum, status, applied_at, applied_by, execution_ms, verify_ok, log_ref \
            FROM {} WHERE id = $1 LIMIT 1",
            self.qualified_table_name()
        ))
        .bind(id.as_str())
        .fetch_optional(database_connection)
        .await
        .map_err(|error| StateStoreError::QueryFailed { error })?;

        let Some(intermediate_record) = optional_intermediate_record else {
            return Ok(None);
        };

        Ok(Some(intermediate_record.try_into_record()?))
    }

    /// Writes a status transition for the given id, inserting the record if
    /// it does not exist yet. Runs in its own dedicated transaction,
    /// disjoint from any script transaction.
    pub async fn upsert_status(
        &self,
        database_connection: &mut PgConnection,
        id: &MigrationId,
        status: RecordStatus,
        fields: RecordUpsert<'_>,
    ) -> Result<(), StateStoreError> {
        let mut transaction = database_connection
            .begin()
            .await
            .map_err(|error| StateStoreError::TransactionFailed { error })?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (id, checksum, status, applied_at, applied_by, execution_ms, log_ref)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                checksum = COALESCE(EXCLUDED.checksum, {table}.checksum),
                applied_at = COALESCE(EXCLUDED.applied_at, {table}.applied_at),
                applied_by = COALESCE(EXCLUDED.applied_by, {table}.applied_by),
                execution_ms = COALESCE(EXCLUDED.execution_ms, {table}.execution_ms),
                log_ref = COALESCE(EXCLUDED.log_ref, {table}.log_ref)
            "#,
            table = self.qualified_table_name()
        ))
        .bind(id.as_str())
        .bind(fields.checksum)
        .bind(status.as_str())
        .bind(fields.applied_at)
        .bind(fields.applied_by)
        .bind(fields.execution_ms)
        .bind(fields.log_ref)
        .execute(&mut *transaction)
        .await
        .map_err(|error| StateStoreError::QueryFailed { error })?;

        transaction
            .commit()
            .await
            .map_err(|error| StateStoreError::TransactionFailed { error })?;

        Ok(())
    }

    /// Nulls out `applied_at`, `applied_by`, `execution_ms` and `verify_ok`
    /// while preserving `checksum` and `log_ref`.
    pub async fn clear_execution_fields(
        &self,
        database_connection: &mut PgConnection,
        id: &MigrationId,
    ) -> Result<(), StateStoreError> {
        sqlx::query(&format!(
            "UPDATE {} SET applied_at = NULL, applied_by = NULL, \
            execution_ms = NULL, verify_ok = NULL WHERE id = $1",
            self.qualified_table_name()
        ))
        .bind(id.as_str())
        .execute(database_connection)
        .await
        .map_err(|error| StateStoreError::QueryFailed { error })?;

        Ok(())
    }

    pub async fn set_verify(
        &self,
        database_connection: &mut PgConnection,
        id: &MigrationId,
        verify_ok: bool,
    ) -> Result<(), StateStoreError> {
        sqlx::query(&format!(
            "UPDATE {} SET verify_ok = $1 WHERE id = $2",
            self.qualified_table_name()
        ))
        .bind(verify_ok)
        .bind(id.as_str())
        .execute(database_connection)
        .await
        .map_err(|error| StateStoreError::QueryFailed { error })?;

        Ok(())
    }

    /// Rewrites the stored checksum for the given id (the `repair` write).
    pub async fn set_checksum(
        &self,
        database_connection: &mut PgConnection,
        id: &MigrationId,
        checksum: &str,
    ) -> Result<(), StateStoreError> {
        sqlx::query(&format!(
            "UPDATE {} SET checksum = $1 WHERE id = $2",
            self.qualified_table_name()
        ))
        .bind(checksum)
        .bind(id.as_str())
        .execute(database_connection)
        .await
        .map_err(|error| StateStoreError::QueryFailed { error })?;

        Ok(())
    }

    pub async fn delete(
        &self,
        database_connection: &mut PgConnection,
        id: &MigrationId,
    ) -> Result<(), StateStoreError> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE id = $1",
            self.qualified_table_name()
        ))
        .bind(id.as_str())
        .execute(database_connection)
        .await
        .map_err(|error| StateStoreError::QueryFailed { error })?;

        Ok(())
    }

    /// Resets a record to `reverted` and clears its execution fields in a
    /// single transaction, preserving `checksum` and `log_ref`. Used by
    /// rollback bookkeeping and the recovery operations.
    pub async fn reset_to_reverted(
        &self,
        database_connection: &mut PgConnection,
        id: &MigrationId,
    ) -> Result<(), StateStoreError> {
        let mut transaction = database_connection
            .begin()
            .await
            .map_err(|error| StateStoreError::TransactionFailed { error })?;

        sqlx::query(&format!(
            "UPDATE {} SET status = $1 WHERE id = $2",
            self.qualified_table_name()
        ))
        .bind(RecordStatus::Reverted.as_str())
        .bind(id.as_str())
        .execute(&mut *transaction)
        .await
        .map_err(|error| StateStoreError::QueryFailed { error })?;

        self.clear_execution_fields(&mut *transaction, id).await?;

        transaction
            .commit()
            .await
            .map_err(|error| StateStoreError::TransactionFailed { error })?;

        Ok(())
    }
}



#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_round_trips_through_its_text_form() {
        for status in [
            RecordStatus::Pending,
            RecordStatus::Running,
            RecordStatus::Applied,
            RecordStatus::Failed,
            RecordStatus::Reverted,
        ] {
            assert_eq!(
                RecordStatus::try_from_str(status.as_str()),
                Ok(status)
            );
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(RecordStatus::try_from_str("done").is_err());
    }

    #[test]
    fn invalid_status_row_does_not_convert() {
        let intermediate_record = IntermediateRecord {
            id: "2025-01-01T10-00-00__example".to_string(),
            checksum: "00".repeat(32),
            status: "in-progress".to_string(),
            applied_at: None,
            applied_by: None,
            execution_ms: None,
            verify_ok: None,
            log_ref: None,
        };

        assert!(matches!(
            intermediate_record.try_into_record(),
            Err(StateStoreError::InvalidRow { .. })
        ));
    }
}
